//! Böter: fine tracking for teams on top of a reactive document store.

pub mod auth;
pub mod backend;
pub mod config;
pub mod http;
pub mod models;
pub mod store;
pub mod stores;
pub mod summary;
pub mod views;
