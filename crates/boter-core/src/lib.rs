//! Core types and traits for Böter document backends.
//!
//! This crate provides the `DocumentBackend` trait together with the document
//! model it speaks (references, queries and snapshots), so that backends can
//! live in separate crates.

pub mod backend;
pub mod models;

// Re-export key types at crate root for convenience
pub use backend::{BackendError, DocumentBackend, ListenerId, SnapshotListener};
pub use models::{
    compare_values, CollectionRef, Direction, DocumentRef, DocumentSnapshot, Fields, Filter,
    FilterOp, OrderBy, Query, QuerySnapshot,
};
