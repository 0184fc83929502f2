use thiserror::Error;

use crate::models::{CollectionRef, DocumentRef, DocumentSnapshot, Fields, Query, QuerySnapshot};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Other(String),
}

pub type ListenerId = u64;

/// Callback invoked with every snapshot pushed for a standing subscription.
pub type SnapshotListener<S> = Box<dyn Fn(Result<S, BackendError>) + Send + Sync>;

/// A document database that can be read once or listened to.
///
/// Listeners are called with the current state as soon as they are
/// registered, and again after every mutation that can change what they
/// observe. Implementations must not hold internal locks while invoking a
/// listener.
pub trait DocumentBackend: Send + Sync {
    fn get_document(&self, reference: &DocumentRef) -> Result<DocumentSnapshot, BackendError>;
    fn get_query(&self, query: &Query) -> Result<QuerySnapshot, BackendError>;

    fn listen_document(&self, reference: &DocumentRef, listener: SnapshotListener<DocumentSnapshot>) -> Result<ListenerId, BackendError>;
    fn listen_query(&self, query: &Query, listener: SnapshotListener<QuerySnapshot>) -> Result<ListenerId, BackendError>;

    fn add(&self, collection: &CollectionRef, fields: Fields) -> Result<DocumentRef, BackendError>;
    fn set(&self, reference: &DocumentRef, fields: Fields, merge: bool) -> Result<(), BackendError>;
    fn update(&self, reference: &DocumentRef, fields: Fields) -> Result<(), BackendError>;
    fn delete(&self, reference: &DocumentRef) -> Result<(), BackendError>;
}
