// Re-export the backend contract and the in-memory implementation so callers
// only need this crate.
pub use boter_core::{
    BackendError, CollectionRef, Direction, DocumentBackend, DocumentRef, DocumentSnapshot, Fields, FilterOp, Query,
    QuerySnapshot,
};
pub use boter_memory::{MemoryBackend, SeedData};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("invalid seed file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Reads a seed file and imports it into `backend`.
pub fn load_seed(backend: &MemoryBackend, path: &str) -> Result<usize, SeedError> {
    let contents = std::fs::read_to_string(path)?;
    let seed: SeedData = serde_json::from_str(&contents)?;
    Ok(backend.import(seed)?)
}
