use std::{ops::Deref, sync::{Arc, RwLock}};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

use boter_core::{DocumentRef, DocumentSnapshot};

/// Why a document cache entry holds no value.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum CacheError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("malformed document {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// A decoded record together with its backend document id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithId<T> {
    pub id: Arc<str>,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Deref for WithId<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

pub(crate) fn decode<T: DeserializeOwned>(snapshot: &DocumentSnapshot) -> Result<WithId<T>, CacheError> {
    let fields = snapshot
        .fields
        .as_ref()
        .ok_or_else(|| CacheError::NotFound(snapshot.reference.to_string()))?;

    serde_json::from_value::<T>(Value::Object(fields.clone()))
        .map(|data| WithId {
            id: Arc::from(snapshot.id()),
            data,
        })
        .map_err(|e| CacheError::Malformed {
            path: snapshot.reference.to_string(),
            reason: e.to_string(),
        })
}

/// Read result for a single document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentView<T> {
    pub data: Option<WithId<T>>,
    pub loading: bool,
    pub error: Option<CacheError>,
    pub is_ready: bool,
}

impl<T> DocumentView<T> {
    pub(crate) fn idle() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            is_ready: false,
        }
    }
}

struct DocumentState<T> {
    data: Option<WithId<T>>,
    loading: bool,
    error: Option<CacheError>,
    revision: u64,
}

/// The latest known state of one document.
pub struct DocumentCache<T> {
    reference: DocumentRef,
    once: bool,
    state: RwLock<DocumentState<T>>,
}

impl<T: DeserializeOwned + Clone> DocumentCache<T> {
    pub(crate) fn new(reference: DocumentRef, once: bool) -> Self {
        Self {
            reference,
            once,
            state: RwLock::new(DocumentState {
                data: None,
                loading: true,
                error: None,
                revision: 0,
            }),
        }
    }

    pub(crate) fn apply(&self, snapshot: &DocumentSnapshot) {
        let decoded = decode::<T>(snapshot);
        if let Err(CacheError::Malformed { path, reason }) = &decoded {
            tracing::warn!(%path, %reason, "Cannot decode document");
        }

        let mut state = self.state.write().unwrap();
        match decoded {
            Ok(value) => {
                state.data = Some(value);
                state.error = None;
            }
            Err(e) => {
                state.data = None;
                state.error = Some(e);
            }
        }
        state.loading = false;
        state.revision += 1;
    }

    pub fn reference(&self) -> &DocumentRef {
        &self.reference
    }

    pub fn is_once(&self) -> bool {
        self.once
    }

    pub fn data(&self) -> Option<WithId<T>> {
        self.state.read().unwrap().data.clone()
    }

    pub fn loading(&self) -> bool {
        self.state.read().unwrap().loading
    }

    pub fn error(&self) -> Option<CacheError> {
        self.state.read().unwrap().error.clone()
    }

    /// Number of snapshots applied so far.
    pub fn revision(&self) -> u64 {
        self.state.read().unwrap().revision
    }

    pub fn view(&self) -> DocumentView<T> {
        let state = self.state.read().unwrap();
        DocumentView {
            data: state.data.clone(),
            loading: state.loading,
            error: state.error.clone(),
            is_ready: state.data.is_some() && !state.loading,
        }
    }
}
