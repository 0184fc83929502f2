use std::sync::{Arc, Mutex, RwLock};

use serde::{de::DeserializeOwned, Serialize};

use boter_core::Query;

use super::{document::{DocumentCache, WithId}, CacheKey};

/// Read result for a collection query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionView<T> {
    pub data: Vec<WithId<T>>,
    pub loading: bool,
    pub error: bool,
    pub is_ready: bool,
}

impl<T> CollectionView<T> {
    /// Result for a query that cannot be issued yet.
    pub(crate) fn not_ready() -> Self {
        Self {
            data: Vec::new(),
            loading: true,
            error: false,
            is_ready: false,
        }
    }
}

struct QueryState<T> {
    documents: Vec<Arc<DocumentCache<T>>>,
    loading: bool,
    revision: u64,
}

struct Memo<T> {
    revisions: Vec<u64>,
    items: Arc<Vec<WithId<T>>>,
}

/// The latest result set of one query, as shared document cache entries.
pub struct QueryCache<T> {
    key: CacheKey,
    query: Query,
    state: RwLock<QueryState<T>>,
    memo: Mutex<Option<Memo<T>>>,
}

impl<T: DeserializeOwned + Clone> QueryCache<T> {
    pub(crate) fn new(key: CacheKey, query: Query) -> Self {
        Self {
            key,
            query,
            state: RwLock::new(QueryState {
                documents: Vec::new(),
                loading: true,
                revision: 0,
            }),
            memo: Mutex::new(None),
        }
    }

    pub(crate) fn replace(&self, documents: Vec<Arc<DocumentCache<T>>>) {
        let mut state = self.state.write().unwrap();
        state.documents = documents;
        state.loading = false;
        state.revision += 1;
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn loading(&self) -> bool {
        self.state.read().unwrap().loading
    }

    pub fn revision(&self) -> u64 {
        self.state.read().unwrap().revision
    }

    pub fn documents(&self) -> Vec<Arc<DocumentCache<T>>> {
        self.state.read().unwrap().documents.clone()
    }

    /// Values of the documents that currently exist, in query order.
    ///
    /// Recomputed only when the result set or one of its documents changed.
    pub fn data_items(&self) -> Arc<Vec<WithId<T>>> {
        let (revision, documents) = {
            let state = self.state.read().unwrap();
            (state.revision, state.documents.clone())
        };

        let mut revisions = Vec::with_capacity(documents.len() + 1);
        revisions.push(revision);
        revisions.extend(documents.iter().map(|d| d.revision()));

        let mut memo = self.memo.lock().unwrap();
        if let Some(memo) = memo.as_ref() {
            if memo.revisions == revisions {
                return memo.items.clone();
            }
        }

        let items = Arc::new(documents.iter().filter_map(|d| d.data()).collect::<Vec<_>>());
        *memo = Some(Memo {
            revisions,
            items: items.clone(),
        });
        items
    }
}
