//! Reactive document store.
//!
//! A [`Store`] mirrors documents and queries of one collection into local
//! cache entries. Backend pushes are queued on the store's event channel and
//! applied in arrival order by [`Store::apply_pending`], which every read hook
//! runs before it reads.

use std::{
    collections::{hash_map::Entry as MapEntry, HashMap},
    fmt::Display,
    sync::{Arc, Mutex, RwLock},
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use boter_core::{
    BackendError, CollectionRef, DocumentBackend, DocumentRef, DocumentSnapshot, Fields, Query, QuerySnapshot,
};

pub mod document;
pub mod query;

pub use document::{CacheError, DocumentCache, DocumentView, WithId};
pub use query::{CollectionView, QueryCache};

/// Types that can be kept in a [`Store`].
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("record does not encode to a document object")]
    NotAnObject,
}

/// Logical query name (or document path) plus read mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    name: Arc<str>,
    once: bool,
}

impl CacheKey {
    pub fn new(name: &str, once: bool) -> Self {
        Self {
            name: Arc::from(name),
            once,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_once(&self) -> bool {
        self.once
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.once {
            write!(f, "{}-once", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Do not issue the read; the hook reports not ready.
    pub skip: bool,
    /// Read once instead of keeping a live subscription.
    pub once: bool,
}

impl ReadOptions {
    pub fn once() -> Self {
        Self { skip: false, once: true }
    }

    pub fn skip() -> Self {
        Self { skip: true, once: false }
    }
}

enum StoreEvent {
    Document {
        key: CacheKey,
        result: Result<DocumentSnapshot, BackendError>,
    },
    Query {
        key: CacheKey,
        result: Result<QuerySnapshot, BackendError>,
    },
}

pub struct Store<T> {
    collection: CollectionRef,
    backend: Arc<dyn DocumentBackend>,
    queries: RwLock<HashMap<CacheKey, Arc<QueryCache<T>>>>,
    items: RwLock<HashMap<CacheKey, Arc<DocumentCache<T>>>>,
    events_tx: mpsc::UnboundedSender<StoreEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<StoreEvent>>,
}

impl<T: Record> Store<T> {
    pub fn new(backend: Arc<dyn DocumentBackend>, collection: CollectionRef) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            collection,
            backend,
            queries: RwLock::new(HashMap::new()),
            items: RwLock::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(events_rx),
        }
    }

    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    pub fn doc(&self, id: &str) -> Result<DocumentRef, BackendError> {
        self.collection.doc(id)
    }

    /// Query over the whole collection, to be refined by the caller.
    pub fn query(&self) -> Query {
        Query::new(self.collection.clone())
    }

    // Mutations. `parent` scopes the operation to the subcollection of the
    // same name under that document.

    pub fn add(&self, value: &T, parent: Option<&DocumentRef>) -> Result<DocumentRef, StoreError> {
        let collection = self.target_collection(parent)?;
        let reference = self.backend.add(&collection, encode(value)?)?;
        metrics::increment_counter!("boter_documents_written_total", "collection" => self.collection.path().to_string());
        tracing::info!(path = %reference, "Document created");
        Ok(reference)
    }

    /// Creates or replaces the document with the given id.
    pub fn set(&self, id: &str, value: &T, parent: Option<&DocumentRef>) -> Result<DocumentRef, StoreError> {
        let reference = self.target_collection(parent)?.doc(id)?;
        self.backend.set(&reference, encode(value)?, false)?;
        metrics::increment_counter!("boter_documents_written_total", "collection" => self.collection.path().to_string());
        tracing::info!(path = %reference, "Document set");
        Ok(reference)
    }

    pub fn update(&self, id: &str, fields: Fields, parent: Option<&DocumentRef>) -> Result<(), StoreError> {
        let reference = self.target_collection(parent)?.doc(id)?;
        self.backend.update(&reference, fields)?;
        metrics::increment_counter!("boter_documents_written_total", "collection" => self.collection.path().to_string());
        tracing::info!(path = %reference, "Document updated");
        Ok(())
    }

    pub fn delete(&self, id: &str, parent: Option<&DocumentRef>) -> Result<(), StoreError> {
        let reference = self.target_collection(parent)?.doc(id)?;
        self.backend.delete(&reference)?;
        metrics::increment_counter!("boter_documents_written_total", "collection" => self.collection.path().to_string());
        tracing::info!(path = %reference, "Document deleted");
        Ok(())
    }

    fn target_collection(&self, parent: Option<&DocumentRef>) -> Result<CollectionRef, BackendError> {
        match parent {
            Some(parent) => parent.collection(self.collection.id()),
            None => Ok(self.collection.clone()),
        }
    }

    /// Returns the cache entry for `key`, creating it and issuing `query` on
    /// first use. Later calls with the same key ignore `query`.
    pub fn get_collection(&self, key: &str, query: Query, options: ReadOptions) -> Arc<QueryCache<T>> {
        let key = CacheKey::new(key, options.once);
        if let Some(cached) = self.queries.read().unwrap().get(&key) {
            return cached.clone();
        }

        let (cache, created) = {
            let mut queries = self.queries.write().unwrap();
            match queries.entry(key.clone()) {
                MapEntry::Occupied(e) => (e.get().clone(), false),
                MapEntry::Vacant(e) => (e.insert(Arc::new(QueryCache::new(key.clone(), query))).clone(), true),
            }
        };

        if created {
            self.open_query(key, cache.query());
        }
        cache
    }

    /// Returns the cache entry for `reference`, subscribing on first use.
    pub fn get_document(&self, reference: &DocumentRef, options: ReadOptions) -> Arc<DocumentCache<T>> {
        let (cache, created) = self.document_entry(reference, options.once);
        if created {
            self.open_document(CacheKey::new(reference.path(), options.once), reference);
        }
        cache
    }

    pub fn use_collection(&self, key: &str, query: Option<Query>, options: ReadOptions) -> CollectionView<T> {
        let query = match query {
            Some(query) if !options.skip => query,
            _ => return CollectionView::not_ready(),
        };

        let cache = self.get_collection(key, query, options);
        self.apply_pending();

        let loading = cache.loading();
        CollectionView {
            data: cache.data_items().as_ref().clone(),
            loading,
            error: false,
            is_ready: !loading,
        }
    }

    pub fn use_document(&self, reference: Option<&DocumentRef>, options: ReadOptions) -> DocumentView<T> {
        let reference = match reference {
            Some(reference) if !options.skip => reference,
            _ => return DocumentView::idle(),
        };

        let cache = self.get_document(reference, options);
        self.apply_pending();
        cache.view()
    }

    /// Applies every queued backend event in arrival order.
    pub fn apply_pending(&self) -> usize {
        let mut events = self.events_rx.lock().unwrap();
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            self.apply(event);
            applied += 1;
        }
        if applied > 0 {
            metrics::counter!("boter_store_events_applied_total", applied as u64, "collection" => self.collection.path().to_string());
            tracing::trace!(collection = %self.collection, applied, "Applied store events");
        }
        applied
    }

    pub fn cached_queries(&self) -> usize {
        self.queries.read().unwrap().len()
    }

    pub fn cached_documents(&self) -> usize {
        self.items.read().unwrap().len()
    }

    fn apply(&self, event: StoreEvent) {
        match event {
            StoreEvent::Document { key, result } => match result {
                Ok(snapshot) => {
                    let cache = self.items.read().unwrap().get(&key).cloned();
                    if let Some(cache) = cache {
                        cache.apply(&snapshot);
                    }
                }
                Err(e) => self.log_backend_error(&key, &e),
            },
            StoreEvent::Query { key, result } => match result {
                Ok(snapshot) => {
                    let cache = self.queries.read().unwrap().get(&key).cloned();
                    if let Some(cache) = cache {
                        let documents = snapshot
                            .documents
                            .iter()
                            .map(|doc| self.document_for_snapshot(doc))
                            .collect();
                        cache.replace(documents);
                    }
                }
                Err(e) => self.log_backend_error(&key, &e),
            },
        }
    }

    /// Shares one live entry per document across all query results.
    fn document_for_snapshot(&self, snapshot: &DocumentSnapshot) -> Arc<DocumentCache<T>> {
        let (cache, created) = self.document_entry(&snapshot.reference, false);
        cache.apply(snapshot);
        if created {
            self.open_document(CacheKey::new(snapshot.reference.path(), false), &snapshot.reference);
        }
        cache
    }

    fn document_entry(&self, reference: &DocumentRef, once: bool) -> (Arc<DocumentCache<T>>, bool) {
        let key = CacheKey::new(reference.path(), once);
        if let Some(cached) = self.items.read().unwrap().get(&key) {
            return (cached.clone(), false);
        }

        let mut items = self.items.write().unwrap();
        match items.entry(key) {
            MapEntry::Occupied(e) => (e.get().clone(), false),
            MapEntry::Vacant(e) => (e.insert(Arc::new(DocumentCache::new(reference.clone(), once))).clone(), true),
        }
    }

    fn open_document(&self, key: CacheKey, reference: &DocumentRef) {
        if key.is_once() {
            let result = self.backend.get_document(reference);
            self.send(StoreEvent::Document { key, result });
            return;
        }

        let tx = self.events_tx.clone();
        let listener_key = key.clone();
        let listener = Box::new(move |result: Result<DocumentSnapshot, BackendError>| {
            let _ = tx.send(StoreEvent::Document {
                key: listener_key.clone(),
                result,
            });
        });

        match self.backend.listen_document(reference, listener) {
            Ok(listener_id) => {
                metrics::increment_counter!("boter_subscriptions_opened_total", "collection" => self.collection.path().to_string());
                tracing::debug!(collection = %self.collection, %key, listener_id, "Document subscription opened");
            }
            Err(e) => self.log_backend_error(&key, &e),
        }
    }

    fn open_query(&self, key: CacheKey, query: &Query) {
        if key.is_once() {
            let result = self.backend.get_query(query);
            self.send(StoreEvent::Query { key, result });
            return;
        }

        let tx = self.events_tx.clone();
        let listener_key = key.clone();
        let listener = Box::new(move |result: Result<QuerySnapshot, BackendError>| {
            let _ = tx.send(StoreEvent::Query {
                key: listener_key.clone(),
                result,
            });
        });

        match self.backend.listen_query(query, listener) {
            Ok(listener_id) => {
                metrics::increment_counter!("boter_subscriptions_opened_total", "collection" => self.collection.path().to_string());
                tracing::debug!(collection = %self.collection, %key, listener_id, "Query subscription opened");
            }
            Err(e) => self.log_backend_error(&key, &e),
        }
    }

    fn send(&self, event: StoreEvent) {
        // The receiver lives as long as the store.
        let _ = self.events_tx.send(event);
    }

    fn log_backend_error(&self, key: &CacheKey, error: &BackendError) {
        metrics::increment_counter!("boter_backend_errors_total", "collection" => self.collection.path().to_string());
        tracing::warn!(collection = %self.collection, %key, %error, "Backend read failed");
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        _ => Err(StoreError::NotAnObject),
    }
}
