//! In-memory document backend with push notifications.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use uuid::Uuid;

use boter_core::{
    BackendError, CollectionRef, DocumentBackend, DocumentRef, DocumentSnapshot, Fields, ListenerId, Query,
    QuerySnapshot, SnapshotListener,
};

/// Collection path → document id → document, as read from a seed file.
pub type SeedData = BTreeMap<String, BTreeMap<String, Fields>>;

type Collections = BTreeMap<Arc<str>, BTreeMap<Arc<str>, Fields>>;

struct DocumentListener {
    reference: DocumentRef,
    callback: Arc<SnapshotListener<DocumentSnapshot>>,
}

struct QueryListener {
    query: Query,
    callback: Arc<SnapshotListener<QuerySnapshot>>,
}

pub struct MemoryBackend {
    collections: RwLock<Collections>,
    document_listeners: RwLock<Vec<DocumentListener>>,
    query_listeners: RwLock<Vec<QueryListener>>,
    listener_counter: AtomicU64,
    offline: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            document_listeners: RwLock::new(Vec::new()),
            query_listeners: RwLock::new(Vec::new()),
            listener_counter: AtomicU64::new(1),
            offline: AtomicBool::new(false),
        }
    }

    /// Loads seed documents, replacing any with the same path.
    pub fn import(&self, seed: SeedData) -> Result<usize, BackendError> {
        self.ensure_online()?;
        // Nothing is written unless every path in the seed is valid.
        let mut staged = Vec::new();
        for (collection_path, documents) in seed {
            let collection = CollectionRef::parse(&collection_path)?;
            for (id, fields) in documents {
                staged.push((collection.doc(&id)?, fields));
            }
        }

        let mut written = Vec::with_capacity(staged.len());
        {
            let mut collections = self.collections.write().unwrap();
            for (reference, fields) in staged {
                collections
                    .entry(Arc::from(reference.parent().path()))
                    .or_default()
                    .insert(Arc::from(reference.id()), fields);
                written.push(reference);
            }
        }
        for reference in &written {
            self.notify(reference);
        }
        tracing::info!(documents = written.len(), "Seed data imported");
        Ok(written.len())
    }

    /// Simulates losing the connection. Going back online re-delivers the
    /// current state to every listener.
    pub fn set_offline(&self, offline: bool) {
        let was_offline = self.offline.swap(offline, Ordering::SeqCst);
        tracing::info!(offline, "Backend connectivity changed");
        if was_offline && !offline {
            self.resync();
        }
    }

    pub fn document_count(&self, collection: &CollectionRef) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(collection.path())
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.document_listeners.read().unwrap().len() + self.query_listeners.read().unwrap().len()
    }

    fn next_listener_id(&self) -> ListenerId {
        self.listener_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend is offline".to_string()));
        }
        Ok(())
    }

    fn notify(&self, reference: &DocumentRef) {
        let collection = reference.parent();
        let (documents, queries) = {
            let collections = self.collections.read().unwrap();
            let documents: Vec<_> = self
                .document_listeners
                .read()
                .unwrap()
                .iter()
                .filter(|l| &l.reference == reference)
                .map(|l| (l.callback.clone(), snapshot_document(&collections, reference)))
                .collect();
            let queries: Vec<_> = self
                .query_listeners
                .read()
                .unwrap()
                .iter()
                .filter(|l| l.query.collection == collection)
                .map(|l| (l.callback.clone(), run_query(&collections, &l.query)))
                .collect();
            (documents, queries)
        };

        for (callback, snapshot) in documents {
            callback(Ok(snapshot));
        }
        for (callback, snapshot) in queries {
            callback(Ok(snapshot));
        }
    }

    fn resync(&self) {
        let (documents, queries) = {
            let collections = self.collections.read().unwrap();
            let documents: Vec<_> = self
                .document_listeners
                .read()
                .unwrap()
                .iter()
                .map(|l| (l.callback.clone(), snapshot_document(&collections, &l.reference)))
                .collect();
            let queries: Vec<_> = self
                .query_listeners
                .read()
                .unwrap()
                .iter()
                .map(|l| (l.callback.clone(), run_query(&collections, &l.query)))
                .collect();
            (documents, queries)
        };

        for (callback, snapshot) in documents {
            callback(Ok(snapshot));
        }
        for (callback, snapshot) in queries {
            callback(Ok(snapshot));
        }
    }
}

fn snapshot_document(collections: &Collections, reference: &DocumentRef) -> DocumentSnapshot {
    let fields = collections
        .get(reference.parent().path())
        .and_then(|docs| docs.get(reference.id()))
        .cloned();
    DocumentSnapshot {
        reference: reference.clone(),
        fields,
    }
}

fn run_query(collections: &Collections, query: &Query) -> QuerySnapshot {
    let candidates = match collections.get(query.collection.path()) {
        Some(docs) => docs
            .iter()
            .filter_map(|(id, fields)| {
                let reference = query.collection.doc(id).ok()?;
                Some(DocumentSnapshot {
                    reference,
                    fields: Some(fields.clone()),
                })
            })
            .collect(),
        None => Vec::new(),
    };
    query.evaluate(candidates)
}

impl DocumentBackend for MemoryBackend {
    fn get_document(&self, reference: &DocumentRef) -> Result<DocumentSnapshot, BackendError> {
        self.ensure_online()?;
        let collections = self.collections.read().unwrap();
        Ok(snapshot_document(&collections, reference))
    }

    fn get_query(&self, query: &Query) -> Result<QuerySnapshot, BackendError> {
        self.ensure_online()?;
        let collections = self.collections.read().unwrap();
        Ok(run_query(&collections, query))
    }

    fn listen_document(&self, reference: &DocumentRef, listener: SnapshotListener<DocumentSnapshot>) -> Result<ListenerId, BackendError> {
        let id = self.next_listener_id();
        let callback = Arc::new(listener);
        self.document_listeners.write().unwrap().push(DocumentListener {
            reference: reference.clone(),
            callback: callback.clone(),
        });
        tracing::debug!(listener_id = id, path = %reference, "Document listener registered");

        match self.get_document(reference) {
            Ok(snapshot) => callback(Ok(snapshot)),
            Err(e) => callback(Err(e)),
        }
        Ok(id)
    }

    fn listen_query(&self, query: &Query, listener: SnapshotListener<QuerySnapshot>) -> Result<ListenerId, BackendError> {
        let id = self.next_listener_id();
        let callback = Arc::new(listener);
        self.query_listeners.write().unwrap().push(QueryListener {
            query: query.clone(),
            callback: callback.clone(),
        });
        tracing::debug!(listener_id = id, collection = %query.collection, "Query listener registered");

        match self.get_query(query) {
            Ok(snapshot) => callback(Ok(snapshot)),
            Err(e) => callback(Err(e)),
        }
        Ok(id)
    }

    fn add(&self, collection: &CollectionRef, fields: Fields) -> Result<DocumentRef, BackendError> {
        self.ensure_online()?;
        let reference = collection.doc(&Uuid::new_v4().simple().to_string())?;
        self.collections
            .write()
            .unwrap()
            .entry(Arc::from(collection.path()))
            .or_default()
            .insert(Arc::from(reference.id()), fields);
        tracing::debug!(path = %reference, "Document added");
        self.notify(&reference);
        Ok(reference)
    }

    fn set(&self, reference: &DocumentRef, fields: Fields, merge: bool) -> Result<(), BackendError> {
        self.ensure_online()?;
        {
            let mut collections = self.collections.write().unwrap();
            let docs = collections.entry(Arc::from(reference.parent().path())).or_default();
            match docs.get_mut(reference.id()) {
                Some(existing) if merge => existing.extend(fields),
                Some(existing) => *existing = fields,
                None => {
                    docs.insert(Arc::from(reference.id()), fields);
                }
            }
        }
        tracing::debug!(path = %reference, merge, "Document set");
        self.notify(reference);
        Ok(())
    }

    fn update(&self, reference: &DocumentRef, fields: Fields) -> Result<(), BackendError> {
        self.ensure_online()?;
        {
            let mut collections = self.collections.write().unwrap();
            let existing = collections
                .get_mut(reference.parent().path())
                .and_then(|docs| docs.get_mut(reference.id()))
                .ok_or_else(|| BackendError::NotFound(reference.to_string()))?;
            existing.extend(fields);
        }
        tracing::debug!(path = %reference, "Document updated");
        self.notify(reference);
        Ok(())
    }

    fn delete(&self, reference: &DocumentRef) -> Result<(), BackendError> {
        self.ensure_online()?;
        let removed = self
            .collections
            .write()
            .unwrap()
            .get_mut(reference.parent().path())
            .and_then(|docs| docs.remove(reference.id()))
            .is_some();
        tracing::debug!(path = %reference, removed, "Document deleted");
        if removed {
            self.notify(reference);
        }
        Ok(())
    }
}
