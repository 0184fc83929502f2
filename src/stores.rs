use std::sync::Arc;

use boter_core::{BackendError, CollectionRef, DocumentBackend};

use crate::{
    config::CollectionsConfig,
    models::{Category, Entry, FineType, Player},
    store::Store,
};

/// One store per entity collection, built once at startup and shared.
pub struct Stores {
    pub players: Store<Player>,
    pub entries: Store<Entry>,
    pub categories: Store<Category>,
    pub types: Store<FineType>,
}

impl Stores {
    pub fn new(backend: Arc<dyn DocumentBackend>, collections: &CollectionsConfig) -> Result<Self, BackendError> {
        Ok(Self {
            players: Store::new(backend.clone(), CollectionRef::parse(&collections.players)?),
            entries: Store::new(backend.clone(), CollectionRef::parse(&collections.entries)?),
            categories: Store::new(backend.clone(), CollectionRef::parse(&collections.categories)?),
            types: Store::new(backend, CollectionRef::parse(&collections.types)?),
        })
    }
}
