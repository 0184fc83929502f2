//! Application workflows built from store read hooks and mutations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use boter_core::{BackendError, Direction, DocumentRef, FilterOp};

use crate::{
    models::{Category, Entry, EntryLine, FineType, Player},
    store::{CollectionView, ReadOptions, StoreError},
    stores::Stores,
    summary::{summarize, Summary},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryView {
    #[serde(flatten)]
    pub summary: Summary,
    pub is_ready: bool,
}

/// Every player's total and fine history, highest total first.
pub fn summary(stores: &Stores) -> SummaryView {
    let players = stores
        .players
        .use_collection("players", Some(stores.players.query()), ReadOptions::default());
    let entries = stores.entries.use_collection(
        "entries",
        Some(stores.entries.query().order_by("date", Direction::Ascending)),
        ReadOptions::default(),
    );

    let mut types_ready = true;
    let summary = summarize(&players.data, &entries.data, |type_ref| {
        let fine_type = stores.types.use_document(Some(type_ref), ReadOptions::default());
        types_ready &= !fine_type.loading;
        fine_type.data.map(|t| t.data)
    });

    SummaryView {
        summary,
        is_ready: players.is_ready && entries.is_ready && types_ready,
    }
}

/// Players sorted by name.
pub fn roster(stores: &Stores) -> CollectionView<Player> {
    let mut view = stores
        .players
        .use_collection("players", Some(stores.players.query()), ReadOptions::default());
    view.data.sort_by(|a, b| a.name.cmp(&b.name));
    view
}

pub fn categories(stores: &Stores) -> CollectionView<Category> {
    let mut view = stores
        .categories
        .use_collection("categories", Some(stores.categories.query()), ReadOptions::default());
    view.data.sort_by_key(|c| c.ordinal);
    view
}

/// Fine types of one category, cheapest first.
///
/// Without a selected category nothing is fetched and the view is not ready.
/// Ids that are not a known category are refused before any query is opened.
pub fn fine_types(stores: &Stores, category: Option<&str>) -> Result<CollectionView<FineType>, BackendError> {
    let query = match category {
        Some(id) => {
            let category_ref = stores.categories.doc(id)?;
            let known = categories(stores);
            if !known.is_ready {
                return Ok(CollectionView::not_ready());
            }
            if !known.data.iter().any(|c| &*c.id == id) {
                return Err(BackendError::NotFound(category_ref.to_string()));
            }
            Some(stores.types.query().filter("categoryRef", FilterOp::Equal, category_ref))
        }
        None => None,
    };

    let key = format!("types{}", category.unwrap_or_default());
    let mut view = stores.types.use_collection(&key, query, ReadOptions::default());
    view.data.sort_by(|a, b| a.amount.cmp(&b.amount));
    Ok(view)
}

/// A filled-in "new fines" form: which fine types each player got.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FineForm {
    pub date: Date,
    /// Player id → fine-type id → selected.
    #[serde(default)]
    pub players: BTreeMap<String, BTreeMap<String, bool>>,
}

pub fn build_entry(stores: &Stores, form: &FineForm) -> Result<Entry, BackendError> {
    let mut lines = Vec::new();
    for (player_id, selections) in &form.players {
        for (type_id, selected) in selections {
            if *selected {
                lines.push(EntryLine {
                    player_ref: stores.players.doc(player_id)?,
                    type_ref: stores.types.doc(type_id)?,
                });
            }
        }
    }

    Ok(Entry {
        date: form.date,
        entries: lines,
    })
}

pub fn record_fines(stores: &Stores, form: &FineForm) -> Result<DocumentRef, StoreError> {
    let entry = build_entry(stores, form)?;
    let reference = stores.entries.add(&entry, None)?;
    tracing::info!(path = %reference, date = %entry.date, lines = entry.entries.len(), "Fines recorded");
    Ok(reference)
}

pub fn add_player(stores: &Stores, name: &str) -> Result<DocumentRef, StoreError> {
    stores.players.add(&Player { name: name.to_string() }, None)
}
