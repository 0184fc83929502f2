use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

use boter_core::DocumentRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
}

/// A named infraction with a fixed amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FineType {
    pub name: String,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_ref: Option<DocumentRef>,
}

/// The kind of occasion a fine type belongs to (match, training, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub ordinal: i64,
}

/// One recorded fine event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub date: Date,
    pub entries: Vec<EntryLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryLine {
    pub player_ref: DocumentRef,
    pub type_ref: DocumentRef,
}
