use std::{collections::HashMap, fmt::Display};

use prettytable::{row, Table};
use rust_decimal::Decimal;
use serde::Serialize;
use time::Date;

use boter_core::DocumentRef;

use crate::{
    models::{Entry, FineType, Player},
    store::WithId,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FineLine {
    pub date: Date,
    pub fine_type: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSummary {
    #[serde(flatten)]
    pub player: WithId<Player>,
    pub total: Decimal,
    pub fines: Vec<FineLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Summary {
    pub players: Vec<PlayerSummary>,
    /// Entry lines whose player or fine type could not be resolved.
    pub unresolved: usize,
}

/// Joins entries to players and fine types and totals each player's fines.
///
/// Players keep the order of `players` among equal totals. Lines pointing at
/// a player missing from `players`, or at a type `resolve_type` cannot find,
/// are left out of every total and counted in [`Summary::unresolved`].
pub fn summarize<F>(players: &[WithId<Player>], entries: &[WithId<Entry>], mut resolve_type: F) -> Summary
where
    F: FnMut(&DocumentRef) -> Option<FineType>,
{
    let index: HashMap<&str, usize> = players.iter().enumerate().map(|(i, p)| (&*p.id, i)).collect();

    let mut rows: Vec<PlayerSummary> = players
        .iter()
        .map(|player| PlayerSummary {
            player: player.clone(),
            total: Decimal::ZERO,
            fines: Vec::new(),
        })
        .collect();
    let mut unresolved = 0;

    for entry in entries {
        for line in &entry.entries {
            let Some(&row) = index.get(line.player_ref.id()) else {
                unresolved += 1;
                continue;
            };
            let Some(fine_type) = resolve_type(&line.type_ref) else {
                unresolved += 1;
                continue;
            };

            let summary = &mut rows[row];
            summary.total += fine_type.amount;
            summary.fines.push(FineLine {
                date: entry.date,
                fine_type: fine_type.name,
                amount: fine_type.amount,
            });
        }
    }

    if unresolved > 0 {
        tracing::debug!(unresolved, "Entry lines left out of the summary");
    }

    rows.sort_by(|a, b| b.total.cmp(&a.total));

    Summary {
        players: rows,
        unresolved,
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Name", "Böter"]);
        table.add_empty_row();

        for player in &self.players {
            table.add_row(row![player.player.name, format!("{} kr", player.total)]);
        }

        write!(f, "\n{}\n", table)
    }
}

impl PlayerSummary {
    /// The player's fine history as a table.
    pub fn history(&self) -> String {
        let mut table = Table::new();
        table.add_row(row!["Datum", "Typ", "Böter"]);
        table.add_empty_row();

        for fine in &self.fines {
            table.add_row(row![fine.date, fine.fine_type, fine.amount]);
        }

        format!("\n{}\n", table)
    }
}
