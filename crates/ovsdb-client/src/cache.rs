//! In-memory replica of monitored tables.
//!
//! The cache is fed exclusively by monitor replies and `update`
//! notifications (RFC 7047 §4.1.6). Each applied row update is reported as
//! a [`RowEvent`].

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::error::{OvsDbError, Result};

/// Column name to value.
pub type Row = Map<String, Value>;

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

/// A change to one row of a monitored table.
///
/// For `Added` and `Modified` the row is the full row after the change; for
/// `Deleted` it is the last known row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowEvent {
    pub table: String,
    pub uuid: String,
    pub kind: EventKind,
    pub row: Row,
}

#[derive(Debug, Default)]
pub struct TableCache {
    tables: HashMap<String, BTreeMap<String, Row>>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all rows of `table`, keyed by uuid.
    pub fn rows(&self, table: &str) -> Vec<(String, Row)> {
        self.tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(uuid, row)| (uuid.clone(), row.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, table: &str, uuid: &str) -> Option<&Row> {
        self.tables.get(table).and_then(|rows| rows.get(uuid))
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }

    /// Applies a `<table-updates>` object and returns the resulting events.
    ///
    /// Within each `<row-update>`, `old` alone is a delete, `new` alone is an
    /// insert, and both is a modification where `new` holds the monitored
    /// columns after the change.
    pub fn apply_table_updates(&mut self, updates: &Value) -> Result<Vec<RowEvent>> {
        let tables = updates
            .as_object()
            .ok_or_else(|| OvsDbError::invalid_reply("table updates", updates))?;

        let mut events = Vec::new();
        for (table, row_updates) in tables {
            let row_updates = row_updates
                .as_object()
                .ok_or_else(|| OvsDbError::invalid_reply(format!("{table} updates"), row_updates))?;
            let cached = self.tables.entry(table.clone()).or_default();

            for (uuid, update) in row_updates {
                let old = update.get("old").and_then(Value::as_object);
                let new = update.get("new").and_then(Value::as_object);

                let event = match (old, new) {
                    (_, Some(new)) => {
                        let kind = if cached.contains_key(uuid) {
                            EventKind::Modified
                        } else {
                            EventKind::Added
                        };
                        let row = cached.entry(uuid.clone()).or_default();
                        for (column, value) in new {
                            row.insert(column.clone(), value.clone());
                        }
                        RowEvent {
                            table: table.clone(),
                            uuid: uuid.clone(),
                            kind,
                            row: row.clone(),
                        }
                    }
                    (Some(old), None) => {
                        let row = cached.remove(uuid).unwrap_or_else(|| old.clone());
                        RowEvent {
                            table: table.clone(),
                            uuid: uuid.clone(),
                            kind: EventKind::Deleted,
                            row,
                        }
                    }
                    (None, None) => {
                        tracing::warn!(%table, %uuid, "Ignoring empty row update");
                        continue;
                    }
                };
                events.push(event);
            }
        }
        Ok(events)
    }
}
