//! Record table holding document rows.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::{ColumnDef, ParseEnumError};

/// Columns every document row carries.
pub const RECORD_BASE_COLUMNS: [&str; 5] = ["id", "page_type", "record_data", "created_at", "updated_at"];

/// On-disk shape of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLayout {
    /// One row per record with all values in `record_data`
    Document,
    /// One `(record_id, field_id, value)` row per stored value
    Eav,
}

impl FromStr for RecordLayout {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" => Ok(RecordLayout::Document),
            "eav" => Ok(RecordLayout::Eav),
            _ => Err(ParseEnumError {
                kind: "record layout",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for RecordLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordLayout::Document => f.write_str("document"),
            RecordLayout::Eav => f.write_str("eav"),
        }
    }
}

/// Primary key of a record row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub page_type: String,
    pub record_id: u64,
}

impl RecordKey {
    pub fn new(page_type: &str, record_id: u64) -> Self {
        Self {
            page_type: page_type.to_string(),
            record_id,
        }
    }
}

/// Stored document row.
///
/// `record_data` keeps values written under names whose definition has
/// since been deleted, until the name is defined again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRow {
    pub id: u64,
    pub page_type: String,
    pub record_data: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Values of columns added by migrations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DocumentRow {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.page_type, self.id)
    }
}

/// Record storage keyed by `(page_type, record_id)`.
#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    /// Columns added by migrations
    pub(crate) columns: Vec<ColumnDef>,
    pub(crate) rows: BTreeMap<RecordKey, DocumentRow>,
}

impl RecordTable {
    /// Creates an empty shadow with the given column set.
    pub(crate) fn shadow(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            rows: BTreeMap::new(),
        }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn rows(&self) -> impl Iterator<Item = &DocumentRow> {
        self.rows.values()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows of one page type ordered by id.
    pub(crate) fn page_rows<'a>(&'a self, page_type: &'a str) -> impl Iterator<Item = &'a DocumentRow> + 'a {
        self.rows
            .range(RecordKey::new(page_type, 0)..=RecordKey::new(page_type, u64::MAX))
            .map(|(_, row)| row)
    }

    /// Removes values stored under `name` from every row of a page type.
    ///
    /// Returns the number of rows that held a value.
    pub(crate) fn purge_values(&mut self, page_type: &str, name: &str) -> usize {
        self.rows
            .range_mut(RecordKey::new(page_type, 0)..=RecordKey::new(page_type, u64::MAX))
            .filter_map(|(_, row)| row.record_data.remove(name))
            .count()
    }

    /// Column defaults applied to newly created rows.
    pub(crate) fn column_defaults(&self) -> BTreeMap<String, serde_json::Value> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.default.clone()))
            .collect()
    }
}
