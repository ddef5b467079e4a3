//! Record store: typed, validated record values per page type.

mod codec;
mod table;
mod value;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::engine::DerivedValueEngine;
use crate::error::FieldError;
use crate::registry::PageSchema;
use crate::store::Store;

pub use codec::{decode_document, encode_document, from_eav, to_eav, EavRow};
pub use table::{DocumentRow, RecordKey, RecordLayout, RecordTable, RECORD_BASE_COLUMNS};
pub use value::{coerce, FieldValue, DATE_FORMAT};

/// Record as seen by callers: only values of live definitions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: u64,
    pub page_type: String,
    pub values: BTreeMap<String, FieldValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl Record {
    pub(crate) fn from_row(row: &DocumentRow, schema: &PageSchema) -> Self {
        Self {
            id: row.id,
            page_type: row.page_type.clone(),
            values: decode_document(&row.record_data, schema),
            created_at: row.created_at,
            updated_at: row.updated_at,
            extra: row.extra.clone(),
        }
    }

    /// Value of a field, if set.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }
}

/// Record reads and writes with type validation and derived values.
#[derive(Debug, Clone)]
pub struct RecordStore {
    store: Arc<Store>,
    engine: DerivedValueEngine,
}

impl RecordStore {
    /// Creates a record store over the given store.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            engine: DerivedValueEngine::new(),
        }
    }

    fn schema(&self, page_type: &str) -> Result<PageSchema, FieldError> {
        let schema = self.store.fields().page_schema(page_type)?;
        if schema.is_empty() {
            return Err(FieldError::UnknownPageType {
                page_type: page_type.to_string(),
            });
        }
        Ok(schema)
    }

    /// Writes values of a record, creating it if needed.
    ///
    /// Values merge onto the stored record; `null` or a blank string
    /// clears a value. Calculated fields affected by the write are
    /// recomputed before the record is committed. On any error the stored
    /// record is unchanged.
    ///
    /// # Arguments
    /// * `page_type` - Page type of the record
    /// * `record_id` - Caller-supplied record id
    /// * `values` - Raw values keyed by field name
    ///
    /// # Returns
    /// `Result<Record, FieldError>` containing the committed record.
    pub fn upsert(
        &self,
        page_type: &str,
        record_id: u64,
        values: BTreeMap<String, Value>,
    ) -> Result<Record, FieldError> {
        let _shared = self.store.shared()?;
        let schema = self.schema(page_type)?;

        // Validate every value before touching storage
        let mut changes: BTreeMap<String, Option<FieldValue>> = BTreeMap::new();
        for (name, raw) in &values {
            let field = schema.field(name).ok_or_else(|| FieldError::UnknownField {
                page_type: page_type.to_string(),
                name: name.clone(),
            })?;
            changes.insert(name.clone(), coerce(field, raw)?);
        }

        let mut records = self
            .store
            .records()
            .write()
            .map_err(|_| FieldError::LockPoisoned)?;

        let key = RecordKey::new(page_type, record_id);
        let existing = records.rows.get(&key);
        let mut current = existing
            .map(|row| decode_document(&row.record_data, &schema))
            .unwrap_or_default();

        let touched: BTreeSet<String> = changes.keys().cloned().collect();
        for (name, change) in changes {
            match change {
                Some(value) => {
                    current.insert(name, value);
                }
                None => {
                    current.remove(&name);
                }
            }
        }

        for field in schema.fields.values() {
            if !field.is_required || field.is_calculated() {
                continue;
            }
            if matches!(current.get(&field.name), None | Some(FieldValue::Undefined)) {
                return Err(FieldError::RequiredFieldMissing {
                    page_type: page_type.to_string(),
                    name: field.name.clone(),
                });
            }
        }

        let recomputed = self.engine.recompute(&schema, &mut current, Some(&touched))?;

        let now = Utc::now();
        let row = match existing {
            Some(row) => {
                let mut row = row.clone();
                encode_document(&current, &schema, &mut row.record_data);
                row.updated_at = now;
                row
            }
            None => {
                let mut record_data = serde_json::Map::new();
                encode_document(&current, &schema, &mut record_data);
                DocumentRow {
                    id: record_id,
                    page_type: page_type.to_string(),
                    record_data,
                    created_at: now,
                    updated_at: now,
                    extra: records.column_defaults(),
                }
            }
        };

        let record = Record::from_row(&row, &schema);
        records.rows.insert(key, row);

        tracing::debug!(
            page_type,
            record_id,
            written = ?touched,
            ?recomputed,
            "Record upserted"
        );
        Ok(record)
    }

    /// Reads a record.
    pub fn get(&self, page_type: &str, record_id: u64) -> Result<Record, FieldError> {
        let _shared = self.store.shared()?;
        let schema = self.store.fields().page_schema(page_type)?;
        let records = self
            .store
            .records()
            .read()
            .map_err(|_| FieldError::LockPoisoned)?;

        records
            .rows
            .get(&RecordKey::new(page_type, record_id))
            .map(|row| Record::from_row(row, &schema))
            .ok_or_else(|| FieldError::RecordNotFound {
                page_type: page_type.to_string(),
                record_id,
            })
    }

    /// Deletes a record.
    pub fn delete(&self, page_type: &str, record_id: u64) -> Result<(), FieldError> {
        let _shared = self.store.shared()?;
        let mut records = self
            .store
            .records()
            .write()
            .map_err(|_| FieldError::LockPoisoned)?;

        records
            .rows
            .remove(&RecordKey::new(page_type, record_id))
            .ok_or_else(|| FieldError::RecordNotFound {
                page_type: page_type.to_string(),
                record_id,
            })?;

        tracing::debug!(page_type, record_id, "Record deleted");
        Ok(())
    }

    /// Lists the records of a page type ordered by id.
    pub fn list(&self, page_type: &str) -> Result<Vec<Record>, FieldError> {
        let _shared = self.store.shared()?;
        let schema = self.store.fields().page_schema(page_type)?;
        let records = self
            .store
            .records()
            .read()
            .map_err(|_| FieldError::LockPoisoned)?;

        Ok(records
            .page_rows(page_type)
            .map(|row| Record::from_row(row, &schema))
            .collect())
    }

    /// Recomputes every calculated field of every record of a page type.
    ///
    /// Used to backfill records after a calculated field is defined or a
    /// dependency is deleted. All records are evaluated before any is
    /// committed.
    ///
    /// # Returns
    /// `Result<usize, FieldError>` with the number of records whose values changed.
    pub fn recompute_page(&self, page_type: &str) -> Result<usize, FieldError> {
        let _shared = self.store.shared()?;
        let schema = self.schema(page_type)?;
        let mut records = self
            .store
            .records()
            .write()
            .map_err(|_| FieldError::LockPoisoned)?;

        let now = Utc::now();
        let mut rewritten = Vec::new();
        for row in records.page_rows(page_type) {
            let mut values = decode_document(&row.record_data, &schema);
            let changed = self.engine.recompute(&schema, &mut values, None)?;
            if changed.is_empty() {
                continue;
            }
            let mut row = row.clone();
            encode_document(&values, &schema, &mut row.record_data);
            row.updated_at = now;
            rewritten.push(row);
        }

        let count = rewritten.len();
        for row in rewritten {
            records.rows.insert(row.key(), row);
        }

        tracing::info!(page_type, records = count, "Calculated fields recomputed");
        Ok(count)
    }
}
