//! On-disk formats.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FieldError;
use crate::migration::MigrationRecord;
use crate::records::{DocumentRow, EavRow, RecordLayout};
use crate::registry::{ColumnDef, FieldDefinition, FieldId, FieldType};

/// Current schema file version.
pub const SCHEMA_VERSION: u32 = 1;

/// Schema file name inside the data directory.
pub const SCHEMA_FILE: &str = "schema.json";

/// Record file name inside `data/`.
pub const RECORDS_FILE: &str = "records.json";

/// Schema file format.
#[derive(Debug, Serialize, Deserialize)]
pub struct SchemaFile {
    /// Schema version
    pub version: u32,
    /// Current type constraint
    pub allowed_types: BTreeSet<FieldType>,
    /// Columns added to the field-definition table by migrations
    #[serde(default)]
    pub field_columns: Vec<ColumnDef>,
    /// Columns added to the record table by migrations
    #[serde(default)]
    pub record_columns: Vec<ColumnDef>,
    /// Next field id to assign
    pub next_field_id: FieldId,
    /// Field-definition rows ordered by id
    pub fields: Vec<FieldRow>,
    /// Shape of the record file
    pub record_layout: RecordLayout,
    /// Data file checksums for corruption detection
    #[serde(default)]
    pub checksums: BTreeMap<String, u32>,
    /// Applied migration steps, oldest first
    #[serde(default)]
    pub migrations: Vec<MigrationRecord>,
}

/// Field-definition row.
///
/// `options` and `dependent_fields` are JSON arrays of strings kept as
/// text; migration-added columns are flattened into the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRow {
    pub id: FieldId,
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub page_type: String,
    pub options: Option<String>,
    pub calculation_formula: Option<String>,
    pub dependent_fields: Option<String>,
    pub is_required: bool,
    pub display_order: i64,
    pub default_value: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn encode_list(list: &[String]) -> Result<Option<String>, FieldError> {
    if list.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(list)
        .map(Some)
        .map_err(|e| FieldError::SerializationError(e.to_string()))
}

fn decode_list(text: Option<&str>, column: &str, row: &FieldRow) -> Result<Vec<String>, FieldError> {
    match text {
        None => Ok(Vec::new()),
        Some(text) if text.trim().is_empty() => Ok(Vec::new()),
        Some(text) => serde_json::from_str(text).map_err(|e| {
            FieldError::SerializationError(format!(
                "Column '{}' of field '{}' (page type '{}') is not a JSON string array: {}",
                column, row.name, row.page_type, e
            ))
        }),
    }
}

impl FieldRow {
    /// Encodes a definition as a stored row.
    pub fn from_definition(field: &FieldDefinition) -> Result<Self, FieldError> {
        Ok(Self {
            id: field.id,
            name: field.name.clone(),
            label: field.label.clone(),
            field_type: field.field_type,
            page_type: field.page_type.clone(),
            options: encode_list(&field.options)?,
            calculation_formula: field.calculation_formula.clone(),
            dependent_fields: encode_list(&field.dependent_fields)?,
            is_required: field.is_required,
            display_order: field.display_order,
            default_value: field.default_value.clone(),
            created_at: field.created_at,
            extra: field.extra.clone(),
        })
    }

    /// Decodes a stored row.
    pub fn into_definition(self) -> Result<FieldDefinition, FieldError> {
        let options = decode_list(self.options.as_deref(), "options", &self)?;
        let dependent_fields = decode_list(self.dependent_fields.as_deref(), "dependent_fields", &self)?;
        Ok(FieldDefinition {
            id: self.id,
            name: self.name,
            label: self.label,
            field_type: self.field_type,
            page_type: self.page_type,
            options,
            calculation_formula: self.calculation_formula,
            dependent_fields,
            is_required: self.is_required,
            display_order: self.display_order,
            default_value: self.default_value,
            created_at: self.created_at,
            extra: self.extra,
        })
    }
}

/// Record-level columns kept alongside EAV value rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHead {
    pub page_type: String,
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Record file format, tagged with its layout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "lowercase")]
pub enum RecordsFile {
    Document {
        rows: Vec<DocumentRow>,
    },
    Eav {
        records: Vec<RecordHead>,
        values: Vec<EavRow>,
    },
}
