//! Conversion between document rows and entity-attribute-value rows.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FieldError;
use crate::registry::{FieldId, PageSchema};

use super::value::FieldValue;

/// Legacy record row, unique on `(record_id, field_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EavRow {
    pub record_id: u64,
    pub field_id: FieldId,
    pub value: Option<String>,
}

/// Decodes the live values of a document.
///
/// Names without a definition in `schema` are skipped; they stay in the
/// stored document untouched. A calculated field only ever surfaces a
/// number or the undefined marker.
pub fn decode_document(data: &Map<String, Value>, schema: &PageSchema) -> BTreeMap<String, FieldValue> {
    data.iter()
        .filter_map(|(name, raw)| {
            let field = schema.field(name)?;
            let value = FieldValue::from_json(field.field_type, raw);
            if field.is_calculated() && !value.is_engine_output() {
                return None;
            }
            Some((name.clone(), value))
        })
        .collect()
}

/// Writes the live values of `values` into `data`.
///
/// Live names missing from `values` are removed; keys of deleted fields
/// are preserved.
pub fn encode_document(
    values: &BTreeMap<String, FieldValue>,
    schema: &PageSchema,
    data: &mut Map<String, Value>,
) {
    for name in schema.fields.keys() {
        match values.get(name) {
            Some(value) => {
                data.insert(name.clone(), value.to_json());
            }
            None => {
                data.remove(name);
            }
        }
    }
}

/// Converts the values of one record to EAV rows ordered by field id.
///
/// # Arguments
/// * `record_id` - Record identifier
/// * `values` - Values keyed by field name
/// * `schema` - Definitions of the record's page type
///
/// # Returns
/// `Result<Vec<EavRow>, FieldError>`; `UnknownField` if a value has no live definition.
pub fn to_eav(
    record_id: u64,
    values: &BTreeMap<String, FieldValue>,
    schema: &PageSchema,
) -> Result<Vec<EavRow>, FieldError> {
    let mut rows = Vec::with_capacity(values.len());
    for (name, value) in values {
        let field = schema.field(name).ok_or_else(|| FieldError::UnknownField {
            page_type: schema.page_type.clone(),
            name: name.clone(),
        })?;
        rows.push(EavRow {
            record_id,
            field_id: field.id,
            value: value.to_text(),
        });
    }
    rows.sort_by_key(|row| row.field_id);
    Ok(rows)
}

/// Rebuilds the values of one record from its EAV rows.
///
/// # Arguments
/// * `record_id` - Record identifier every row must carry
/// * `rows` - EAV rows of the record
/// * `schema` - Definitions of the record's page type
///
/// # Returns
/// `Result<BTreeMap<String, FieldValue>, FieldError>`; `DataCorruption` on a
/// foreign row, a repeated field id or a field id without a definition.
pub fn from_eav(
    record_id: u64,
    rows: &[EavRow],
    schema: &PageSchema,
) -> Result<BTreeMap<String, FieldValue>, FieldError> {
    let mut seen = BTreeSet::new();
    let mut values = BTreeMap::new();

    for row in rows {
        if row.record_id != record_id {
            return Err(FieldError::DataCorruption(format!(
                "EAV row of record {} grouped under record {}",
                row.record_id, record_id
            )));
        }
        if !seen.insert(row.field_id) {
            return Err(FieldError::DataCorruption(format!(
                "Record {} (page type '{}') has more than one value for field id {}",
                record_id, schema.page_type, row.field_id
            )));
        }

        let field = schema.field_by_id(row.field_id).ok_or_else(|| {
            FieldError::DataCorruption(format!(
                "Record {} (page type '{}') references unknown field id {}",
                record_id, schema.page_type, row.field_id
            ))
        })?;
        let value = FieldValue::from_text(field.field_type, row.value.as_deref());
        if field.is_calculated() && !value.is_engine_output() {
            continue;
        }
        values.insert(field.name.clone(), value);
    }

    Ok(values)
}
