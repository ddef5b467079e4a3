//! Shadow table population and verification.

use crate::error::FieldError;
use crate::records::RecordTable;
use crate::registry::FieldTable;

use super::state::MigrationState;
use super::step::MigrationStep;

pub(crate) const FIELD_TABLE: &str = "field_definitions";
pub(crate) const RECORD_TABLE: &str = "records";

/// Copies every definition into the shadow, rewriting matching types.
///
/// # Returns
/// `page_type.name` of every rewritten definition.
pub(crate) fn copy_fields(
    step: &MigrationStep,
    source: &FieldTable,
    shadow: &mut FieldTable,
) -> Vec<String> {
    let mut rewritten = Vec::new();

    for (id, field) in &source.rows {
        let mut row = field.clone();

        let in_scope = step
            .page_type
            .as_deref()
            .map_or(true, |page_type| page_type == row.page_type);
        if in_scope {
            if let Some(rewrite) = step.rewrites.iter().find(|r| r.from == row.field_type) {
                row.field_type = rewrite.to;
                rewritten.push(format!("{}.{}", row.page_type, row.name));
            }
        }

        for column in &shadow.columns {
            row.extra
                .entry(column.name.clone())
                .or_insert_with(|| column.default.clone());
        }

        shadow.rows.insert(*id, row);
    }

    rewritten
}

/// Copies every record row into the shadow.
pub(crate) fn copy_records(source: &RecordTable, shadow: &mut RecordTable) {
    for (key, row) in &source.rows {
        let mut row = row.clone();
        for column in &shadow.columns {
            row.extra
                .entry(column.name.clone())
                .or_insert_with(|| column.default.clone());
        }
        shadow.rows.insert(key.clone(), row);
    }
}

/// Checks that both shadows hold exactly the rows of their sources.
///
/// # Arguments
/// * `migration` - Step name used in errors
/// * `state` - Last state reached, reported on an id-set mismatch
///
/// # Returns
/// `MigrationRowCountMismatch` on a count difference, `MigrationFailed` if
/// the counts agree but the id sets do not.
pub(crate) fn verify(
    migration: &str,
    state: MigrationState,
    fields: (&FieldTable, &FieldTable),
    records: (&RecordTable, &RecordTable),
) -> Result<(), FieldError> {
    let (source_fields, shadow_fields) = fields;
    let (source_records, shadow_records) = records;

    let mismatch = |table: &str, expected: usize, actual: usize| FieldError::MigrationRowCountMismatch {
        migration: migration.to_string(),
        table: table.to_string(),
        expected,
        actual,
    };

    if source_fields.rows.len() != shadow_fields.rows.len() {
        return Err(mismatch(
            FIELD_TABLE,
            source_fields.rows.len(),
            shadow_fields.rows.len(),
        ));
    }
    if source_records.rows.len() != shadow_records.rows.len() {
        return Err(mismatch(
            RECORD_TABLE,
            source_records.rows.len(),
            shadow_records.rows.len(),
        ));
    }

    let field_ids_match = source_fields.rows.keys().eq(shadow_fields.rows.keys());
    let record_ids_match = source_records.rows.keys().eq(shadow_records.rows.keys());

    if !field_ids_match || !record_ids_match {
        let table = if field_ids_match { RECORD_TABLE } else { FIELD_TABLE };
        return Err(FieldError::MigrationFailed {
            migration: migration.to_string(),
            state,
            reason: format!("shadow '{}' holds a different id set than its source", table),
        });
    }

    Ok(())
}
