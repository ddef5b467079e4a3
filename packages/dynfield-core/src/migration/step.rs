//! Migration step description.

use serde::{Deserialize, Serialize};

use crate::registry::{ColumnDef, FieldType};

/// Changes the declared type of matching field definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRewrite {
    pub from: FieldType,
    pub to: FieldType,
}

/// One schema migration step.
///
/// A step may widen or narrow the type constraint, rewrite the type of
/// existing definitions and add columns to the field-definition and record
/// tables. Existing rows are never dropped or renamed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationStep {
    /// Unique step name, recorded in the migration history
    pub name: String,
    /// Restricts rewrites to one page type
    pub page_type: Option<String>,
    /// Types added to the constraint
    pub add_types: Vec<FieldType>,
    /// Types removed from the constraint; existing rows keep their type
    pub remove_types: Vec<FieldType>,
    pub rewrites: Vec<TypeRewrite>,
    /// Columns added to the field-definition table
    pub field_columns: Vec<ColumnDef>,
    /// Columns added to the record table
    pub record_columns: Vec<ColumnDef>,
}

impl MigrationStep {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn add_type(mut self, field_type: FieldType) -> Self {
        self.add_types.push(field_type);
        self
    }

    pub fn remove_type(mut self, field_type: FieldType) -> Self {
        self.remove_types.push(field_type);
        self
    }

    pub fn rewrite(mut self, from: FieldType, to: FieldType) -> Self {
        self.rewrites.push(TypeRewrite { from, to });
        self
    }

    pub fn scoped_to(mut self, page_type: &str) -> Self {
        self.page_type = Some(page_type.to_string());
        self
    }

    pub fn field_column(mut self, column: ColumnDef) -> Self {
        self.field_columns.push(column);
        self
    }

    pub fn record_column(mut self, column: ColumnDef) -> Self {
        self.record_columns.push(column);
        self
    }

    /// Returns true if the step changes nothing.
    pub fn is_empty(&self) -> bool {
        self.add_types.is_empty()
            && self.remove_types.is_empty()
            && self.rewrites.is_empty()
            && self.field_columns.is_empty()
            && self.record_columns.is_empty()
    }

    /// Returns true if the step only rewrites types.
    pub(crate) fn is_rewrite_only(&self) -> bool {
        !self.rewrites.is_empty()
            && self.add_types.is_empty()
            && self.remove_types.is_empty()
            && self.field_columns.is_empty()
            && self.record_columns.is_empty()
    }
}
