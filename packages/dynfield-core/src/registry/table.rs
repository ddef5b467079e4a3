//! Field definition table, its lookup index and per-page snapshots.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FieldError;
use crate::formula::{self, Expr};

use super::field::{FieldDefinition, FieldId, FieldType};

/// Columns every field-definition row carries.
pub const FIELD_BASE_COLUMNS: [&str; 12] = [
    "id",
    "name",
    "label",
    "type",
    "page_type",
    "options",
    "calculation_formula",
    "dependent_fields",
    "is_required",
    "display_order",
    "default_value",
    "created_at",
];

/// Column added to a table by a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Value given to rows that existed before the column
    #[serde(default)]
    pub default: serde_json::Value,
}

impl ColumnDef {
    pub fn new(name: &str, default: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            default,
        }
    }
}

/// Field definition storage.
///
/// `index` is `None` only between a migration swap and the index rebuild.
#[derive(Debug, Clone)]
pub struct FieldTable {
    /// Type constraint applied to new definitions
    pub(crate) allowed_types: BTreeSet<FieldType>,
    /// Columns added by migrations
    pub(crate) columns: Vec<ColumnDef>,
    /// Rows keyed by id
    pub(crate) rows: BTreeMap<FieldId, FieldDefinition>,
    /// Next field id to assign
    pub(crate) next_id: FieldId,
    pub(crate) index: Option<Arc<FieldIndex>>,
}

impl FieldTable {
    /// Creates an empty, indexed table with the given type constraint.
    pub fn new(allowed_types: BTreeSet<FieldType>) -> Self {
        Self {
            allowed_types,
            columns: Vec::new(),
            rows: BTreeMap::new(),
            next_id: 1, // Start IDs at 1
            index: Some(Arc::new(FieldIndex::default())),
        }
    }

    /// Creates an empty, unindexed shadow with a new constraint and column set.
    pub(crate) fn shadow(
        allowed_types: BTreeSet<FieldType>,
        columns: Vec<ColumnDef>,
        next_id: FieldId,
    ) -> Self {
        Self {
            allowed_types,
            columns,
            rows: BTreeMap::new(),
            next_id,
            index: None,
        }
    }

    pub fn allowed_types(&self) -> &BTreeSet<FieldType> {
        &self.allowed_types
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn rows(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.rows.values()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns the lookup index.
    pub(crate) fn index(&self) -> Result<&FieldIndex, FieldError> {
        self.index
            .as_deref()
            .ok_or_else(|| FieldError::InternalConsistency {
                page_type: "*".to_string(),
                reason: "field indexes are not built".to_string(),
            })
    }

    /// Rebuilds the lookup index from the current rows.
    pub(crate) fn reindex(&mut self) -> Result<(), FieldError> {
        self.index = Some(Arc::new(FieldIndex::build(&self.rows)?));
        Ok(())
    }

    /// Looks up a definition by page type and name.
    pub fn find(&self, page_type: &str, name: &str) -> Option<&FieldDefinition> {
        let id = self.index.as_ref()?.lookup(page_type, name)?;
        self.rows.get(&id)
    }

    /// Builds the snapshot of one page type used by the record store and engine.
    ///
    /// A page type without definitions yields an empty schema.
    pub fn page_schema(&self, page_type: &str) -> Result<PageSchema, FieldError> {
        let index = self.index()?;
        let mut schema = PageSchema {
            page_type: page_type.to_string(),
            fields: BTreeMap::new(),
            formulas: HashMap::new(),
        };

        if let Some(ids) = index.page(page_type) {
            for (name, id) in ids {
                let field = self.rows.get(id).ok_or_else(|| FieldError::InternalConsistency {
                    page_type: page_type.to_string(),
                    reason: format!("index points at missing field id {}", id),
                })?;
                if let Some(expr) = index.formula(*id) {
                    schema.formulas.insert(name.clone(), Arc::clone(expr));
                }
                schema.fields.insert(name.clone(), field.clone());
            }
        }

        Ok(schema)
    }
}

/// Unique `(page_type, name)` index plus the compiled formula cache.
#[derive(Debug, Default)]
pub(crate) struct FieldIndex {
    by_name: HashMap<String, BTreeMap<String, FieldId>>,
    formulas: HashMap<FieldId, Arc<Expr>>,
}

impl FieldIndex {
    /// Builds the index, enforcing uniqueness of `(page_type, name)`.
    ///
    /// Formulas that fail to parse are left out of the cache; evaluating
    /// such a field reports an internal consistency fault.
    pub(crate) fn build(rows: &BTreeMap<FieldId, FieldDefinition>) -> Result<Self, FieldError> {
        let mut index = FieldIndex::default();

        for field in rows.values() {
            let names = index.by_name.entry(field.page_type.clone()).or_default();
            if names.insert(field.name.clone(), field.id).is_some() {
                return Err(FieldError::DuplicateFieldName {
                    page_type: field.page_type.clone(),
                    name: field.name.clone(),
                });
            }

            if let Some(source) = &field.calculation_formula {
                match formula::parse(source) {
                    Ok(expr) => {
                        index.formulas.insert(field.id, Arc::new(expr));
                    }
                    Err(e) => {
                        tracing::warn!(
                            page_type = %field.page_type,
                            field = %field.name,
                            "Stored formula does not parse: {}",
                            e
                        );
                    }
                }
            }
        }

        Ok(index)
    }

    pub(crate) fn lookup(&self, page_type: &str, name: &str) -> Option<FieldId> {
        self.by_name.get(page_type)?.get(name).copied()
    }

    pub(crate) fn page(&self, page_type: &str) -> Option<&BTreeMap<String, FieldId>> {
        self.by_name.get(page_type).filter(|names| !names.is_empty())
    }

    pub(crate) fn formula(&self, id: FieldId) -> Option<&Arc<Expr>> {
        self.formulas.get(&id)
    }

    pub(crate) fn page_types(&self) -> impl Iterator<Item = &String> {
        self.by_name
            .iter()
            .filter(|(_, names)| !names.is_empty())
            .map(|(page_type, _)| page_type)
    }
}

/// Definitions of one page type, keyed by name, with compiled formulas.
#[derive(Debug, Clone)]
pub struct PageSchema {
    pub page_type: String,
    pub fields: BTreeMap<String, FieldDefinition>,
    formulas: HashMap<String, Arc<Expr>>,
}

impl PageSchema {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    /// Looks up a definition by id.
    pub fn field_by_id(&self, id: FieldId) -> Option<&FieldDefinition> {
        self.fields.values().find(|f| f.id == id)
    }

    /// Compiled formula of a calculated field.
    pub fn formula(&self, name: &str) -> Option<&Expr> {
        self.formulas.get(name).map(|expr| expr.as_ref())
    }

    /// Calculated fields ordered by name.
    pub fn calculated(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.values().filter(|f| f.is_calculated())
    }
}
