//! Field definition registry scoped by page type.

mod field;
mod table;
pub(crate) mod validation;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;

use crate::error::FieldError;
use crate::store::Store;

pub use field::{FieldDefinition, FieldId, FieldType, NewField, ParseEnumError};
pub(crate) use table::FieldIndex;
pub use table::{ColumnDef, FieldTable, PageSchema, FIELD_BASE_COLUMNS};

/// Catalog of field definitions.
///
/// Definition changes are all-or-nothing: on error the registry is left
/// exactly as it was.
#[derive(Debug, Clone)]
pub struct FieldDefinitionRegistry {
    store: Arc<Store>,
}

impl FieldDefinitionRegistry {
    /// Creates a registry over the given store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Defines a single field.
    ///
    /// # Arguments
    /// * `field` - Definition request
    ///
    /// # Returns
    /// `Result<FieldDefinition, FieldError>` containing the stored definition.
    pub fn define(&self, field: NewField) -> Result<FieldDefinition, FieldError> {
        let page_type = field.page_type.clone();
        self.define_all(vec![field])?
            .pop()
            .ok_or(FieldError::InternalConsistency {
                page_type,
                reason: "definition batch returned no field".to_string(),
            })
    }

    /// Defines several fields atomically.
    ///
    /// Calculated fields in the batch may depend on each other regardless of
    /// their order in `fields`.
    ///
    /// # Arguments
    /// * `fields` - Definition requests
    ///
    /// # Returns
    /// `Result<Vec<FieldDefinition>, FieldError>` with the stored definitions in request order.
    pub fn define_all(&self, fields: Vec<NewField>) -> Result<Vec<FieldDefinition>, FieldError> {
        let _shared = self.store.shared()?;
        let _writer = self.store.field_writer()?;

        let current = self.store.fields();
        let mut table = (*current).clone();
        let created_at = Utc::now();

        let mut staged = Vec::with_capacity(fields.len());
        let mut batch_names = HashSet::new();

        for field in fields {
            validation::validate_shape(&field, &table.allowed_types)?;

            let key = (field.page_type.clone(), field.name.clone());
            if table.find(&field.page_type, &field.name).is_some() || !batch_names.insert(key) {
                return Err(FieldError::DuplicateFieldName {
                    page_type: field.page_type,
                    name: field.name,
                });
            }

            let extra = table
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.default.clone()))
                .collect();
            let id = table.next_id;
            table.next_id += 1;
            table
                .rows
                .insert(id, field.into_definition(id, created_at, extra));
            staged.push(id);
        }

        // Dependencies are checked once the whole batch is staged
        for id in &staged {
            let Some(field) = table.rows.get(id) else {
                continue;
            };
            if !field.is_calculated() {
                continue;
            }
            let page_fields: BTreeMap<&str, &FieldDefinition> = table
                .rows
                .values()
                .filter(|f| f.page_type == field.page_type)
                .map(|f| (f.name.as_str(), f))
                .collect();
            validation::validate_dependencies(field, &page_fields)?;
        }

        table.reindex()?;

        let defined: Vec<FieldDefinition> = staged
            .iter()
            .filter_map(|id| table.rows.get(id).cloned())
            .collect();

        // Values left behind by a deleted field of the same name are dropped
        // before the new definition becomes visible
        let mut records = self
            .store
            .records()
            .write()
            .map_err(|_| FieldError::LockPoisoned)?;
        for field in &defined {
            let purged = records.purge_values(&field.page_type, &field.name);
            if purged > 0 {
                tracing::warn!(
                    page_type = %field.page_type,
                    field = %field.name,
                    records = purged,
                    "Dropped values of a previously deleted field with the same name"
                );
            }
        }
        self.store.publish_fields(table);
        drop(records);

        for field in &defined {
            tracing::info!(
                page_type = %field.page_type,
                field = %field.name,
                field_type = %field.field_type,
                id = field.id,
                "Field defined"
            );
        }

        Ok(defined)
    }

    /// Lists the fields of a page type ordered by `display_order`, then id.
    pub fn list_fields(&self, page_type: &str) -> Result<Vec<FieldDefinition>, FieldError> {
        let _shared = self.store.shared()?;
        let table = self.store.fields();
        let mut fields: Vec<FieldDefinition> = table
            .rows
            .values()
            .filter(|f| f.page_type == page_type)
            .cloned()
            .collect();
        fields.sort_by_key(|f| (f.display_order, f.id));
        Ok(fields)
    }

    /// Returns the fields of a page type keyed by name.
    pub fn fields_by_name(
        &self,
        page_type: &str,
    ) -> Result<BTreeMap<String, FieldDefinition>, FieldError> {
        Ok(self.page_schema(page_type)?.fields)
    }

    /// Returns the snapshot of a page type with compiled formulas.
    pub fn page_schema(&self, page_type: &str) -> Result<PageSchema, FieldError> {
        let _shared = self.store.shared()?;
        self.store.fields().page_schema(page_type)
    }

    /// Deletes a field definition.
    ///
    /// Stored record values of the field are kept as dead data until the
    /// name is defined again; calculated fields that depended on it
    /// evaluate it as missing from then on.
    ///
    /// # Arguments
    /// * `page_type` - Page type of the field
    /// * `name` - Field name
    ///
    /// # Returns
    /// `Result<FieldDefinition, FieldError>` containing the removed definition.
    pub fn delete(&self, page_type: &str, name: &str) -> Result<FieldDefinition, FieldError> {
        let _shared = self.store.shared()?;
        let _writer = self.store.field_writer()?;

        let current = self.store.fields();
        let id = current
            .index()?
            .lookup(page_type, name)
            .ok_or_else(|| FieldError::FieldNotFound {
                page_type: page_type.to_string(),
                name: name.to_string(),
            })?;

        let mut table = (*current).clone();
        let removed = table
            .rows
            .remove(&id)
            .ok_or_else(|| FieldError::InternalConsistency {
                page_type: page_type.to_string(),
                reason: format!("index points at missing field id {}", id),
            })?;

        let dependents: Vec<String> = table
            .rows
            .values()
            .filter(|f| f.page_type == page_type && f.dependent_fields.iter().any(|d| d == name))
            .map(|f| f.name.clone())
            .collect();
        if !dependents.is_empty() {
            tracing::warn!(
                page_type,
                field = name,
                ?dependents,
                "Deleted field is still a dependency of calculated fields"
            );
        }

        table.reindex()?;
        self.store.publish_fields(table);

        tracing::info!(page_type, field = name, id, "Field deleted");
        Ok(removed)
    }

    /// Returns every page type that has at least one field.
    pub fn page_types(&self) -> Result<Vec<String>, FieldError> {
        let _shared = self.store.shared()?;
        let table = self.store.fields();
        let mut page_types: Vec<String> = table.index()?.page_types().cloned().collect();
        page_types.sort();
        Ok(page_types)
    }

    /// Returns the current type constraint.
    pub fn allowed_types(&self) -> Result<BTreeSet<FieldType>, FieldError> {
        let _shared = self.store.shared()?;
        Ok(self.store.fields().allowed_types.clone())
    }
}
