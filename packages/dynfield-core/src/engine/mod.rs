//! Derived value engine.
//!
//! Evaluates calculated fields of one record in dependency order. Inputs
//! missing from the record fall back to the field's `default_value`, then
//! to zero. Undefined results (division by zero, non-finite arithmetic,
//! non-numeric inputs) propagate to every dependent field.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::FieldError;
use crate::records::FieldValue;
use crate::registry::PageSchema;

/// Stateless evaluator of calculated fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct DerivedValueEngine;

impl DerivedValueEngine {
    pub fn new() -> Self {
        Self
    }

    /// Orders the calculated fields of a page type so that every field comes
    /// after the calculated fields it depends on.
    ///
    /// Kahn's algorithm; fields that become ready together are taken by name.
    ///
    /// # Returns
    /// `Result<Vec<String>, FieldError>`; `InternalConsistency` if the stored
    /// definitions contain a cycle.
    pub fn evaluation_order(&self, schema: &PageSchema) -> Result<Vec<String>, FieldError> {
        let calculated: BTreeSet<&str> = schema.calculated().map(|f| f.name.as_str()).collect();

        let mut pending: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for field in schema.calculated() {
            let inputs: BTreeSet<&str> = field
                .dependent_fields
                .iter()
                .map(String::as_str)
                .filter(|d| calculated.contains(d))
                .collect();
            for input in &inputs {
                dependents.entry(*input).or_default().push(field.name.as_str());
            }
            pending.insert(field.name.as_str(), inputs.len());
        }

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(calculated.len());

        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() != calculated.len() {
            let stuck: Vec<&str> = calculated
                .iter()
                .copied()
                .filter(|name| !order.iter().any(|o| o.as_str() == *name))
                .collect();
            return Err(FieldError::InternalConsistency {
                page_type: schema.page_type.clone(),
                reason: format!("calculated fields form a cycle: {}", stuck.join(", ")),
            });
        }

        Ok(order)
    }

    /// Recomputes the affected calculated fields of one record in place.
    ///
    /// A field is affected when one of its dependencies changed or when it
    /// holds no engine-produced value (absent, or text left in the record).
    ///
    /// # Arguments
    /// * `schema` - Definitions of the record's page type
    /// * `values` - In-progress values of the record
    /// * `changed` - Names written by the caller; `None` recomputes every calculated field
    ///
    /// # Returns
    /// `Result<BTreeSet<String>, FieldError>` with the calculated names whose value changed.
    pub fn recompute(
        &self,
        schema: &PageSchema,
        values: &mut BTreeMap<String, FieldValue>,
        changed: Option<&BTreeSet<String>>,
    ) -> Result<BTreeSet<String>, FieldError> {
        let order = self.evaluation_order(schema)?;
        let mut dirty: BTreeSet<String> = changed.cloned().unwrap_or_default();
        let mut updated = BTreeSet::new();

        for name in order {
            let field = schema
                .field(&name)
                .ok_or_else(|| FieldError::InternalConsistency {
                    page_type: schema.page_type.clone(),
                    reason: format!("ordered field '{}' has no definition", name),
                })?;

            // Absent or foreign values (e.g. text left under a reused name) are recomputed
            let stale = !values.get(&name).is_some_and(FieldValue::is_engine_output);
            let affected = changed.is_none()
                || stale
                || field.dependent_fields.iter().any(|d| dirty.contains(d));
            if !affected {
                continue;
            }

            let expr = schema
                .formula(&name)
                .ok_or_else(|| FieldError::InternalConsistency {
                    page_type: schema.page_type.clone(),
                    reason: format!("formula of field '{}' is not compiled", name),
                })?;

            let result = expr.evaluate(&|input: &str| Self::input(schema, values, input));
            let value = result.map(FieldValue::Number).unwrap_or(FieldValue::Undefined);

            tracing::debug!(
                page_type = %schema.page_type,
                field = %name,
                ?value,
                "Calculated field evaluated"
            );

            dirty.insert(name.clone());
            if values.get(&name) != Some(&value) {
                values.insert(name.clone(), value);
                updated.insert(name);
            }
        }

        Ok(updated)
    }

    /// Resolves one formula input.
    fn input(schema: &PageSchema, values: &BTreeMap<String, FieldValue>, name: &str) -> Option<f64> {
        match values.get(name) {
            Some(value) => value.as_number(),
            None => {
                let fallback = schema
                    .field(name)
                    .and_then(|f| f.default_value.as_deref())
                    .and_then(|d| d.trim().parse::<f64>().ok())
                    .filter(|d| d.is_finite());
                Some(fallback.unwrap_or(0.0))
            }
        }
    }
}
