//! Definition-time validation of field definitions.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::FieldError;
use crate::formula;

use super::field::{FieldDefinition, FieldType, NewField};

/// Returns true if `name` can be used as a formula variable.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid(field: &NewField, reason: impl Into<String>) -> FieldError {
    FieldError::InvalidFieldDefinition {
        page_type: field.page_type.clone(),
        name: field.name.clone(),
        reason: reason.into(),
    }
}

/// Validates a definition request on its own: name syntax, the type
/// constraint, and that options / formula are populated exactly as the
/// type requires.
///
/// # Arguments
/// * `field` - Definition request
/// * `allowed_types` - Current type constraint
///
/// # Returns
/// `Result<(), FieldError>` indicating success or the first violation.
pub(crate) fn validate_shape(
    field: &NewField,
    allowed_types: &BTreeSet<FieldType>,
) -> Result<(), FieldError> {
    if field.page_type.trim().is_empty() {
        return Err(invalid(field, "page type must not be empty"));
    }
    if !is_identifier(&field.name) {
        return Err(invalid(
            field,
            "name must start with a letter or '_' and contain only letters, digits and '_'",
        ));
    }

    if !allowed_types.contains(&field.field_type) {
        return Err(FieldError::InvalidType {
            page_type: field.page_type.clone(),
            name: field.name.clone(),
            field_type: field.field_type.to_string(),
        });
    }

    let is_select = field.field_type == FieldType::Select;
    let is_calculated = field.field_type == FieldType::Calculated;

    // Options belong to select fields only
    if is_select && field.options.is_empty() {
        return Err(invalid(field, "select fields require at least one option"));
    }
    if !is_select && !field.options.is_empty() {
        return Err(invalid(field, "only select fields may declare options"));
    }
    if is_select {
        let unique: BTreeSet<&String> = field.options.iter().collect();
        if unique.len() != field.options.len() {
            return Err(invalid(field, "options must be unique"));
        }
    }

    // Formula and dependencies belong to calculated fields only
    if !is_calculated {
        if field.calculation_formula.is_some() || !field.dependent_fields.is_empty() {
            return Err(invalid(
                field,
                "only calculated fields may declare a formula or dependent fields",
            ));
        }
        return Ok(());
    }

    let source = field
        .calculation_formula
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| invalid(field, "calculated fields require a formula"))?;

    if field.is_required {
        return Err(invalid(field, "calculated fields cannot be required"));
    }

    let unique: BTreeSet<&String> = field.dependent_fields.iter().collect();
    if unique.len() != field.dependent_fields.len() {
        return Err(invalid(field, "dependent fields must not repeat"));
    }

    if field.dependent_fields.iter().any(|d| *d == field.name) {
        return Err(FieldError::CyclicDependency {
            page_type: field.page_type.clone(),
            name: field.name.clone(),
            cycle: vec![field.name.clone(), field.name.clone()],
        });
    }

    let expr = formula::parse(source).map_err(|e| FieldError::InvalidFormula {
        page_type: field.page_type.clone(),
        name: field.name.clone(),
        reason: e.to_string(),
    })?;

    // Every name the formula reads must be declared
    let declared: BTreeSet<&str> = field.dependent_fields.iter().map(String::as_str).collect();
    if let Some(reference) = expr.variables().into_iter().find(|v| !declared.contains(v)) {
        return Err(FieldError::FormulaReferencesUndeclaredDependency {
            page_type: field.page_type.clone(),
            name: field.name.clone(),
            reference: reference.to_string(),
        });
    }

    tracing::debug!(
        page_type = %field.page_type,
        field = %field.name,
        formula = %expr,
        "Formula compiled"
    );

    Ok(())
}

/// Validates the dependencies of a calculated definition against the
/// definitions of its page type (which already include the definition
/// itself and any batch siblings).
pub(crate) fn validate_dependencies(
    field: &FieldDefinition,
    page_fields: &BTreeMap<&str, &FieldDefinition>,
) -> Result<(), FieldError> {
    for dependency in &field.dependent_fields {
        if !page_fields.contains_key(dependency.as_str()) {
            return Err(FieldError::UnknownField {
                page_type: field.page_type.clone(),
                name: dependency.clone(),
            });
        }
    }

    if let Some(cycle) = find_cycle(&field.name, page_fields) {
        return Err(FieldError::CyclicDependency {
            page_type: field.page_type.clone(),
            name: field.name.clone(),
            cycle,
        });
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search from `start` along `dependent_fields` edges.
///
/// Returns the cycle path (first and last element equal) if a back edge to
/// a node still marked visiting is found.
pub(crate) fn find_cycle(
    start: &str,
    page_fields: &BTreeMap<&str, &FieldDefinition>,
) -> Option<Vec<String>> {
    fn visit<'a>(
        name: &'a str,
        page_fields: &BTreeMap<&str, &'a FieldDefinition>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(name) {
            Some(Mark::Visiting) => {
                let pos = path.iter().position(|n| *n == name)?;
                let mut cycle: Vec<String> = path[pos..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            Some(Mark::Done) => return None,
            None => {}
        }

        marks.insert(name, Mark::Visiting);
        path.push(name);

        if let Some(&field) = page_fields.get(name) {
            for dependency in &field.dependent_fields {
                if let Some(cycle) = visit(dependency, page_fields, marks, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        marks.insert(name, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut path = Vec::new();
    let &field = page_fields.get(start)?;
    visit(field.name.as_str(), page_fields, &mut marks, &mut path)
}
