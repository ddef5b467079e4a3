//! Field type enumeration and field definitions.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field definition identifier.
pub type FieldId = u64;

/// Closed set of field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Select,
    Calculated,
    Location,
    Url,
}

impl FieldType {
    /// Every field type, in declaration order.
    pub const ALL: [FieldType; 7] = [
        FieldType::Text,
        FieldType::Number,
        FieldType::Date,
        FieldType::Select,
        FieldType::Calculated,
        FieldType::Location,
        FieldType::Url,
    ];

    /// Returns the stored type name.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Select => "select",
            FieldType::Calculated => "calculated",
            FieldType::Location => "location",
            FieldType::Url => "url",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an enumerated name fails.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for FieldType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ParseEnumError {
                kind: "field type",
                value: s.to_string(),
            })
    }
}

/// Stored field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Identifier assigned on creation
    pub id: FieldId,
    /// Name, unique within the page type
    pub name: String,
    /// Display text
    pub label: String,
    /// Declared type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Entity kind this field belongs to
    pub page_type: String,
    /// Allowed values, only for `select`
    pub options: Vec<String>,
    /// Formula, only for `calculated`
    pub calculation_formula: Option<String>,
    /// Names the formula reads, only for `calculated`
    pub dependent_fields: Vec<String>,
    pub is_required: bool,
    pub display_order: i64,
    pub default_value: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Values of columns added by migrations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FieldDefinition {
    /// Returns true if the field value is derived by the engine.
    pub fn is_calculated(&self) -> bool {
        self.field_type == FieldType::Calculated
    }
}

/// Definition request accepted by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewField {
    pub page_type: String,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub calculation_formula: Option<String>,
    #[serde(default)]
    pub dependent_fields: Vec<String>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub display_order: i64,
    #[serde(default)]
    pub default_value: Option<String>,
}

impl NewField {
    /// Creates a definition request with empty metadata; the label defaults to the name.
    pub fn new(page_type: &str, name: &str, field_type: FieldType) -> Self {
        Self {
            page_type: page_type.to_string(),
            name: name.to_string(),
            label: name.to_string(),
            field_type,
            options: Vec::new(),
            calculation_formula: None,
            dependent_fields: Vec::new(),
            is_required: false,
            display_order: 0,
            default_value: None,
        }
    }

    /// Creates a `calculated` definition request.
    pub fn calculated(page_type: &str, name: &str, formula: &str, dependent_fields: &[&str]) -> Self {
        let mut field = Self::new(page_type, name, FieldType::Calculated);
        field.calculation_formula = Some(formula.to_string());
        field.dependent_fields = dependent_fields.iter().map(|s| s.to_string()).collect();
        field
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn display_order(mut self, order: i64) -> Self {
        self.display_order = order;
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub(crate) fn into_definition(
        self,
        id: FieldId,
        created_at: DateTime<Utc>,
        extra: BTreeMap<String, serde_json::Value>,
    ) -> FieldDefinition {
        FieldDefinition {
            id,
            name: self.name,
            label: self.label,
            field_type: self.field_type,
            page_type: self.page_type,
            options: self.options,
            calculation_formula: self.calculation_formula,
            dependent_fields: self.dependent_fields,
            is_required: self.is_required,
            display_order: self.display_order,
            default_value: self.default_value,
            created_at,
            extra,
        }
    }
}
