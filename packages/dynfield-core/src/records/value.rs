//! Typed record values and their encodings.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::FieldError;
use crate::registry::{FieldDefinition, FieldType};

/// Calendar date format for `date` fields.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Stored value of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Text, select, location and url values
    Text(String),
    /// Numeric value (always finite)
    Number(f64),
    /// Calendar date
    Date(NaiveDate),
    /// Calculated value whose formula had no defined result
    Undefined,
}

impl FieldValue {
    /// Numeric view used as a formula input; `None` is undefined.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            FieldValue::Date(_) | FieldValue::Undefined => None,
        }
    }

    /// Document encoding.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            FieldValue::Undefined => Value::Null,
        }
    }

    /// Decodes a document value against the field's current type.
    ///
    /// Resolves exactly like [`FieldValue::from_text`] on the value's text
    /// form, so document and entity-attribute-value rows decode alike.
    /// Values written under an earlier type that do not parse under the
    /// current one are surfaced as text.
    pub fn from_json(field_type: FieldType, value: &Value) -> FieldValue {
        let text = match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string())),
            other => Some(other.to_string()),
        };
        FieldValue::from_text(field_type, text.as_deref())
    }

    /// Returns true for values the derived value engine can produce.
    pub fn is_engine_output(&self) -> bool {
        matches!(self, FieldValue::Number(_) | FieldValue::Undefined)
    }

    /// Single-column encoding used by the entity-attribute-value layout.
    pub fn to_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Number(n) => Some(n.to_string()),
            FieldValue::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            FieldValue::Undefined => None,
        }
    }

    /// Decodes a single-column value against the field's type.
    ///
    /// Text that does not parse as the declared type is kept as text.
    pub fn from_text(field_type: FieldType, text: Option<&str>) -> FieldValue {
        let Some(text) = text else {
            return FieldValue::Undefined;
        };

        match field_type {
            FieldType::Number | FieldType::Calculated => text
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(FieldValue::Number)
                .unwrap_or_else(|| FieldValue::Text(text.to_string())),
            FieldType::Date => NaiveDate::parse_from_str(text, DATE_FORMAT)
                .map(FieldValue::Date)
                .unwrap_or_else(|_| FieldValue::Text(text.to_string())),
            _ => FieldValue::Text(text.to_string()),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn invalid(field: &FieldDefinition, raw: &Value) -> FieldError {
    FieldError::InvalidValueForType {
        page_type: field.page_type.clone(),
        name: field.name.clone(),
        field_type: field.field_type.to_string(),
        value: raw.to_string(),
    }
}

fn scalar_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_absolute_http_url(s: &str) -> bool {
    let rest = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or("");
            !host.is_empty() && !s.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Coerces a caller-supplied raw value to the field's declared type.
///
/// # Arguments
/// * `field` - Target field definition
/// * `raw` - Raw JSON value from the caller
///
/// # Returns
/// `Ok(None)` when the value clears the field (`null` or blank string),
/// `Ok(Some(value))` on success, or the rejection.
pub fn coerce(field: &FieldDefinition, raw: &Value) -> Result<Option<FieldValue>, FieldError> {
    if field.is_calculated() {
        return Err(FieldError::CalculatedFieldWriteRejected {
            page_type: field.page_type.clone(),
            name: field.name.clone(),
        });
    }

    match raw {
        Value::Null => return Ok(None),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        _ => {}
    }

    let value = match field.field_type {
        FieldType::Number => {
            let number = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number
                .filter(|n| n.is_finite())
                .map(FieldValue::Number)
                .ok_or_else(|| invalid(field, raw))?
        }
        FieldType::Date => match raw {
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                .map(FieldValue::Date)
                .map_err(|_| invalid(field, raw))?,
            _ => return Err(invalid(field, raw)),
        },
        FieldType::Select => {
            let choice = scalar_text(raw).ok_or_else(|| invalid(field, raw))?;
            if !field.options.iter().any(|o| *o == choice) {
                return Err(invalid(field, raw));
            }
            FieldValue::Text(choice)
        }
        FieldType::Url => match raw {
            Value::String(s) if is_absolute_http_url(s.trim()) => {
                FieldValue::Text(s.trim().to_string())
            }
            _ => return Err(invalid(field, raw)),
        },
        FieldType::Text | FieldType::Location => {
            FieldValue::Text(scalar_text(raw).ok_or_else(|| invalid(field, raw))?)
        }
        FieldType::Calculated => unreachable!("calculated fields are rejected above"),
    };

    Ok(Some(value))
}
