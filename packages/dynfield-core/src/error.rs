//! Field store error types.

use thiserror::Error;

use crate::migration::MigrationState;

/// Field registry, record store and migration errors.
///
/// Every field- or record-level variant carries the `page_type` and the
/// field name (or record id) involved so callers can point at the exact
/// correction instead of reporting a generic failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    /// A field with the same name already exists for the page type
    #[error("Field '{name}' already exists for page type '{page_type}'")]
    DuplicateFieldName { page_type: String, name: String },

    /// Value or dependency references a name with no definition
    #[error("Field '{name}' is not defined for page type '{page_type}'")]
    UnknownField { page_type: String, name: String },

    /// Field to delete does not exist
    #[error("Field '{name}' not found for page type '{page_type}'")]
    FieldNotFound { page_type: String, name: String },

    /// Field type not permitted by the current type constraint
    #[error("Field '{name}' for page type '{page_type}' uses type '{field_type}' which is not allowed")]
    InvalidType {
        page_type: String,
        name: String,
        field_type: String,
    },

    /// Definition is inconsistent with its declared type
    #[error("Invalid definition for field '{name}' (page type '{page_type}'): {reason}")]
    InvalidFieldDefinition {
        page_type: String,
        name: String,
        reason: String,
    },

    /// Formula failed to parse
    #[error("Invalid formula for field '{name}' (page type '{page_type}'): {reason}")]
    InvalidFormula {
        page_type: String,
        name: String,
        reason: String,
    },

    /// Formula reads a name missing from `dependent_fields`
    #[error("Formula of field '{name}' (page type '{page_type}') references '{reference}' which is not a declared dependency")]
    FormulaReferencesUndeclaredDependency {
        page_type: String,
        name: String,
        reference: String,
    },

    /// Dependency graph contains a cycle
    #[error("Field '{name}' (page type '{page_type}') forms a dependency cycle: {}", .cycle.join(" -> "))]
    CyclicDependency {
        page_type: String,
        name: String,
        cycle: Vec<String>,
    },

    /// No fields are defined for the page type
    #[error("Page type '{page_type}' has no field definitions")]
    UnknownPageType { page_type: String },

    /// Raw value failed type-specific parsing
    #[error("Value {value} is not valid for field '{name}' of type '{field_type}' (page type '{page_type}')")]
    InvalidValueForType {
        page_type: String,
        name: String,
        field_type: String,
        value: String,
    },

    /// Required field has no value after the write
    #[error("Required field '{name}' has no value (page type '{page_type}')")]
    RequiredFieldMissing { page_type: String, name: String },

    /// Caller attempted to set a calculated field directly
    #[error("Field '{name}' (page type '{page_type}') is calculated and cannot be written")]
    CalculatedFieldWriteRejected { page_type: String, name: String },

    /// Record not found
    #[error("Record {record_id} not found for page type '{page_type}'")]
    RecordNotFound { page_type: String, record_id: u64 },

    /// Stored definitions violate an invariant that definition-time checks guarantee
    #[error("Internal consistency fault for page type '{page_type}': {reason}")]
    InternalConsistency { page_type: String, reason: String },

    /// Another migration step holds an overlapping scope
    #[error("A migration is already in flight for scope '{scope}'")]
    MigrationInProgress { scope: String },

    /// Shadow copy differs from its source
    #[error("Migration '{migration}' copied {actual} rows into shadow '{table}', expected {expected}")]
    MigrationRowCountMismatch {
        migration: String,
        table: String,
        expected: usize,
        actual: usize,
    },

    /// Migration step failed before the swap; the original storage is untouched
    #[error("Migration '{migration}' failed in state {state:?}: {reason}")]
    MigrationFailed {
        migration: String,
        state: MigrationState,
        reason: String,
    },

    /// Migration step failed at or after the swap; operator intervention required
    #[error("Migration '{migration}' failed irrecoverably in state {state:?}: {reason}")]
    MigrationFatal {
        migration: String,
        state: MigrationState,
        reason: String,
    },

    /// Lock poisoned (RwLock poisoned)
    #[error("Lock poisoned")]
    LockPoisoned,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data corruption detected
    #[error("Data corruption detected: {0}")]
    DataCorruption(String),

    /// Disk full error during persistence
    #[error("Disk full: {0}")]
    DiskFull(String),

    /// I/O error during persistence
    #[error("I/O error: {0}")]
    IoError(String),

    /// Transient I/O error that may succeed on retry
    #[error("Transient I/O error: {0}")]
    TransientIoError(String),
}

impl FieldError {
    /// Returns true for failures that leave the store in a state only an operator can repair.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FieldError::MigrationFatal { .. } | FieldError::InternalConsistency { .. }
        )
    }
}
