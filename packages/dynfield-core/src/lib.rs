//! Dynamic field schema engine.
//!
//! Provides a field definition registry scoped by page type, a record
//! store with type validation, a derived value engine for calculated
//! fields, a shadow-table schema migrator, and persistence.

pub mod config;
pub mod engine;
pub mod error;
pub mod formula;
pub mod migration;
pub mod persistence;
pub mod records;
pub mod registry;
pub mod store;

pub use config::StoreConfig;
pub use engine::DerivedValueEngine;
pub use error::FieldError;
pub use migration::{MigrationStep, SchemaMigrator};
pub use records::{FieldValue, Record, RecordStore};
pub use registry::{FieldDefinition, FieldDefinitionRegistry, FieldType, NewField};
pub use store::Store;
