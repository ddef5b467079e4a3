//! Schema and record persistence with checksum verification.


pub mod io_utils;
mod persistence_manager;
mod schema;

pub use persistence_manager::PersistenceManager;
pub use schema::{
    FieldRow, RecordHead, RecordsFile, SchemaFile, RECORDS_FILE, SCHEMA_FILE, SCHEMA_VERSION,
};
