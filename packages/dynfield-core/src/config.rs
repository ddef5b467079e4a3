//! Store configuration.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::records::RecordLayout;
use crate::registry::FieldType;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Data directory for persistence
    pub data_dir: PathBuf,
    /// Row shape used when records are written to disk
    pub record_layout: RecordLayout,
    /// Type constraint of a freshly created field table
    pub allowed_types: BTreeSet<FieldType>,
    /// Maximum retry attempts for transient I/O errors
    pub persistence_max_retries: u32,
    /// Delay between retry attempts in milliseconds
    pub persistence_retry_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            record_layout: RecordLayout::Document,
            allowed_types: FieldType::ALL.iter().copied().collect(),
            persistence_max_retries: 3,      // Default retry attempts
            persistence_retry_delay_ms: 100, // 100ms delay between retries
        }
    }
}
