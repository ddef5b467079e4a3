//! Store handle shared by the registry, record store and migrator.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use arc_swap::ArcSwap;

use crate::config::StoreConfig;
use crate::error::FieldError;
use crate::migration::MigrationRecord;
use crate::records::RecordTable;
use crate::registry::FieldTable;

/// Process-wide storage for field definitions, records and migration history.
///
/// Constructed once and passed as `Arc<Store>` into each component.
/// Ordinary operations hold the migration gate shared; a migration step
/// holds it exclusively for its own duration.
#[derive(Debug)]
pub struct Store {
    config: StoreConfig,
    /// Field definition table, published copy-on-write
    fields: ArcSwap<FieldTable>,
    /// Serializes definition changes
    field_writer: Mutex<()>,
    /// Record table (document rows)
    records: RwLock<RecordTable>,
    /// Migration exclusivity gate
    gate: RwLock<()>,
    /// Scopes of migrations currently planned or running
    in_flight: Mutex<BTreeSet<String>>,
    /// Applied migration steps, oldest first
    history: RwLock<Vec<MigrationRecord>>,
}

impl Store {
    /// Creates an empty store using the configured type constraint.
    pub fn new(config: StoreConfig) -> Self {
        let fields = FieldTable::new(config.allowed_types.clone());
        Self::from_parts(config, fields, RecordTable::default(), Vec::new())
    }

    /// Creates a store from previously persisted tables.
    pub(crate) fn from_parts(
        config: StoreConfig,
        fields: FieldTable,
        records: RecordTable,
        history: Vec<MigrationRecord>,
    ) -> Self {
        Self {
            config,
            fields: ArcSwap::from_pointee(fields),
            field_writer: Mutex::new(()),
            records: RwLock::new(records),
            gate: RwLock::new(()),
            in_flight: Mutex::new(BTreeSet::new()),
            history: RwLock::new(history),
        }
    }

    /// Convenience constructor returning the shared handle.
    pub fn shared_handle(config: StoreConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the applied migration steps, oldest first.
    pub fn migration_history(&self) -> Result<Vec<MigrationRecord>, FieldError> {
        let history = self.history.read().map_err(|_| FieldError::LockPoisoned)?;
        Ok(history.clone())
    }

    /// Snapshot of the field table.
    pub fn field_table(&self) -> Result<Arc<FieldTable>, FieldError> {
        let _shared = self.shared()?;
        Ok(self.fields())
    }

    /// Number of stored record rows across all page types.
    pub fn record_count(&self) -> Result<usize, FieldError> {
        let _shared = self.shared()?;
        let records = self.records.read().map_err(|_| FieldError::LockPoisoned)?;
        Ok(records.row_count())
    }

    pub(crate) fn shared(&self) -> Result<RwLockReadGuard<'_, ()>, FieldError> {
        self.gate.read().map_err(|_| FieldError::LockPoisoned)
    }

    pub(crate) fn exclusive(&self) -> Result<RwLockWriteGuard<'_, ()>, FieldError> {
        self.gate.write().map_err(|_| FieldError::LockPoisoned)
    }

    pub(crate) fn field_writer(&self) -> Result<MutexGuard<'_, ()>, FieldError> {
        self.field_writer.lock().map_err(|_| FieldError::LockPoisoned)
    }

    pub(crate) fn fields(&self) -> Arc<FieldTable> {
        self.fields.load_full()
    }

    pub(crate) fn publish_fields(&self, table: FieldTable) {
        self.fields.store(Arc::new(table));
    }

    pub(crate) fn records(&self) -> &RwLock<RecordTable> {
        &self.records
    }

    pub(crate) fn push_history(&self, record: MigrationRecord) -> Result<(), FieldError> {
        let mut history = self.history.write().map_err(|_| FieldError::LockPoisoned)?;
        history.push(record);
        Ok(())
    }

    /// Marks a migration scope in flight.
    ///
    /// The global scope `*` overlaps every other scope.
    pub(crate) fn claim_scope(&self, scope: &str) -> Result<(), FieldError> {
        let mut in_flight = self.in_flight.lock().map_err(|_| FieldError::LockPoisoned)?;
        let overlaps = in_flight.contains(scope)
            || in_flight.contains("*")
            || (scope == "*" && !in_flight.is_empty());
        if overlaps {
            return Err(FieldError::MigrationInProgress {
                scope: scope.to_string(),
            });
        }
        in_flight.insert(scope.to_string());
        Ok(())
    }

    pub(crate) fn release_scope(&self, scope: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(scope);
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
