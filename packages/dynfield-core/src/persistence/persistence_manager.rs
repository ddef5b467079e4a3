//! Persistence manager for the schema file and the record file.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

#[cfg(feature = "persist")]
use memmap2::Mmap;

use crate::config::StoreConfig;
use crate::error::FieldError;
use crate::migration::MigrationRecord;
use crate::records::{
    decode_document, from_eav, to_eav, DocumentRow, EavRow, RecordKey, RecordLayout, RecordTable,
};
use crate::registry::{FieldId, FieldTable, PageSchema};
use crate::store::Store;

use super::io_utils::{checksum, classify_io_error, retry_io_operation, write_atomic};
use super::schema::{
    FieldRow, RecordHead, RecordsFile, SchemaFile, RECORDS_FILE, SCHEMA_FILE, SCHEMA_VERSION,
};

/// Persistence manager for a store's data directory.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    /// Data directory path
    data_dir: PathBuf,
    /// Shape records are written in
    record_layout: RecordLayout,
    /// Maximum retry attempts for transient I/O errors
    max_retries: u32,
    /// Delay between retry attempts in milliseconds
    retry_delay_ms: u64,
}

/// Consistent copy of the store taken under the migration gate.
struct Snapshot {
    fields: std::sync::Arc<FieldTable>,
    records: RecordTable,
    history: Vec<MigrationRecord>,
}

impl PersistenceManager {
    /// Creates a new persistence manager with the given configuration.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            record_layout: config.record_layout,
            max_retries: config.persistence_max_retries,
            retry_delay_ms: config.persistence_retry_delay_ms,
        }
    }

    /// Returns a manager writing to another directory in another layout.
    pub fn export_to(&self, data_dir: &Path, record_layout: RecordLayout) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            record_layout,
            ..self.clone()
        }
    }

    fn schema_path(&self) -> PathBuf {
        self.data_dir.join(SCHEMA_FILE)
    }

    fn records_path(&self) -> PathBuf {
        self.data_dir.join("data").join(RECORDS_FILE)
    }

    /// Saves the store to disk.
    ///
    /// The record file is written first, then the schema file carrying its
    /// checksum; both through a temporary file and an atomic rename.
    ///
    /// # Arguments
    /// * `store` - Store to save
    ///
    /// # Returns
    /// `Result<(), FieldError>` indicating success or failure.
    pub fn save_store(&self, store: &Store) -> Result<(), FieldError> {
        let snapshot = {
            let _shared = store.shared()?;
            let records = store
                .records()
                .read()
                .map_err(|_| FieldError::LockPoisoned)?
                .clone();
            Snapshot {
                fields: store.fields(),
                records,
                history: store.migration_history()?,
            }
        };

        let records_file = self.encode_records(&snapshot)?;
        let records_bytes = serde_json::to_vec_pretty(&records_file)
            .map_err(|e| FieldError::SerializationError(e.to_string()))?;
        let records_checksum = checksum(&records_bytes);

        let records_path = self.records_path();
        retry_io_operation(
            || write_atomic(&records_path, &records_bytes),
            self.max_retries,
            self.retry_delay_ms,
            "save_records",
        )?;

        let schema = self.build_schema(&snapshot, records_checksum)?;
        let schema_bytes = serde_json::to_vec_pretty(&schema)
            .map_err(|e| FieldError::SerializationError(e.to_string()))?;

        let schema_path = self.schema_path();
        retry_io_operation(
            || write_atomic(&schema_path, &schema_bytes),
            self.max_retries,
            self.retry_delay_ms,
            "save_schema",
        )?;

        tracing::info!(
            data_dir = %self.data_dir.display(),
            layout = %self.record_layout,
            fields = snapshot.fields.row_count(),
            records = snapshot.records.row_count(),
            "Store saved"
        );
        Ok(())
    }

    fn build_schema(&self, snapshot: &Snapshot, records_checksum: u32) -> Result<SchemaFile, FieldError> {
        let fields = snapshot
            .fields
            .rows()
            .map(FieldRow::from_definition)
            .collect::<Result<Vec<_>, _>>()?;

        let mut checksums = BTreeMap::new();
        checksums.insert(RECORDS_FILE.to_string(), records_checksum);

        Ok(SchemaFile {
            version: SCHEMA_VERSION,
            allowed_types: snapshot.fields.allowed_types().clone(),
            field_columns: snapshot.fields.columns().to_vec(),
            record_columns: snapshot.records.columns().to_vec(),
            next_field_id: snapshot.fields.next_id,
            fields,
            record_layout: self.record_layout,
            checksums,
            migrations: snapshot.history.clone(),
        })
    }

    fn encode_records(&self, snapshot: &Snapshot) -> Result<RecordsFile, FieldError> {
        match self.record_layout {
            RecordLayout::Document => Ok(RecordsFile::Document {
                rows: snapshot.records.rows().cloned().collect(),
            }),
            RecordLayout::Eav => {
                let mut schemas: HashMap<String, PageSchema> = HashMap::new();
                let mut records = Vec::with_capacity(snapshot.records.row_count());
                let mut values = Vec::new();

                for row in snapshot.records.rows() {
                    if !schemas.contains_key(&row.page_type) {
                        schemas.insert(row.page_type.clone(), snapshot.fields.page_schema(&row.page_type)?);
                    }
                    let Some(schema) = schemas.get(&row.page_type) else {
                        continue;
                    };

                    let live = decode_document(&row.record_data, schema);
                    let orphaned = row.record_data.len() - live.len();
                    if orphaned > 0 {
                        tracing::warn!(
                            page_type = %row.page_type,
                            record_id = row.id,
                            orphaned,
                            "Values of deleted fields dropped from EAV export"
                        );
                    }

                    values.extend(to_eav(row.id, &live, schema)?);
                    records.push(RecordHead {
                        page_type: row.page_type.clone(),
                        id: row.id,
                        created_at: row.created_at,
                        updated_at: row.updated_at,
                        extra: row.extra.clone(),
                    });
                }

                Ok(RecordsFile::Eav { records, values })
            }
        }
    }

    /// Loads a store from disk.
    ///
    /// A data directory without a schema file yields an empty store.
    ///
    /// # Arguments
    /// * `config` - Configuration of the loaded store
    ///
    /// # Returns
    /// `Result<Store, FieldError>`; `DataCorruption` on a checksum mismatch
    /// or rows that contradict the schema.
    pub fn load_store(&self, config: StoreConfig) -> Result<Store, FieldError> {
        let schema_path = self.schema_path();
        if !schema_path.exists() {
            // No schema file, start empty
            return Ok(Store::new(config));
        }

        let schema_bytes = retry_io_operation(
            || fs::read(&schema_path).map_err(|e| classify_io_error(e, "Failed to read schema file")),
            self.max_retries,
            self.retry_delay_ms,
            "load_schema",
        )?;
        let schema: SchemaFile = serde_json::from_slice(&schema_bytes)
            .map_err(|e| FieldError::SerializationError(format!("Failed to parse schema: {}", e)))?;

        // Validate version
        if schema.version != SCHEMA_VERSION {
            return Err(FieldError::SerializationError(format!(
                "Unsupported schema version: {}",
                schema.version
            )));
        }

        let mut fields = FieldTable::shadow(
            schema.allowed_types.clone(),
            schema.field_columns.clone(),
            schema.next_field_id,
        );
        for row in schema.fields.iter().cloned() {
            let field = row.into_definition()?;
            fields.next_id = fields.next_id.max(field.id + 1);
            if fields.rows.insert(field.id, field).is_some() {
                return Err(FieldError::DataCorruption(
                    "Schema file repeats a field id".to_string(),
                ));
            }
        }
        fields.reindex()?;

        let mut records = RecordTable::shadow(schema.record_columns.clone());
        if let Some(records_file) = self.read_records(&schema)? {
            self.decode_records(records_file, &fields, &mut records)?;
        }

        tracing::info!(
            data_dir = %self.data_dir.display(),
            fields = fields.row_count(),
            records = records.row_count(),
            migrations = schema.migrations.len(),
            "Store loaded"
        );

        Ok(Store::from_parts(config, fields, records, schema.migrations))
    }

    fn read_records(&self, schema: &SchemaFile) -> Result<Option<RecordsFile>, FieldError> {
        let path = self.records_path();
        let expected = schema.checksums.get(RECORDS_FILE).copied();

        if !path.exists() {
            return match expected {
                Some(_) => Err(FieldError::DataCorruption(format!(
                    "Record file {} is missing",
                    path.display()
                ))),
                None => Ok(None),
            };
        }

        let file = File::open(&path).map_err(|e| classify_io_error(e, "Failed to open record file"))?;
        self.read_verified(file, expected).map(Some)
    }

    /// Reads the record file through a memory map.
    #[cfg(feature = "persist")]
    fn read_verified(&self, file: File, expected: Option<u32>) -> Result<RecordsFile, FieldError> {
        // Memory map the file
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| classify_io_error(e, "Failed to memory map record file"))?
        };
        Self::verify_checksum(&mmap, expected)?;
        serde_json::from_slice(&mmap)
            .map_err(|e| FieldError::SerializationError(format!("Failed to parse record file: {}", e)))
    }

    /// Reads the record file into memory.
    #[cfg(not(feature = "persist"))]
    fn read_verified(&self, mut file: File, expected: Option<u32>) -> Result<RecordsFile, FieldError> {
        use std::io::Read;

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| classify_io_error(e, "Failed to read record file"))?;
        Self::verify_checksum(&data, expected)?;
        serde_json::from_slice(&data)
            .map_err(|e| FieldError::SerializationError(format!("Failed to parse record file: {}", e)))
    }

    fn verify_checksum(data: &[u8], expected: Option<u32>) -> Result<(), FieldError> {
        let Some(expected) = expected else {
            return Ok(());
        };
        let actual = checksum(data);
        if actual != expected {
            return Err(FieldError::DataCorruption(format!(
                "Checksum mismatch for {}: expected {:08x}, got {:08x}",
                RECORDS_FILE, expected, actual
            )));
        }
        Ok(())
    }

    fn decode_records(
        &self,
        file: RecordsFile,
        fields: &FieldTable,
        records: &mut RecordTable,
    ) -> Result<(), FieldError> {
        match file {
            RecordsFile::Document { rows } => {
                for row in rows {
                    Self::insert_row(records, row)?;
                }
            }
            RecordsFile::Eav {
                records: heads,
                values,
            } => {
                let owners: HashMap<FieldId, &str> = fields
                    .rows()
                    .map(|f| (f.id, f.page_type.as_str()))
                    .collect();

                let mut grouped: BTreeMap<RecordKey, Vec<EavRow>> = BTreeMap::new();
                for value in values {
                    let page_type = owners.get(&value.field_id).ok_or_else(|| {
                        FieldError::DataCorruption(format!(
                            "EAV row of record {} references unknown field id {}",
                            value.record_id, value.field_id
                        ))
                    })?;
                    grouped
                        .entry(RecordKey::new(page_type, value.record_id))
                        .or_default()
                        .push(value);
                }

                let mut schemas: HashMap<String, PageSchema> = HashMap::new();
                for head in heads {
                    if !schemas.contains_key(&head.page_type) {
                        schemas.insert(head.page_type.clone(), fields.page_schema(&head.page_type)?);
                    }
                    let Some(schema) = schemas.get(&head.page_type) else {
                        continue;
                    };

                    let key = RecordKey::new(&head.page_type, head.id);
                    let rows = grouped.remove(&key).unwrap_or_default();
                    let values = from_eav(head.id, &rows, schema)?;

                    let mut record_data = serde_json::Map::new();
                    crate::records::encode_document(&values, schema, &mut record_data);
                    Self::insert_row(
                        records,
                        DocumentRow {
                            id: head.id,
                            page_type: head.page_type,
                            record_data,
                            created_at: head.created_at,
                            updated_at: head.updated_at,
                            extra: head.extra,
                        },
                    )?;
                }

                if let Some(key) = grouped.keys().next() {
                    return Err(FieldError::DataCorruption(format!(
                        "EAV values of record {} (page type '{}') have no record row",
                        key.record_id, key.page_type
                    )));
                }
            }
        }
        Ok(())
    }

    fn insert_row(records: &mut RecordTable, row: DocumentRow) -> Result<(), FieldError> {
        let key = row.key();
        if records.rows.insert(key.clone(), row).is_some() {
            return Err(FieldError::DataCorruption(format!(
                "Record {} (page type '{}') is stored more than once",
                key.record_id, key.page_type
            )));
        }
        Ok(())
    }
}
