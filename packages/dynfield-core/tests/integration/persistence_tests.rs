//! Persistence integration tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use ntest::timeout;
use serde_json::json;
use tempfile::tempdir;

use dynfield_core::migration::{MigrationStep, SchemaMigrator};
use dynfield_core::persistence::PersistenceManager;
use dynfield_core::records::{FieldValue, RecordLayout, RecordStore};
use dynfield_core::registry::{FieldDefinitionRegistry, FieldType, NewField};
use dynfield_core::StoreConfig;

fn config(dir: &std::path::Path) -> StoreConfig {
    StoreConfig {
        data_dir: dir.to_path_buf(),
        allowed_types: [FieldType::Text, FieldType::Number, FieldType::Calculated, FieldType::Location]
            .into_iter()
            .collect(),
        persistence_retry_delay_ms: 0,
        ..Default::default()
    }
}

fn steps() -> Vec<MigrationStep> {
    vec![
        MigrationStep::new("allow_url").add_type(FieldType::Url),
        MigrationStep::new("maps_are_urls").rewrite(FieldType::Location, FieldType::Url),
    ]
}

/// Save after migrating, reload, keep working on the reloaded store.
#[timeout(5000)]
#[test]
fn test_migrated_store_survives_restart() {
    let temp_dir = tempdir().unwrap();
    let config = config(temp_dir.path());
    let persistence = PersistenceManager::new(&config);

    {
        let store = Arc::new(persistence.load_store(config.clone()).unwrap());
        let registry = FieldDefinitionRegistry::new(Arc::clone(&store));
        registry
            .define_all(vec![
                NewField::new("mosques", "capacity", FieldType::Number),
                NewField::new("mosques", "map", FieldType::Location),
            ])
            .unwrap();
        let mut values = BTreeMap::new();
        values.insert("capacity".to_string(), json!(250));
        values.insert("map".to_string(), json!("https://maps.example.org/m/9"));
        RecordStore::new(Arc::clone(&store))
            .upsert("mosques", 9, values)
            .unwrap();

        SchemaMigrator::new(Arc::clone(&store))
            .apply_pending(steps())
            .unwrap();
        persistence.save_store(&store).unwrap();
    }

    let store = Arc::new(persistence.load_store(config).unwrap());
    let migrator = SchemaMigrator::new(Arc::clone(&store));
    assert_eq!(migrator.history().unwrap().len(), 2);
    assert!(migrator.apply_pending(steps()).unwrap().is_empty());

    let registry = FieldDefinitionRegistry::new(Arc::clone(&store));
    assert_eq!(
        registry.fields_by_name("mosques").unwrap()["map"].field_type,
        FieldType::Url
    );
    assert!(registry.allowed_types().unwrap().contains(&FieldType::Url));

    let records = RecordStore::new(Arc::clone(&store));
    let record = records.get("mosques", 9).unwrap();
    assert_eq!(record.value("capacity"), Some(&FieldValue::Number(250.0)));
    assert!(records
        .upsert("mosques", 9, BTreeMap::from([("map".to_string(), json!("not a url"))]))
        .is_err());
}

/// Replaying a dump's history on a fresh store reproduces its constraint.
#[timeout(5000)]
#[test]
fn test_history_replay_reconstructs_constraint() {
    let dump_dir = tempdir().unwrap();
    let fresh_dir = tempdir().unwrap();

    let dump_config = StoreConfig {
        record_layout: RecordLayout::Eav,
        ..config(dump_dir.path())
    };
    let persistence = PersistenceManager::new(&dump_config);
    let store = Arc::new(persistence.load_store(dump_config.clone()).unwrap());
    SchemaMigrator::new(Arc::clone(&store))
        .apply_pending(steps())
        .unwrap();
    persistence.save_store(&store).unwrap();

    let dumped = persistence.load_store(dump_config).unwrap();
    let history: Vec<MigrationStep> = dumped
        .migration_history()
        .unwrap()
        .into_iter()
        .map(|record| record.step)
        .collect();

    let fresh = Arc::new(
        PersistenceManager::new(&config(fresh_dir.path()))
            .load_store(config(fresh_dir.path()))
            .unwrap(),
    );
    let reports = SchemaMigrator::new(Arc::clone(&fresh))
        .apply_pending(history)
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(
        fresh.field_table().unwrap().allowed_types(),
        dumped.field_table().unwrap().allowed_types()
    );
}
