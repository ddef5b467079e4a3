//! End-to-end workflow tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use ntest::timeout;
use serde_json::{json, Value};

use dynfield_core::error::FieldError;
use dynfield_core::migration::{MigrationStep, SchemaMigrator};
use dynfield_core::records::{FieldValue, RecordStore};
use dynfield_core::registry::{FieldDefinitionRegistry, FieldType, NewField};
use dynfield_core::store::Store;
use dynfield_core::StoreConfig;

fn values(raw: Value) -> BTreeMap<String, Value> {
    raw.as_object()
        .map(|m| m.clone().into_iter().collect())
        .unwrap_or_default()
}

/// Define → upsert → recompute → migrate → upsert under the new type.
#[timeout(5000)]
#[test]
fn test_field_lifecycle() {
    let config = StoreConfig {
        allowed_types: FieldType::ALL
            .iter()
            .copied()
            .filter(|t| *t != FieldType::Url)
            .collect(),
        ..Default::default()
    };
    let store = Store::shared_handle(config);
    let registry = FieldDefinitionRegistry::new(Arc::clone(&store));
    let records = RecordStore::new(Arc::clone(&store));
    let migrator = SchemaMigrator::new(Arc::clone(&store));

    registry
        .define_all(vec![
            NewField::new("bramawi", "num_bundles", FieldType::Number)
                .label("Bundles")
                .required(),
            NewField::new("bramawi", "unit_price", FieldType::Number).label("Unit price"),
            NewField::calculated(
                "bramawi",
                "total_amount",
                "num_bundles * unit_price",
                &["num_bundles", "unit_price"],
            )
            .label("Total"),
            NewField::new("bramawi", "supplier_map", FieldType::Location),
        ])
        .unwrap();

    let record = records
        .upsert(
            "bramawi",
            100,
            values(json!({"num_bundles": 3, "unit_price": 120, "supplier_map": "https://maps.example.org/s/1"})),
        )
        .unwrap();
    assert_eq!(record.value("total_amount"), Some(&FieldValue::Number(360.0)));

    // Rejected write leaves the record alone
    assert!(matches!(
        records.upsert("bramawi", 100, values(json!({"total_amount": 5}))),
        Err(FieldError::CalculatedFieldWriteRejected { .. })
    ));
    assert_eq!(records.get("bramawi", 100).unwrap(), record);

    let names_before: Vec<String> = registry
        .list_fields("bramawi")
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();

    migrator
        .apply(
            MigrationStep::new("supplier_map_is_url")
                .add_type(FieldType::Url)
                .rewrite(FieldType::Location, FieldType::Url),
        )
        .unwrap();

    let names_after: Vec<String> = registry
        .list_fields("bramawi")
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names_after, names_before);
    assert_eq!(
        registry.fields_by_name("bramawi").unwrap()["supplier_map"].field_type,
        FieldType::Url
    );

    let updated = records
        .upsert(
            "bramawi",
            100,
            values(json!({"unit_price": 150, "supplier_map": "https://maps.example.org/s/2"})),
        )
        .unwrap();
    assert_eq!(updated.value("total_amount"), Some(&FieldValue::Number(450.0)));
    assert_eq!(updated.created_at, record.created_at);
}

/// Upserts from several threads stay consistent with a migration in between.
#[timeout(10000)]
#[test]
fn test_concurrent_upserts_and_migration() {
    let store = Store::shared_handle(StoreConfig::default());
    let registry = FieldDefinitionRegistry::new(Arc::clone(&store));
    registry
        .define_all(vec![
            NewField::new("distributions", "bags", FieldType::Number),
            NewField::new("distributions", "bag_weight", FieldType::Number),
            NewField::calculated(
                "distributions",
                "total_weight",
                "bags * bag_weight",
                &["bags", "bag_weight"],
            ),
            NewField::new("distributions", "village", FieldType::Text),
        ])
        .unwrap();

    let mut handles = Vec::new();
    for worker in 0..4u64 {
        let records = RecordStore::new(Arc::clone(&store));
        handles.push(thread::spawn(move || {
            for i in 0..50u64 {
                let id = worker * 1000 + i;
                records
                    .upsert(
                        "distributions",
                        id,
                        values(json!({"bags": i, "bag_weight": 25, "village": format!("v{}", worker)})),
                    )
                    .unwrap();
            }
        }));
    }

    let migrator = SchemaMigrator::new(Arc::clone(&store));
    migrator
        .apply(MigrationStep::new("village_is_location").rewrite(FieldType::Text, FieldType::Location))
        .unwrap();

    for handle in handles {
        handle.join().unwrap();
    }

    let records = RecordStore::new(Arc::clone(&store));
    let all = records.list("distributions").unwrap();
    assert_eq!(all.len(), 200);
    for record in all {
        let bags = (record.id % 1000) as f64;
        assert_eq!(
            record.value("total_weight"),
            Some(&FieldValue::Number(bags * 25.0))
        );
        assert!(record.value("village").is_some());
    }
    assert_eq!(
        registry.fields_by_name("distributions").unwrap()["village"].field_type,
        FieldType::Location
    );
}

/// Same names under different page types are independent.
#[timeout(5000)]
#[test]
fn test_page_types_are_isolated() {
    let store = Store::shared_handle(StoreConfig::default());
    let registry = FieldDefinitionRegistry::new(Arc::clone(&store));
    let records = RecordStore::new(Arc::clone(&store));

    registry
        .define_all(vec![
            NewField::new("mosques", "amount", FieldType::Number),
            NewField::new("expenses", "amount", FieldType::Text),
        ])
        .unwrap();

    records
        .upsert("mosques", 1, values(json!({"amount": 10})))
        .unwrap();
    records
        .upsert("expenses", 1, values(json!({"amount": "ten"})))
        .unwrap();
    assert!(records
        .upsert("mosques", 2, values(json!({"amount": "ten"})))
        .is_err());

    records.delete("mosques", 1).unwrap();
    assert_eq!(
        records.get("expenses", 1).unwrap().value("amount"),
        Some(&FieldValue::Text("ten".to_string()))
    );
    assert_eq!(registry.page_types().unwrap(), vec!["expenses", "mosques"]);
}
