use super::*;
use crate::config::StoreConfig;
use crate::registry::{FieldDefinitionRegistry, FieldType, NewField};
use chrono::NaiveDate;
use ntest::timeout;
use serde_json::json;

fn setup() -> (FieldDefinitionRegistry, RecordStore) {
    let store = Store::shared_handle(StoreConfig::default());
    let registry = FieldDefinitionRegistry::new(Arc::clone(&store));
    registry
        .define_all(vec![
            NewField::new("bramawi", "num_bundles", FieldType::Number),
            NewField::new("bramawi", "unit_price", FieldType::Number),
            NewField::calculated(
                "bramawi",
                "total_amount",
                "num_bundles * unit_price",
                &["num_bundles", "unit_price"],
            ),
            NewField::new("bramawi", "status", FieldType::Select).options(&["open", "paid"]),
            NewField::new("bramawi", "delivered_on", FieldType::Date),
            NewField::new("bramawi", "supplier_site", FieldType::Url),
            NewField::new("bramawi", "notes", FieldType::Text),
        ])
        .unwrap();
    (registry, RecordStore::new(store))
}

fn values(pairs: Value) -> BTreeMap<String, Value> {
    match pairs {
        Value::Object(map) => map.into_iter().collect(),
        _ => panic!("expected an object"),
    }
}

#[timeout(1000)]
#[test]
fn test_upsert_computes_derived_value() {
    let (_, records) = setup();
    let record = records
        .upsert("bramawi", 1, values(json!({"num_bundles": 3, "unit_price": "120"})))
        .unwrap();

    assert_eq!(record.value("num_bundles"), Some(&FieldValue::Number(3.0)));
    assert_eq!(record.value("unit_price"), Some(&FieldValue::Number(120.0)));
    assert_eq!(record.value("total_amount"), Some(&FieldValue::Number(360.0)));
    assert_eq!(records.get("bramawi", 1).unwrap(), record);
}

#[timeout(1000)]
#[test]
fn test_partial_update_merges_and_recomputes() {
    let (_, records) = setup();
    records
        .upsert("bramawi", 7, values(json!({"num_bundles": 10, "unit_price": 250, "notes": "first"})))
        .unwrap();
    let updated = records
        .upsert("bramawi", 7, values(json!({"num_bundles": 4})))
        .unwrap();

    assert_eq!(updated.value("notes"), Some(&FieldValue::Text("first".to_string())));
    assert_eq!(updated.value("total_amount"), Some(&FieldValue::Number(1000.0)));
    assert!(updated.updated_at >= updated.created_at);

    // Clearing an input falls back to zero
    let cleared = records
        .upsert("bramawi", 7, values(json!({"unit_price": null, "notes": ""})))
        .unwrap();
    assert!(cleared.value("unit_price").is_none());
    assert!(cleared.value("notes").is_none());
    assert_eq!(cleared.value("total_amount"), Some(&FieldValue::Number(0.0)));
}

#[timeout(1000)]
#[test]
fn test_calculated_write_rejected_and_record_unchanged() {
    let (_, records) = setup();
    let before = records
        .upsert("bramawi", 1, values(json!({"num_bundles": 3, "unit_price": 120})))
        .unwrap();

    let err = records
        .upsert("bramawi", 1, values(json!({"num_bundles": 5, "total_amount": 1})))
        .unwrap_err();
    assert_eq!(
        err,
        FieldError::CalculatedFieldWriteRejected {
            page_type: "bramawi".to_string(),
            name: "total_amount".to_string(),
        }
    );
    assert_eq!(records.get("bramawi", 1).unwrap(), before);
}

#[timeout(1000)]
#[test]
fn test_unknown_names_and_page_types_rejected() {
    let (_, records) = setup();

    let err = records
        .upsert("bramawi", 1, values(json!({"colour": "red"})))
        .unwrap_err();
    assert_eq!(
        err,
        FieldError::UnknownField {
            page_type: "bramawi".to_string(),
            name: "colour".to_string(),
        }
    );

    let err = records
        .upsert("mosques", 1, values(json!({"notes": "x"})))
        .unwrap_err();
    assert_eq!(
        err,
        FieldError::UnknownPageType {
            page_type: "mosques".to_string(),
        }
    );
    assert!(records.list("bramawi").unwrap().is_empty());
}

#[timeout(1000)]
#[test]
fn test_values_coerced_per_type() {
    let (_, records) = setup();
    let record = records
        .upsert(
            "bramawi",
            2,
            values(json!({
                "status": "paid",
                "delivered_on": "2024-03-01",
                "supplier_site": "https://example.org/suppliers/4",
                "notes": 42
            })),
        )
        .unwrap();

    assert_eq!(record.value("status"), Some(&FieldValue::Text("paid".to_string())));
    assert_eq!(
        record.value("delivered_on"),
        Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
    );
    assert_eq!(record.value("notes"), Some(&FieldValue::Text("42".to_string())));

    let rejected = [
        json!({"num_bundles": "many"}),
        json!({"num_bundles": true}),
        json!({"status": "void"}),
        json!({"delivered_on": "01/03/2024"}),
        json!({"supplier_site": "example.org"}),
        json!({"supplier_site": "ftp://example.org"}),
    ];
    for raw in rejected {
        let err = records.upsert("bramawi", 2, values(raw.clone())).unwrap_err();
        assert!(
            matches!(err, FieldError::InvalidValueForType { .. }),
            "{} accepted: {:?}",
            raw,
            err
        );
    }
    assert_eq!(records.get("bramawi", 2).unwrap(), record);
}

#[timeout(1000)]
#[test]
fn test_required_field_enforced_after_merge() {
    let store = Store::shared_handle(StoreConfig::default());
    let registry = FieldDefinitionRegistry::new(Arc::clone(&store));
    registry
        .define_all(vec![
            NewField::new("mosques", "name", FieldType::Text).required(),
            NewField::new("mosques", "city", FieldType::Location),
        ])
        .unwrap();
    let records = RecordStore::new(store);

    let err = records
        .upsert("mosques", 1, values(json!({"city": "Kano"})))
        .unwrap_err();
    assert_eq!(
        err,
        FieldError::RequiredFieldMissing {
            page_type: "mosques".to_string(),
            name: "name".to_string(),
        }
    );

    records
        .upsert("mosques", 1, values(json!({"name": "Central", "city": "Kano"})))
        .unwrap();
    // Partial update without the required field keeps the stored value
    records
        .upsert("mosques", 1, values(json!({"city": "Zaria"})))
        .unwrap();
    assert!(records
        .upsert("mosques", 1, values(json!({"name": null})))
        .is_err());
}

#[timeout(1000)]
#[test]
fn test_get_delete_and_list() {
    let (_, records) = setup();
    for id in [3, 1, 2] {
        records
            .upsert("bramawi", id, values(json!({"num_bundles": id})))
            .unwrap();
    }

    let ids: Vec<u64> = records.list("bramawi").unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    records.delete("bramawi", 2).unwrap();
    assert_eq!(
        records.get("bramawi", 2).unwrap_err(),
        FieldError::RecordNotFound {
            page_type: "bramawi".to_string(),
            record_id: 2,
        }
    );
    assert!(records.delete("bramawi", 2).is_err());
    assert_eq!(records.list("bramawi").unwrap().len(), 2);
}

#[timeout(1000)]
#[test]
fn test_deleted_field_values_hidden_but_preserved() {
    let (registry, records) = setup();
    records
        .upsert("bramawi", 1, values(json!({"num_bundles": 2, "notes": "keep me"})))
        .unwrap();

    registry.delete("bramawi", "notes").unwrap();
    let record = records
        .upsert("bramawi", 1, values(json!({"unit_price": 5})))
        .unwrap();
    assert!(record.value("notes").is_none());
    assert_eq!(record.value("total_amount"), Some(&FieldValue::Number(10.0)));

    let stored = |records: &RecordStore| {
        records
            .store
            .records()
            .read()
            .unwrap()
            .rows
            .get(&RecordKey::new("bramawi", 1))
            .map(|row| row.record_data.contains_key("notes"))
            .unwrap()
    };
    assert!(stored(&records));

    // Defining the name again drops the dead value instead of reviving it
    registry
        .define(NewField::new("bramawi", "notes", FieldType::Text))
        .unwrap();
    assert!(!stored(&records));
    assert!(records.get("bramawi", 1).unwrap().value("notes").is_none());
}

#[timeout(1000)]
#[test]
fn test_reused_name_as_calculated_holds_engine_output() {
    let (registry, records) = setup();
    records
        .upsert("bramawi", 1, values(json!({"num_bundles": 2, "notes": "keep me"})))
        .unwrap();
    registry.delete("bramawi", "notes").unwrap();

    registry
        .define(NewField::calculated(
            "bramawi",
            "notes",
            "num_bundles * 2",
            &["num_bundles"],
        ))
        .unwrap();
    assert!(records.get("bramawi", 1).unwrap().value("notes").is_none());

    let record = records
        .upsert("bramawi", 1, values(json!({"unit_price": 7})))
        .unwrap();
    assert_eq!(record.value("notes"), Some(&FieldValue::Number(4.0)));
}

#[timeout(1000)]
#[test]
fn test_text_in_calculated_column_not_surfaced() {
    let (registry, _records) = setup();
    let schema = registry.page_schema("bramawi").unwrap();
    let mut data = serde_json::Map::new();
    data.insert("total_amount".to_string(), json!("stale"));
    data.insert("num_bundles".to_string(), json!(3));

    let decoded = decode_document(&data, &schema);
    assert!(!decoded.contains_key("total_amount"));
    assert_eq!(decoded["num_bundles"], FieldValue::Number(3.0));
}

#[timeout(1000)]
#[test]
fn test_recompute_page_backfills_new_calculated_field() {
    let (registry, records) = setup();
    records
        .upsert("bramawi", 1, values(json!({"num_bundles": 2, "unit_price": 10})))
        .unwrap();
    records
        .upsert("bramawi", 2, values(json!({"num_bundles": 1, "unit_price": 4})))
        .unwrap();

    registry
        .define(NewField::calculated(
            "bramawi",
            "with_fee",
            "total_amount + 1",
            &["total_amount"],
        ))
        .unwrap();
    assert!(records.get("bramawi", 1).unwrap().value("with_fee").is_none());

    assert_eq!(records.recompute_page("bramawi").unwrap(), 2);
    assert_eq!(
        records.get("bramawi", 1).unwrap().value("with_fee"),
        Some(&FieldValue::Number(21.0))
    );
    assert_eq!(records.recompute_page("bramawi").unwrap(), 0);
}

#[timeout(1000)]
#[test]
fn test_eav_and_document_shapes_agree() {
    let (registry, records) = setup();
    let record = records
        .upsert(
            "bramawi",
            9,
            values(json!({
                "num_bundles": 10,
                "unit_price": 2.5,
                "status": "open",
                "delivered_on": "2024-01-31",
                "notes": "gate 2"
            })),
        )
        .unwrap();
    let schema = registry.page_schema("bramawi").unwrap();

    let rows = to_eav(record.id, &record.values, &schema).unwrap();
    assert_eq!(rows.len(), record.values.len());
    assert!(rows.windows(2).all(|w| w[0].field_id < w[1].field_id));
    assert_eq!(from_eav(record.id, &rows, &schema).unwrap(), record.values);

    let mut duplicated = rows.clone();
    duplicated.push(rows[0].clone());
    assert!(matches!(
        from_eav(record.id, &duplicated, &schema),
        Err(FieldError::DataCorruption(_))
    ));
}

#[timeout(1000)]
#[test]
fn test_shapes_agree_after_type_rewrite() {
    use crate::migration::{MigrationStep, SchemaMigrator};

    let (registry, records) = setup();
    records
        .upsert("bramawi", 4, values(json!({"notes": "12"})))
        .unwrap();

    SchemaMigrator::new(Arc::clone(&records.store))
        .apply(MigrationStep::new("notes_are_numbers").rewrite(FieldType::Text, FieldType::Number))
        .unwrap();

    let record = records.get("bramawi", 4).unwrap();
    assert_eq!(record.value("notes"), Some(&FieldValue::Number(12.0)));

    let schema = registry.page_schema("bramawi").unwrap();
    let rows = to_eav(record.id, &record.values, &schema).unwrap();
    assert_eq!(from_eav(record.id, &rows, &schema).unwrap(), record.values);
}
