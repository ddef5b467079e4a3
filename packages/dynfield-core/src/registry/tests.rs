use super::*;
use crate::config::StoreConfig;
use crate::persistence::FieldRow;
use ntest::timeout;

fn registry() -> FieldDefinitionRegistry {
    FieldDefinitionRegistry::new(Store::shared_handle(StoreConfig::default()))
}

fn bramawi_fields() -> Vec<NewField> {
    vec![
        NewField::new("bramawi", "num_bundles", FieldType::Number).display_order(1),
        NewField::new("bramawi", "unit_price", FieldType::Number).display_order(2),
        NewField::calculated(
            "bramawi",
            "total_amount",
            "num_bundles * unit_price",
            &["num_bundles", "unit_price"],
        )
        .display_order(3),
    ]
}

#[timeout(1000)]
#[test]
fn test_define_assigns_ids_and_lists_in_display_order() {
    let registry = registry();
    let status = registry
        .define(
            NewField::new("mosques", "status", FieldType::Select)
                .options(&["planned", "built"])
                .display_order(5),
        )
        .unwrap();
    let name = registry
        .define(NewField::new("mosques", "name", FieldType::Text).display_order(1))
        .unwrap();
    let notes = registry
        .define(NewField::new("mosques", "notes", FieldType::Text).display_order(5))
        .unwrap();

    assert_eq!(status.id, 1);
    assert_eq!(name.id, 2);
    assert_eq!(notes.id, 3);

    let listed: Vec<String> = registry
        .list_fields("mosques")
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    // display_order ties are broken by id
    assert_eq!(listed, vec!["name", "status", "notes"]);
    assert!(registry.list_fields("expenses").unwrap().is_empty());
}

#[timeout(1000)]
#[test]
fn test_define_round_trips_serialized_lists() {
    let registry = registry();
    registry.define_all(bramawi_fields()).unwrap();
    let status = registry
        .define(NewField::new("bramawi", "status", FieldType::Select).options(&["open", "paid", "void"]))
        .unwrap();

    let by_name = registry.fields_by_name("bramawi").unwrap();
    assert_eq!(by_name["status"], status);

    let status_row = FieldRow::from_definition(&by_name["status"]).unwrap();
    assert_eq!(status_row.options.as_deref(), Some(r#"["open","paid","void"]"#));

    let total_row = FieldRow::from_definition(&by_name["total_amount"]).unwrap();
    assert_eq!(
        total_row.dependent_fields.as_deref(),
        Some(r#"["num_bundles","unit_price"]"#)
    );
    assert_eq!(total_row.into_definition().unwrap(), by_name["total_amount"]);
}

#[timeout(1000)]
#[test]
fn test_duplicate_name_rejected_within_page_type_only() {
    let registry = registry();
    registry
        .define(NewField::new("expenses", "amount", FieldType::Number))
        .unwrap();

    let err = registry
        .define(NewField::new("expenses", "amount", FieldType::Text))
        .unwrap_err();
    assert_eq!(
        err,
        FieldError::DuplicateFieldName {
            page_type: "expenses".to_string(),
            name: "amount".to_string(),
        }
    );

    // Same name under another page type is a different field
    registry
        .define(NewField::new("distributions", "amount", FieldType::Number))
        .unwrap();
}

#[timeout(1000)]
#[test]
fn test_type_shape_consistency() {
    let registry = registry();

    let err = registry
        .define(NewField::new("expenses", "kind", FieldType::Select))
        .unwrap_err();
    assert!(matches!(err, FieldError::InvalidFieldDefinition { .. }));

    let err = registry
        .define(NewField::new("expenses", "memo", FieldType::Text).options(&["a"]))
        .unwrap_err();
    assert!(matches!(err, FieldError::InvalidFieldDefinition { .. }));

    let mut with_formula = NewField::new("expenses", "memo", FieldType::Number);
    with_formula.calculation_formula = Some("1 + 1".to_string());
    assert!(matches!(
        registry.define(with_formula).unwrap_err(),
        FieldError::InvalidFieldDefinition { .. }
    ));

    let err = registry
        .define(NewField::new("expenses", "2nd amount", FieldType::Number))
        .unwrap_err();
    assert!(matches!(err, FieldError::InvalidFieldDefinition { .. }));

    assert!(registry.list_fields("expenses").unwrap().is_empty());
}

#[timeout(1000)]
#[test]
fn test_type_outside_constraint_rejected() {
    let config = StoreConfig {
        allowed_types: [FieldType::Text, FieldType::Number].into_iter().collect(),
        ..Default::default()
    };
    let registry = FieldDefinitionRegistry::new(Store::shared_handle(config));

    let err = registry
        .define(NewField::new("expenses", "site", FieldType::Url))
        .unwrap_err();
    assert_eq!(
        err,
        FieldError::InvalidType {
            page_type: "expenses".to_string(),
            name: "site".to_string(),
            field_type: "url".to_string(),
        }
    );
}

#[timeout(1000)]
#[test]
fn test_formula_referencing_undeclared_dependency_rejected() {
    let registry = registry();
    registry
        .define_all(vec![
            NewField::new("expenses", "a", FieldType::Number),
            NewField::new("expenses", "b", FieldType::Number),
        ])
        .unwrap();

    let err = registry
        .define(NewField::calculated("expenses", "total", "a * b", &["a"]))
        .unwrap_err();
    assert_eq!(
        err,
        FieldError::FormulaReferencesUndeclaredDependency {
            page_type: "expenses".to_string(),
            name: "total".to_string(),
            reference: "b".to_string(),
        }
    );
    assert!(registry.fields_by_name("expenses").unwrap().get("total").is_none());
}

#[timeout(1000)]
#[test]
fn test_dependency_on_undefined_field_rejected() {
    let registry = registry();
    registry
        .define(NewField::new("expenses", "a", FieldType::Number))
        .unwrap();

    let err = registry
        .define(NewField::calculated("expenses", "total", "a * rate", &["a", "rate"]))
        .unwrap_err();
    assert_eq!(
        err,
        FieldError::UnknownField {
            page_type: "expenses".to_string(),
            name: "rate".to_string(),
        }
    );

    // A field of the same name under another page type does not count
    registry
        .define(NewField::new("mosques", "rate", FieldType::Number))
        .unwrap();
    assert!(registry
        .define(NewField::calculated("expenses", "total", "a * rate", &["a", "rate"]))
        .is_err());
}

#[timeout(1000)]
#[test]
fn test_self_reference_rejected() {
    let registry = registry();
    let err = registry
        .define(NewField::calculated("expenses", "x", "x + 1", &["x"]))
        .unwrap_err();
    assert!(matches!(err, FieldError::CyclicDependency { ref name, .. } if name == "x"));
}

#[timeout(1000)]
#[test]
fn test_mutual_dependency_rejected_in_batch() {
    let registry = registry();
    let err = registry
        .define_all(vec![
            NewField::calculated("expenses", "x", "y * 2", &["y"]),
            NewField::calculated("expenses", "y", "x / 2", &["x"]),
        ])
        .unwrap_err();

    match err {
        FieldError::CyclicDependency {
            page_type, cycle, ..
        } => {
            assert_eq!(page_type, "expenses");
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.contains(&"x".to_string()) && cycle.contains(&"y".to_string()));
        }
        other => panic!("expected CyclicDependency, got {:?}", other),
    }
    // Nothing from the failed batch was applied
    assert!(registry.list_fields("expenses").unwrap().is_empty());
}

#[timeout(1000)]
#[test]
fn test_mutual_dependency_rejected_after_redefinition() {
    let registry = registry();
    registry
        .define(NewField::new("expenses", "y", FieldType::Number))
        .unwrap();
    registry
        .define(NewField::calculated("expenses", "x", "y * 2", &["y"]))
        .unwrap();
    registry.delete("expenses", "y").unwrap();

    let err = registry
        .define(NewField::calculated("expenses", "y", "x / 2", &["x"]))
        .unwrap_err();
    assert!(matches!(err, FieldError::CyclicDependency { ref name, .. } if name == "y"));
}

#[timeout(1000)]
#[test]
fn test_batch_allows_forward_references() {
    let registry = registry();
    let defined = registry
        .define_all(vec![
            NewField::calculated("bramawi", "total", "subtotal + fee", &["subtotal", "fee"]),
            NewField::calculated("bramawi", "subtotal", "qty * price", &["qty", "price"]),
            NewField::new("bramawi", "qty", FieldType::Number),
            NewField::new("bramawi", "price", FieldType::Number),
            NewField::new("bramawi", "fee", FieldType::Number),
        ])
        .unwrap();
    assert_eq!(defined.len(), 5);
    assert_eq!(defined[0].name, "total");
}

#[timeout(1000)]
#[test]
fn test_delete_field() {
    let registry = registry();
    registry.define_all(bramawi_fields()).unwrap();

    let removed = registry.delete("bramawi", "unit_price").unwrap();
    assert_eq!(removed.name, "unit_price");
    assert!(registry.fields_by_name("bramawi").unwrap().get("unit_price").is_none());

    let err = registry.delete("bramawi", "unit_price").unwrap_err();
    assert_eq!(
        err,
        FieldError::FieldNotFound {
            page_type: "bramawi".to_string(),
            name: "unit_price".to_string(),
        }
    );

    // The name is free again
    registry
        .define(NewField::new("bramawi", "unit_price", FieldType::Number))
        .unwrap();
}

#[timeout(1000)]
#[test]
fn test_page_types_and_schema_snapshot() {
    let registry = registry();
    registry.define_all(bramawi_fields()).unwrap();
    registry
        .define(NewField::new("expenses", "memo", FieldType::Text))
        .unwrap();

    assert_eq!(registry.page_types().unwrap(), vec!["bramawi", "expenses"]);

    let schema = registry.page_schema("bramawi").unwrap();
    assert_eq!(schema.calculated().count(), 1);
    assert!(schema.formula("total_amount").is_some());
    assert!(schema.formula("num_bundles").is_none());
    assert!(registry.page_schema("unknown").unwrap().is_empty());
}
