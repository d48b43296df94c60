use super::*;

fn user_schema() -> Schema {
    Schema::builder()
        .add_attribute("name", AttributeType::Utf8Smallstring, false)
        .add_attribute("age", AttributeType::U8, true)
        .add_enum_attribute("power", ["ON", "OFF"], false)
        .add_index("byName", vec![IndexAttribute::ascending("name")], false)
        .add_index(
            "byPowerAge",
            vec![
                IndexAttribute::ascending("power"),
                IndexAttribute::new("age", SortDirection::Descending, AttributeTransform::None),
            ],
            true,
        )
        .build()
        .unwrap()
}

#[test]
fn test_lookup_by_name() {
    let schema = user_schema();

    assert_eq!(schema.attributes().len(), 3);
    assert_eq!(
        schema.attribute("age").unwrap().attribute_type,
        AttributeType::U8
    );
    assert!(schema.attribute("missing").is_none());
    assert!(schema.index("byPowerAge").unwrap().unique);
    assert!(matches!(
        schema.require_index("user", "nope"),
        Err(StoreError::SchemaMismatch(_))
    ));
}

#[test]
fn test_value_attributes_skip_id() {
    let schema = Schema::builder()
        .add_attribute("name", AttributeType::Utf8Text, false)
        .add_index(
            "nameThenId",
            vec![IndexAttribute::ascending("name"), IndexAttribute::ascending("id")],
            false,
        )
        .build()
        .unwrap();

    let names: Vec<_> = schema
        .index("nameThenId")
        .unwrap()
        .value_attributes()
        .map(|a| a.name.as_str())
        .collect();
    assert_eq!(names, ["name"]);
}

#[test]
fn test_rejects_invalid_schemas() {
    let cases = [
        Schema::builder()
            .add_attribute("id", AttributeType::U64, false)
            .build(),
        Schema::builder()
            .add_attribute("a", AttributeType::I32, false)
            .add_attribute("a", AttributeType::I64, false)
            .build(),
        Schema::builder()
            .add_attribute("p", AttributeType::Enum, false)
            .build(),
        Schema::builder()
            .add_attribute("a", AttributeType::I32, false)
            .add_index("ix", vec![IndexAttribute::ascending("b")], false)
            .build(),
        Schema::builder()
            .add_attribute("m", AttributeType::Map, false)
            .add_index("ix", vec![IndexAttribute::ascending("m")], false)
            .build(),
        Schema::builder()
            .add_attribute("a", AttributeType::I32, false)
            .add_index("ix", vec![IndexAttribute::ascending("id")], false)
            .build(),
        Schema::builder()
            .add_attribute("a", AttributeType::I32, false)
            .add_index("ix", vec![IndexAttribute::ascending("a")], false)
            .add_index("ix", vec![IndexAttribute::ascending("a")], true)
            .build(),
    ];

    for (i, case) in cases.into_iter().enumerate() {
        assert!(
            matches!(case, Err(StoreError::SchemaMismatch(_))),
            "case {i} should be rejected"
        );
    }
}

#[test]
fn test_enum_transforms_must_keep_declared_values() {
    let power_index = |transform| {
        Schema::builder()
            .add_enum_attribute("power", ["ON", "OFF"], false)
            .add_index(
                "byPower",
                vec![IndexAttribute::new("power", SortDirection::Ascending, transform)],
                false,
            )
            .build()
    };

    let err = power_index(AttributeTransform::Lowercase).unwrap_err();
    assert!(matches!(err, StoreError::SchemaMismatch(ref m) if m.contains("byPower")), "{err}");
    assert!(power_index(AttributeTransform::Uppercase).is_ok());
    assert!(power_index(AttributeTransform::None).is_ok());

    let lowered = Schema::builder()
        .attribute(
            Attribute::new("power", AttributeType::Enum, false)
                .with_values(["ON", "OFF"])
                .with_transform(AttributeTransform::Lowercase),
        )
        .build();
    assert!(matches!(lowered, Err(StoreError::SchemaMismatch(_))));

    // Mixed-case declarations survive only an identity column.
    let mixed = Schema::builder()
        .add_enum_attribute("mode", ["auto", "MANUAL"], false)
        .add_index(
            "byMode",
            vec![IndexAttribute::new(
                "mode",
                SortDirection::Ascending,
                AttributeTransform::Uppercase,
            )],
            false,
        )
        .build();
    assert!(matches!(mixed, Err(StoreError::SchemaMismatch(_))));
}

#[test]
fn test_json_round_trip_revalidates() {
    let schema = user_schema();
    let json = serde_json::to_string(&schema).unwrap();
    assert!(json.contains("\"UTF8_SMALLSTRING\""));
    assert_eq!(serde_json::from_str::<Schema>(&json).unwrap(), schema);

    let broken = r#"{"attributes":[{"name":"id","type":"U64"}],"indexes":[]}"#;
    assert!(serde_json::from_str::<Schema>(broken).is_err());
}

#[test]
fn test_transform_applies_to_text_only() {
    assert_eq!(
        AttributeTransform::Uppercase.apply(FieldValue::from("MiXed")),
        FieldValue::from("MIXED")
    );
    assert_eq!(
        AttributeTransform::Lowercase.apply(FieldValue::from("MiXed")),
        FieldValue::from("mixed")
    );
    assert_eq!(
        AttributeTransform::Uppercase.apply(FieldValue::Int(3)),
        FieldValue::Int(3)
    );
    assert_eq!(
        AttributeTransform::None.apply(FieldValue::from("MiXed")),
        FieldValue::from("MiXed")
    );
}

#[test]
fn test_field_value_from_json() {
    use serde_json::json;

    assert_eq!(FieldValue::from_json(&json!(null)), Some(FieldValue::Null));
    assert_eq!(FieldValue::from_json(&json!(-4)), Some(FieldValue::Int(-4)));
    assert_eq!(
        FieldValue::from_json(&json!(u64::MAX)),
        Some(FieldValue::UInt(u64::MAX))
    );
    assert_eq!(FieldValue::from_json(&json!("x")), Some(FieldValue::from("x")));
    assert_eq!(FieldValue::from_json(&json!(1.5)), None);
    assert_eq!(FieldValue::from_json(&json!([1])), None);
}
