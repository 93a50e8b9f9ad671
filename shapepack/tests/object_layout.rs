//! Object layout behavior: map vs array, default-value policies,
//! required members, duplicates, version-safe unused data, naming.

use std::sync::Arc;

use shapepack::{
    DeserializeDefaultValues, ErrorCode, MessagePackSerializer, NameConvention,
    SerializeDefaultValues,
};
use shapepack_codec::PackWriter;
use shapepack_core::{
    MemberShape, ObjectShape, Record, ScalarKind, ShapeId, ShapeKind, ShapeRegistry, Value,
};

/// `Person { Name: string?, Age: int, FavoriteColor: string = "Blue" }`.
fn person_registry() -> (Arc<ShapeRegistry>, ShapeId) {
    let mut builder = ShapeRegistry::builder();
    let string = builder.register("string", ShapeKind::Scalar(ScalarKind::Str));
    let int = builder.register("int", ShapeKind::Scalar(ScalarKind::Int));
    let person = builder.register(
        "Person",
        ShapeKind::Object(ObjectShape::new(vec![
            MemberShape::new("Name", string).nullable(),
            MemberShape::new("Age", int).value_kind(),
            MemberShape::new("FavoriteColor", string).with_default(Value::from("Blue")),
        ])),
    );
    (builder.build(), person)
}

fn person(name: &str, age: i64, color: &str) -> Value {
    Record::with_fields(
        "Person",
        [
            ("Name", Value::from(name)),
            ("Age", Value::Int(age)),
            ("FavoriteColor", Value::from(color)),
        ],
    )
    .into_value()
}

// =============================================================================
// Default-value policies
// =============================================================================

#[test]
fn never_policy_elides_defaults() {
    let (registry, shape) = person_registry();
    let serializer = MessagePackSerializer::new();

    let bytes = serializer
        .serialize(&registry, shape, &person("Andrew", 0, "Blue"))
        .unwrap();

    let mut expected = PackWriter::new();
    expected.write_map_header(1);
    expected.write_str("Name");
    expected.write_str("Andrew");
    assert_eq!(bytes, expected.into_vec());

    let decoded = serializer.deserialize(&registry, shape, &bytes).unwrap();
    assert_eq!(decoded, person("Andrew", 0, "Blue"));
}

#[test]
fn value_kinds_policy_keeps_value_members() {
    let (registry, shape) = person_registry();
    let serializer = MessagePackSerializer::new()
        .with_serialize_default_values(SerializeDefaultValues::VALUE_KINDS);

    let bytes = serializer
        .serialize(&registry, shape, &person("Andrew", 0, "Blue"))
        .unwrap();

    let mut expected = PackWriter::new();
    expected.write_map_header(2);
    expected.write_str("Name");
    expected.write_str("Andrew");
    expected.write_str("Age");
    expected.write_int(0);
    assert_eq!(bytes, expected.into_vec());
}

#[test]
fn always_policy_writes_everything() {
    let (registry, shape) = person_registry();
    let serializer = MessagePackSerializer::new()
        .with_serialize_default_values(SerializeDefaultValues::ALWAYS);
    let bytes = serializer
        .serialize(&registry, shape, &person("Andrew", 0, "Blue"))
        .unwrap();
    let decoded = serializer.deserialize(&registry, shape, &bytes).unwrap();
    assert_eq!(decoded, person("Andrew", 0, "Blue"));
    // Map of all three members.
    assert_eq!(bytes[0], 0x83);
}

// =============================================================================
// Array layout
// =============================================================================

/// `Person { [0] First, [2] Last }` — a keyed shape with a gap.
fn keyed_registry() -> (Arc<ShapeRegistry>, ShapeId) {
    let mut builder = ShapeRegistry::builder();
    let string = builder.register("string", ShapeKind::Scalar(ScalarKind::Str));
    let person = builder.register(
        "Person",
        ShapeKind::Object(ObjectShape::new(vec![
            MemberShape::new("First", string).with_key(0),
            MemberShape::new("Last", string).with_key(2),
        ])),
    );
    (builder.build(), person)
}

#[test]
fn keyed_shape_emits_array_with_nil_gaps() {
    let (registry, shape) = keyed_registry();
    let serializer = MessagePackSerializer::new();

    let value = Record::with_fields(
        "Person",
        [("First", Value::from("Andrew")), ("Last", Value::from("Arnott"))],
    )
    .into_value();
    let bytes = serializer.serialize(&registry, shape, &value).unwrap();

    let mut expected = PackWriter::new();
    expected.write_array_header(3);
    expected.write_str("Andrew");
    expected.write_nil();
    expected.write_str("Arnott");
    assert_eq!(bytes, expected.into_vec());
}

#[test]
fn longer_wire_array_ignores_extra_slots() {
    let (registry, shape) = keyed_registry();
    let serializer = MessagePackSerializer::new();

    let mut wire = PackWriter::new();
    wire.write_array_header(4);
    wire.write_str("A");
    wire.write_nil();
    wire.write_str("B");
    wire.write_str("C");
    let decoded = serializer
        .deserialize(&registry, shape, &wire.into_vec())
        .unwrap();
    assert_eq!(
        decoded,
        Record::with_fields(
            "Person",
            [("First", Value::from("A")), ("Last", Value::from("B"))],
        )
        .into_value()
    );
}

#[test]
fn sparse_keys_fall_back_to_map() {
    let mut builder = ShapeRegistry::builder();
    let string = builder.register("string", ShapeKind::Scalar(ScalarKind::Str));
    let sparse = builder.register(
        "Sparse",
        ShapeKind::Object(ObjectShape::new(vec![
            MemberShape::new("a", string).with_key(0),
            MemberShape::new("b", string).with_key(40),
        ])),
    );
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let value = Record::with_fields(
        "Sparse",
        [("a", Value::from("x")), ("b", Value::from("y"))],
    )
    .into_value();
    let bytes = serializer.serialize(&registry, sparse, &value).unwrap();
    // 39 holes blow the slack budget; the writer picks a 2-entry map.
    assert_eq!(bytes[0], 0x82);
    assert_eq!(serializer.deserialize(&registry, sparse, &bytes).unwrap(), value);
}

#[test]
fn map_with_integer_keys_decodes_by_member_key() {
    let (registry, shape) = keyed_registry();
    let serializer = MessagePackSerializer::new();

    let mut wire = PackWriter::new();
    wire.write_map_header(2);
    wire.write_int(2);
    wire.write_str("Arnott");
    wire.write_int(0);
    wire.write_str("Andrew");
    let decoded = serializer
        .deserialize(&registry, shape, &wire.into_vec())
        .unwrap();
    let record = decoded.as_record().unwrap().read();
    assert_eq!(record.get("First"), Some(&Value::from("Andrew")));
    assert_eq!(record.get("Last"), Some(&Value::from("Arnott")));
}

// =============================================================================
// Required members, nulls, duplicates
// =============================================================================

fn required_registry() -> (Arc<ShapeRegistry>, ShapeId) {
    let mut builder = ShapeRegistry::builder();
    let string = builder.register("string", ShapeKind::Scalar(ScalarKind::Str));
    let user = builder.register(
        "User",
        ShapeKind::Object(ObjectShape::new(vec![
            MemberShape::new("id", string).required(),
            MemberShape::new("email", string).required(),
            MemberShape::new("nickname", string).nullable(),
        ])),
    );
    (builder.build(), user)
}

#[test]
fn missing_required_members_fail_with_names() {
    let (registry, shape) = required_registry();
    let serializer = MessagePackSerializer::new();

    let err = serializer
        .deserialize(&registry, shape, &[0x80])
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingRequiredProperty);
    assert!(err.message.contains("id"));
    assert!(err.message.contains("email"));
}

#[test]
fn allow_missing_required_substitutes_defaults() {
    let (registry, shape) = required_registry();
    let serializer = MessagePackSerializer::new().with_deserialize_default_values(
        DeserializeDefaultValues::ALLOW_MISSING_REQUIRED,
    );
    let decoded = serializer.deserialize(&registry, shape, &[0x80]).unwrap();
    let record = decoded.as_record().unwrap().read();
    assert_eq!(record.get("id"), Some(&Value::Nil));
}

#[test]
fn nil_for_non_nullable_fails() {
    let (registry, shape) = required_registry();
    let serializer = MessagePackSerializer::new();

    let mut wire = PackWriter::new();
    wire.write_map_header(2);
    wire.write_str("id");
    wire.write_nil();
    wire.write_str("email");
    wire.write_str("x@y");
    let err = serializer
        .deserialize(&registry, shape, &wire.into_vec())
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::DisallowedNullValue);
}

#[test]
fn duplicate_member_name_fails() {
    let (registry, shape) = person_registry();
    let serializer = MessagePackSerializer::new();

    let mut wire = PackWriter::new();
    wire.write_map_header(2);
    wire.write_str("Name");
    wire.write_str("a");
    wire.write_str("Name");
    wire.write_str("b");
    let err = serializer
        .deserialize(&registry, shape, &wire.into_vec())
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::DuplicateProperty);
}

// =============================================================================
// Version-safe unused data
// =============================================================================

#[test]
fn unused_members_round_trip_verbatim() {
    let mut builder = ShapeRegistry::builder();
    let string = builder.register("string", ShapeKind::Scalar(ScalarKind::Str));
    let v1 = builder.register(
        "Widget",
        ShapeKind::Object(ObjectShape::new(vec![MemberShape::new("name", string)]).version_safe()),
    );
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    // A newer producer wrote two members this shape does not know.
    let mut wire = PackWriter::new();
    wire.write_map_header(3);
    wire.write_str("name");
    wire.write_str("gadget");
    wire.write_str("size");
    wire.write_int(42);
    wire.write_str("tags");
    wire.write_array_header(2);
    wire.write_str("a");
    wire.write_str("b");
    let wire = wire.into_vec();

    let decoded = serializer.deserialize(&registry, v1, &wire).unwrap();
    {
        let record = decoded.as_record().unwrap().read();
        let unused = record.unused.as_ref().unwrap();
        assert_eq!(unused.map_entries.len(), 2);
    }
    let re_encoded = serializer.serialize(&registry, v1, &decoded).unwrap();
    assert_eq!(re_encoded, wire);
}

#[test]
fn non_version_safe_shapes_drop_unknown_members() {
    let mut builder = ShapeRegistry::builder();
    let string = builder.register("string", ShapeKind::Scalar(ScalarKind::Str));
    let v1 = builder.register(
        "Widget",
        ShapeKind::Object(ObjectShape::new(vec![MemberShape::new("name", string)])),
    );
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let mut wire = PackWriter::new();
    wire.write_map_header(2);
    wire.write_str("name");
    wire.write_str("gadget");
    wire.write_str("size");
    wire.write_int(42);
    let decoded = serializer
        .deserialize(&registry, v1, &wire.into_vec())
        .unwrap();
    let record = decoded.as_record().unwrap().read();
    assert!(record.unused.is_none());
}

// =============================================================================
// Naming
// =============================================================================

#[test]
fn name_convention_applies_to_wire_names() {
    let (registry, shape) = person_registry();
    let serializer =
        MessagePackSerializer::new().with_property_name_convention(NameConvention::CamelCase);

    let bytes = serializer
        .serialize(&registry, shape, &person("Andrew", 1, "Red"))
        .unwrap();
    let mut expected = PackWriter::new();
    expected.write_map_header(3);
    expected.write_str("name");
    expected.write_str("Andrew");
    expected.write_str("age");
    expected.write_int(1);
    expected.write_str("favoriteColor");
    expected.write_str("Red");
    assert_eq!(bytes, expected.into_vec());

    // And the transformed names resolve on the way back in.
    let decoded = serializer
        .deserialize(&registry, shape, &expected_bytes(&serializer, &registry, shape))
        .unwrap();
    assert_eq!(decoded, person("Andrew", 1, "Red"));
}

fn expected_bytes(
    serializer: &MessagePackSerializer,
    registry: &Arc<ShapeRegistry>,
    shape: ShapeId,
) -> Vec<u8> {
    serializer
        .serialize(registry, shape, &person("Andrew", 1, "Red"))
        .unwrap()
}
