//! Reference preservation: shared objects, cycles, string identity.

use std::sync::Arc;

use shapepack::{ErrorCode, MessagePackSerializer, ReferencePreservation};
use shapepack_codec::PackWriter;
use shapepack_core::{
    Construction, MemberShape, ObjectShape, Record, RecordRef, ScalarKind, SequenceShape, ShapeId,
    ShapeKind, ShapeRegistry, Value,
};

/// The default object-reference extension code byte.
const OBJECT_REF: i8 = -101;

fn item_list_registry() -> (Arc<ShapeRegistry>, ShapeId) {
    let mut builder = ShapeRegistry::builder();
    let string = builder.register("string", ShapeKind::Scalar(ScalarKind::Str));
    let item = builder.register(
        "Item",
        ShapeKind::Object(ObjectShape::new(vec![MemberShape::new("name", string)])),
    );
    let list = builder.register("Item[]", ShapeKind::Sequence(SequenceShape::new(item)));
    (builder.build(), list)
}

fn node_registry(construction: Construction) -> (Arc<ShapeRegistry>, ShapeId) {
    let mut builder = ShapeRegistry::builder();
    let node = builder.declare("Node");
    let next = builder.register("Node?", ShapeKind::Nullable(node));
    let mut object = ObjectShape::new(vec![MemberShape::new("next", next).nullable()]);
    object.construction = construction;
    builder.define(node, ShapeKind::Object(object));
    (builder.build(), node)
}

// =============================================================================
// Shared objects (DAGs)
// =============================================================================

#[test]
fn repeated_object_becomes_a_reference_extension() {
    let (registry, list) = item_list_registry();
    let serializer = MessagePackSerializer::new()
        .with_preserve_references(ReferencePreservation::RejectCycles);

    let item = Record::with_fields("Item", [("name", Value::from("x"))]).into_ref();
    let value = Value::Array(vec![Value::Record(item.clone()), Value::Record(item)]);
    let bytes = serializer.serialize(&registry, list, &value).unwrap();

    let mut expected = PackWriter::new();
    expected.write_array_header(2);
    expected.write_map_header(1);
    expected.write_str("name");
    expected.write_str("x");
    expected.write_ext(OBJECT_REF, &[0]);
    assert_eq!(bytes, expected.into_vec());

    let decoded = serializer.deserialize(&registry, list, &bytes).unwrap();
    let elements = decoded.as_array().unwrap();
    let (a, b) = (
        elements[0].as_record().unwrap(),
        elements[1].as_record().unwrap(),
    );
    assert!(RecordRef::ptr_eq(a, b));
}

#[test]
fn distinct_objects_each_get_a_body() {
    let (registry, list) = item_list_registry();
    let serializer = MessagePackSerializer::new()
        .with_preserve_references(ReferencePreservation::RejectCycles);

    let a = Record::with_fields("Item", [("name", Value::from("a"))]).into_value();
    let b = Record::with_fields("Item", [("name", Value::from("b"))]).into_value();
    let bytes = serializer
        .serialize(&registry, list, &Value::Array(vec![a, b]))
        .unwrap();
    // No extension markers anywhere: two full map bodies.
    assert!(!bytes.contains(&0xd4));
    let decoded = serializer.deserialize(&registry, list, &bytes).unwrap();
    let elements = decoded.as_array().unwrap();
    assert!(!RecordRef::ptr_eq(
        elements[0].as_record().unwrap(),
        elements[1].as_record().unwrap()
    ));
}

#[test]
fn references_off_duplicates_bodies() {
    let (registry, list) = item_list_registry();
    let serializer = MessagePackSerializer::new();

    let item = Record::with_fields("Item", [("name", Value::from("x"))]).into_ref();
    let value = Value::Array(vec![Value::Record(item.clone()), Value::Record(item)]);
    let bytes = serializer.serialize(&registry, list, &value).unwrap();
    let decoded = serializer.deserialize(&registry, list, &bytes).unwrap();
    let elements = decoded.as_array().unwrap();
    assert!(!RecordRef::ptr_eq(
        elements[0].as_record().unwrap(),
        elements[1].as_record().unwrap()
    ));
}

// =============================================================================
// Cycles
// =============================================================================

#[test]
fn reject_cycles_fails_on_encode() {
    let (registry, node) = node_registry(Construction::Mutable);
    let serializer = MessagePackSerializer::new()
        .with_preserve_references(ReferencePreservation::RejectCycles);

    let a = Record::new("Node").into_ref();
    let b = Record::new("Node").into_ref();
    a.write().set("next", Value::Record(b.clone()));
    b.write().set("next", Value::Record(a.clone()));

    let err = serializer
        .serialize(&registry, node, &Value::Record(a))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnorderableCycle);
}

#[test]
fn allow_cycles_round_trips_two_phase_nodes() {
    let (registry, node) = node_registry(Construction::Mutable);
    let serializer = MessagePackSerializer::new()
        .with_preserve_references(ReferencePreservation::AllowCycles);

    let a = Record::new("Node").into_ref();
    let b = Record::new("Node").into_ref();
    a.write().set("next", Value::Record(b.clone()));
    b.write().set("next", Value::Record(a.clone()));

    let bytes = serializer
        .serialize(&registry, node, &Value::Record(a))
        .unwrap();
    let decoded = serializer.deserialize(&registry, node, &bytes).unwrap();

    let a2 = decoded.as_record().unwrap().clone();
    let next = a2.read().get("next").cloned().unwrap();
    let b2 = next.as_record().unwrap().clone();
    let back = b2.read().get("next").cloned().unwrap();
    assert!(RecordRef::ptr_eq(back.as_record().unwrap(), &a2));
}

#[test]
fn single_phase_cycles_are_unorderable() {
    let (registry, node) = node_registry(Construction::Parameterized);
    let serializer = MessagePackSerializer::new()
        .with_preserve_references(ReferencePreservation::AllowCycles);

    let a = Record::new("Node").into_ref();
    let b = Record::new("Node").into_ref();
    a.write().set("next", Value::Record(b.clone()));
    b.write().set("next", Value::Record(a.clone()));

    let bytes = serializer
        .serialize(&registry, node, &Value::Record(a))
        .unwrap();
    let err = serializer.deserialize(&registry, node, &bytes).unwrap_err();
    assert_eq!(err.code, ErrorCode::UnorderableCycle);
}

#[test]
fn self_cycle_round_trips() {
    let (registry, node) = node_registry(Construction::Mutable);
    let serializer = MessagePackSerializer::new()
        .with_preserve_references(ReferencePreservation::AllowCycles);

    let a = Record::new("Node").into_ref();
    a.write().set("next", Value::Record(a.clone()));
    let bytes = serializer
        .serialize(&registry, node, &Value::Record(a))
        .unwrap();
    let decoded = serializer.deserialize(&registry, node, &bytes).unwrap();
    let a2 = decoded.as_record().unwrap().clone();
    let next = a2.read().get("next").cloned().unwrap();
    assert!(RecordRef::ptr_eq(next.as_record().unwrap(), &a2));
}

// =============================================================================
// String identity and interning
// =============================================================================

#[test]
fn string_identity_round_trips_shared_allocations() {
    let mut builder = ShapeRegistry::builder();
    let string = builder.register("string", ShapeKind::Scalar(ScalarKind::Str));
    let list = builder.register("string[]", ShapeKind::Sequence(SequenceShape::new(string)));
    let registry = builder.build();
    let serializer = MessagePackSerializer::new()
        .with_preserve_references(ReferencePreservation::RejectCycles)
        .with_preserve_string_identity(true);

    let shared: Arc<str> = Arc::from("repeated");
    let value = Value::Array(vec![
        Value::Str(shared.clone()),
        Value::Str(shared),
        Value::from("other"),
    ]);
    let bytes = serializer.serialize(&registry, list, &value).unwrap();
    // The repeat is an object-reference extension, not a second body.
    let mut expected = PackWriter::new();
    expected.write_array_header(3);
    expected.write_str("repeated");
    expected.write_ext(OBJECT_REF, &[0]);
    expected.write_str("other");
    assert_eq!(bytes, expected.into_vec());

    let decoded = serializer.deserialize(&registry, list, &bytes).unwrap();
    let elements = decoded.as_array().unwrap();
    match (&elements[0], &elements[1]) {
        (Value::Str(x), Value::Str(y)) => assert!(Arc::ptr_eq(x, y)),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn reference_preservation_wins_over_interning_on_the_wire() {
    let mut builder = ShapeRegistry::builder();
    let string = builder.register("string", ShapeKind::Scalar(ScalarKind::Str));
    let list = builder.register("string[]", ShapeKind::Sequence(SequenceShape::new(string)));
    let registry = builder.build();
    let serializer = MessagePackSerializer::new()
        .with_preserve_references(ReferencePreservation::RejectCycles)
        .with_preserve_string_identity(true)
        .with_intern_strings(true);

    let shared: Arc<str> = Arc::from("x");
    let value = Value::Array(vec![Value::Str(shared.clone()), Value::Str(shared)]);
    let bytes = serializer.serialize(&registry, list, &value).unwrap();
    // fixext1 with the object-reference code: the wire carries a back
    // reference, not a re-encoded (interned) body.
    assert_eq!(bytes[2 + "x".len()], 0xd4);
    assert_eq!(bytes[3 + "x".len()] as i8, OBJECT_REF);
}

#[test]
fn interning_shares_allocations_without_reference_wire_forms() {
    let mut builder = ShapeRegistry::builder();
    let string = builder.register("string", ShapeKind::Scalar(ScalarKind::Str));
    let list = builder.register("string[]", ShapeKind::Sequence(SequenceShape::new(string)));
    let registry = builder.build();
    let serializer = MessagePackSerializer::new().with_intern_strings(true);

    let value = Value::Array(vec![Value::from("dup"), Value::from("dup")]);
    let bytes = serializer.serialize(&registry, list, &value).unwrap();
    // Two plain string bodies on the wire.
    let mut expected = PackWriter::new();
    expected.write_array_header(2);
    expected.write_str("dup");
    expected.write_str("dup");
    assert_eq!(bytes, expected.into_vec());

    let decoded = serializer.deserialize(&registry, list, &bytes).unwrap();
    let elements = decoded.as_array().unwrap();
    match (&elements[0], &elements[1]) {
        (Value::Str(x), Value::Str(y)) => assert!(Arc::ptr_eq(x, y)),
        other => panic!("unexpected {other:?}"),
    }
}
