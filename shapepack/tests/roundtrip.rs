//! End-to-end round-trips across the shape kinds, with byte-level golden
//! checks against hand-assembled MessagePack.

use std::sync::Arc;

use shapepack::{MessagePackSerializer, MultiDimFormat, ErrorCode};
use shapepack_codec::PackWriter;
use shapepack_core::{
    DateTimeKind, EnumCase, EnumShape, MapShape, MemberShape, ObjectShape, Record, ScalarKind,
    SequenceShape, ShapeId, ShapeKind, ShapeRegistry, ShapeRegistryBuilder, Timestamp, Value,
};

fn scalar(builder: &mut ShapeRegistryBuilder, name: &str, kind: ScalarKind) -> ShapeId {
    builder.register(name, ShapeKind::Scalar(kind))
}

// =============================================================================
// Scalars
// =============================================================================

#[test]
fn scalar_round_trips() {
    let mut builder = ShapeRegistry::builder();
    let int = scalar(&mut builder, "int", ScalarKind::Int);
    let uint = scalar(&mut builder, "uint", ScalarKind::UInt);
    let boolean = scalar(&mut builder, "bool", ScalarKind::Bool);
    let string = scalar(&mut builder, "string", ScalarKind::Str);
    let f64_shape = scalar(&mut builder, "f64", ScalarKind::F64);
    let bin = scalar(&mut builder, "bin", ScalarKind::Bin);
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let cases = [
        (int, Value::Int(-12345)),
        (int, Value::Int(0)),
        (uint, Value::UInt(u64::MAX)),
        (boolean, Value::Bool(true)),
        (string, Value::from("héllo")),
        (f64_shape, Value::F64(2.5)),
        (bin, Value::Bin(vec![1, 2, 3])),
    ];
    for (shape, value) in cases {
        let bytes = serializer.serialize(&registry, shape, &value).unwrap();
        let back = serializer.deserialize(&registry, shape, &bytes).unwrap();
        assert_eq!(back, value);
    }
}

#[test]
fn extension_scalars_round_trip() {
    let mut builder = ShapeRegistry::builder();
    let i128_shape = scalar(&mut builder, "i128", ScalarKind::I128);
    let u128_shape = scalar(&mut builder, "u128", ScalarKind::U128);
    let decimal = scalar(&mut builder, "decimal", ScalarKind::Decimal);
    let guid = scalar(&mut builder, "guid", ScalarKind::Uuid);
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let cases = [
        (i128_shape, Value::I128(i128::MIN + 7)),
        (u128_shape, Value::U128(u128::MAX - 9)),
        (
            decimal,
            Value::Decimal("123.456".parse().unwrap()),
        ),
        (
            guid,
            Value::Uuid("67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap()),
        ),
    ];
    for (shape, value) in cases {
        let bytes = serializer.serialize(&registry, shape, &value).unwrap();
        let back = serializer.deserialize(&registry, shape, &bytes).unwrap();
        assert_eq!(back, value);
    }
}

#[test]
fn guid_accepts_bin_and_string_variants() {
    let mut builder = ShapeRegistry::builder();
    let guid = scalar(&mut builder, "guid", ScalarKind::Uuid);
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let value: uuid::Uuid = "67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap();

    // bin body in little-endian field order.
    let mut writer = PackWriter::new();
    writer.write_bin(&value.to_bytes_le());
    let decoded = serializer
        .deserialize(&registry, guid, &writer.into_vec())
        .unwrap();
    assert_eq!(decoded, Value::Uuid(value));

    // Recognized string form.
    let mut writer = PackWriter::new();
    writer.write_str("67e55044-10b1-426f-9247-bb680e5fe0c8");
    let decoded = serializer
        .deserialize(&registry, guid, &writer.into_vec())
        .unwrap();
    assert_eq!(decoded, Value::Uuid(value));
}

#[test]
fn decimal_accepts_string_form() {
    let mut builder = ShapeRegistry::builder();
    let decimal = scalar(&mut builder, "decimal", ScalarKind::Decimal);
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let mut writer = PackWriter::new();
    writer.write_str("-7.25");
    let decoded = serializer
        .deserialize(&registry, decimal, &writer.into_vec())
        .unwrap();
    assert_eq!(decoded, Value::Decimal("-7.25".parse().unwrap()));
}

// =============================================================================
// Timestamps
// =============================================================================

#[test]
fn utc_timestamp_uses_standard_extension() {
    let mut builder = ShapeRegistry::builder();
    let ts = scalar(&mut builder, "timestamp", ScalarKind::Timestamp);
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let value = Value::Timestamp(Timestamp::utc(1_700_000_000, 500));
    let bytes = serializer.serialize(&registry, ts, &value).unwrap();
    // fixext8, type -1.
    assert_eq!(bytes[0], 0xd7);
    assert_eq!(bytes[1], 0xff);
    let back = serializer.deserialize(&registry, ts, &bytes).unwrap();
    assert_eq!(back, value);
}

#[test]
fn hi_fi_escapes_local_times() {
    let mut builder = ShapeRegistry::builder();
    let ts = scalar(&mut builder, "timestamp", ScalarKind::Timestamp);
    let registry = builder.build();
    let serializer = MessagePackSerializer::new().with_hi_fi_datetime(true);

    let local = Timestamp::with_kind(86_400, 250, DateTimeKind::Local);
    let bytes = serializer
        .serialize(&registry, ts, &Value::Timestamp(local))
        .unwrap();
    // A 2-tuple, not an extension.
    assert_eq!(bytes[0], 0x92);
    let back = serializer.deserialize(&registry, ts, &bytes).unwrap();
    assert_eq!(back, Value::Timestamp(local));
}

// =============================================================================
// Enums
// =============================================================================

fn color_registry() -> (Arc<ShapeRegistry>, ShapeId) {
    let mut builder = ShapeRegistry::builder();
    let color = builder.register(
        "Color",
        ShapeKind::Enum(EnumShape {
            cases: vec![
                EnumCase {
                    name: Arc::from("Red"),
                    value: 0,
                },
                EnumCase {
                    name: Arc::from("Green"),
                    value: 1,
                },
                EnumCase {
                    name: Arc::from("Blue"),
                    value: 2,
                },
            ],
        }),
    );
    (builder.build(), color)
}

#[test]
fn enums_write_values_by_default() {
    let (registry, color) = color_registry();
    let serializer = MessagePackSerializer::new();
    let bytes = serializer
        .serialize(&registry, color, &Value::from("Green"))
        .unwrap();
    assert_eq!(bytes, [0x01]);
    let back = serializer.deserialize(&registry, color, &bytes).unwrap();
    assert_eq!(back, Value::from("Green"));
}

#[test]
fn enums_by_name_round_trip() {
    let (registry, color) = color_registry();
    let serializer = MessagePackSerializer::new().with_serialize_enums_by_name(true);
    let bytes = serializer
        .serialize(&registry, color, &Value::from("Blue"))
        .unwrap();
    assert_eq!(bytes, [0xa4, b'B', b'l', b'u', b'e']);
    assert_eq!(
        serializer.deserialize(&registry, color, &bytes).unwrap(),
        Value::from("Blue")
    );
}

#[test]
fn unknown_enum_case_fails() {
    let (registry, color) = color_registry();
    let serializer = MessagePackSerializer::new();
    let err = serializer
        .deserialize(&registry, color, &[0x63])
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MalformedFormat);
}

// =============================================================================
// Sequences and maps
// =============================================================================

#[test]
fn nested_sequence_and_map_round_trip() {
    let mut builder = ShapeRegistry::builder();
    let int = scalar(&mut builder, "int", ScalarKind::Int);
    let string = scalar(&mut builder, "string", ScalarKind::Str);
    let ints = builder.register("int[]", ShapeKind::Sequence(SequenceShape::new(int)));
    let map = builder.register(
        "map<string,int[]>",
        ShapeKind::Map(MapShape {
            key: string,
            value: ints,
        }),
    );
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let value = Value::Map(vec![
        (
            Value::from("a"),
            Value::Array(vec![Value::Int(1), Value::Int(2)]),
        ),
        (Value::from("b"), Value::Array(vec![])),
    ]);
    let bytes = serializer.serialize(&registry, map, &value).unwrap();
    assert_eq!(serializer.deserialize(&registry, map, &bytes).unwrap(), value);
}

#[test]
fn multi_dimensional_basic_envelope() {
    let mut builder = ShapeRegistry::builder();
    let int = scalar(&mut builder, "int", ScalarKind::Int);
    let grid = builder.register(
        "int[,]",
        ShapeKind::Sequence(SequenceShape::new(int).with_rank(2)),
    );
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let value = Value::Array(vec![
        Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        Value::Array(vec![Value::Int(4), Value::Int(5), Value::Int(6)]),
    ]);
    let bytes = serializer.serialize(&registry, grid, &value).unwrap();

    // [dims, e1..e6] : outer array of 7, first element [2, 3].
    let mut expected = PackWriter::new();
    expected.write_array_header(7);
    expected.write_array_header(2);
    expected.write_uint(2);
    expected.write_uint(3);
    for v in 1..=6 {
        expected.write_int(v);
    }
    assert_eq!(bytes, expected.into_vec());
    assert_eq!(serializer.deserialize(&registry, grid, &bytes).unwrap(), value);
}

#[test]
fn lz4_envelope_is_unsupported() {
    let mut builder = ShapeRegistry::builder();
    let int = scalar(&mut builder, "int", ScalarKind::Int);
    let grid = builder.register(
        "int[,]",
        ShapeKind::Sequence(SequenceShape::new(int).with_rank(2)),
    );
    let registry = builder.build();
    let serializer =
        MessagePackSerializer::new().with_multi_dimensional_array_format(MultiDimFormat::Lz4);
    let err = serializer
        .serialize(&registry, grid, &Value::Array(vec![]))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Unsupported);
}

// =============================================================================
// Objects and composition
// =============================================================================

#[test]
fn converters_are_cached_and_shared() {
    let mut builder = ShapeRegistry::builder();
    let string = scalar(&mut builder, "string", ScalarKind::Str);
    let person = builder.register(
        "Person",
        ShapeKind::Object(ObjectShape::new(vec![MemberShape::new("name", string)])),
    );
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let first = serializer.get_converter(&registry, person).unwrap();
    let second = serializer.get_converter(&registry, person).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // Reconfiguration invalidates the cache wholesale.
    let reconfigured = serializer.clone().with_intern_strings(true);
    let third = reconfigured.get_converter(&registry, person).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
}

#[test]
fn recursive_shapes_compose() {
    let mut builder = ShapeRegistry::builder();
    let string = scalar(&mut builder, "string", ScalarKind::Str);
    let node = builder.declare("Node");
    let next = builder.register("Node?", ShapeKind::Nullable(node));
    builder.define(
        node,
        ShapeKind::Object(ObjectShape::new(vec![
            MemberShape::new("label", string),
            MemberShape::new("next", next).nullable(),
        ])),
    );
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let tail = Record::with_fields("Node", [("label", Value::from("tail")), ("next", Value::Nil)]);
    let head = Record::with_fields(
        "Node",
        [
            ("label", Value::from("head")),
            ("next", tail.into_value()),
        ],
    )
    .into_value();
    let bytes = serializer.serialize(&registry, node, &head).unwrap();
    assert_eq!(serializer.deserialize(&registry, node, &bytes).unwrap(), head);
}

/// Encodes a temperature as a fixed-point string on the wire.
struct CelsiusConverter;

impl shapepack::Converter for CelsiusConverter {
    fn read(
        &self,
        reader: &mut shapepack_codec::SliceReader<'_>,
        _ctx: &mut shapepack::ReadContext<'_>,
    ) -> shapepack::Result<Value> {
        let text = reader.read_str().map_err(|e| {
            shapepack::SerializationError::from_codec(e, shapepack::Path::new())
        })?;
        let celsius: f64 = text.trim_end_matches("°C").parse().map_err(|_| {
            shapepack::SerializationError::new(
                ErrorCode::MalformedFormat,
                "unparseable temperature",
            )
        })?;
        Ok(Value::F64(celsius))
    }

    fn write(
        &self,
        writer: &mut PackWriter,
        value: &Value,
        _ctx: &mut shapepack::WriteContext<'_>,
    ) -> shapepack::Result<()> {
        match value {
            Value::F64(celsius) => {
                writer.write_str(&format!("{celsius}°C"));
                Ok(())
            }
            other => Err(shapepack::SerializationError::new(
                ErrorCode::TypeMismatch,
                format!("{} where a temperature was expected", other.kind_name()),
            )),
        }
    }
}

#[test]
fn attached_converter_claims_an_opaque_shape() {
    let mut builder = ShapeRegistry::builder();
    let temperature = builder.register("Temperature", ShapeKind::Opaque);
    let registry = builder.build();
    let serializer = MessagePackSerializer::new().with_converter(
        &registry,
        temperature,
        Arc::new(CelsiusConverter),
    );

    let bytes = serializer
        .serialize(&registry, temperature, &Value::F64(21.5))
        .unwrap();
    assert_eq!(bytes[0], 0xa7);
    assert_eq!(
        serializer.deserialize(&registry, temperature, &bytes).unwrap(),
        Value::F64(21.5)
    );
}

struct OpaqueFactory;

impl shapepack::ConverterFactory for OpaqueFactory {
    fn create(
        &self,
        shape_id: ShapeId,
        registry: &Arc<ShapeRegistry>,
        _serializer: &MessagePackSerializer,
    ) -> Option<Arc<dyn shapepack::Converter>> {
        match registry.get(shape_id).kind {
            ShapeKind::Opaque => Some(Arc::new(CelsiusConverter)),
            _ => None,
        }
    }
}

#[test]
fn factories_are_consulted_before_intrinsic_composition() {
    let mut builder = ShapeRegistry::builder();
    let temperature = builder.register("Temperature", ShapeKind::Opaque);
    let registry = builder.build();
    let serializer =
        MessagePackSerializer::new().with_converter_factory(Arc::new(OpaqueFactory));

    let bytes = serializer
        .serialize(&registry, temperature, &Value::F64(-4.0))
        .unwrap();
    assert_eq!(
        serializer.deserialize(&registry, temperature, &bytes).unwrap(),
        Value::F64(-4.0)
    );
}

#[test]
fn opaque_without_custom_converter_fails_composition() {
    let mut builder = ShapeRegistry::builder();
    let opaque = builder.register("Mystery", ShapeKind::Opaque);
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();
    let err = serializer.get_converter(&registry, opaque).unwrap_err();
    assert_eq!(err.code, ErrorCode::ConverterComposition);
}

#[test]
fn null_object_round_trips_as_nil() {
    let mut builder = ShapeRegistry::builder();
    let string = scalar(&mut builder, "string", ScalarKind::Str);
    let person = builder.register(
        "Person",
        ShapeKind::Object(ObjectShape::new(vec![MemberShape::new("name", string)])),
    );
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    let bytes = serializer.serialize(&registry, person, &Value::Nil).unwrap();
    assert_eq!(bytes, [0xc0]);
    assert_eq!(
        serializer.deserialize(&registry, person, &bytes).unwrap(),
        Value::Nil
    );
}
