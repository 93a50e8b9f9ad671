//! Async entry points: fragmented sources, exact fetch counts, buffered
//! sinks, cancellation.

use std::sync::Arc;

use shapepack::{CancelToken, ErrorCode, MessagePackSerializer};
use shapepack_codec::{ChunkSource, PackWriter};
use shapepack_core::{
    MemberShape, ObjectShape, Record, ScalarKind, ShapeId, ShapeKind, ShapeRegistry, Value,
};

fn person_registry() -> (Arc<ShapeRegistry>, ShapeId) {
    let mut builder = ShapeRegistry::builder();
    let string = builder.register("string", ShapeKind::Scalar(ScalarKind::Str));
    let int = builder.register("int", ShapeKind::Scalar(ScalarKind::Int));
    let person = builder.register(
        "Person",
        ShapeKind::Object(ObjectShape::new(vec![
            MemberShape::new("name", string),
            MemberShape::new("age", int).value_kind(),
        ])),
    );
    (builder.build(), person)
}

fn one_byte_chunks(bytes: &[u8]) -> ChunkSource {
    ChunkSource::new(bytes.iter().map(|b| vec![*b]))
}

// =============================================================================
// Fragmented reads
// =============================================================================

#[tokio::test]
async fn fragmented_decode_equals_sync_decode() {
    let (registry, person) = person_registry();
    let serializer = MessagePackSerializer::new();
    let value = Record::with_fields(
        "Person",
        [("name", Value::from("streaming")), ("age", Value::Int(7))],
    )
    .into_value();
    let bytes = serializer.serialize(&registry, person, &value).unwrap();

    let sync = serializer.deserialize(&registry, person, &bytes).unwrap();
    let fragmented = serializer
        .deserialize_async(
            &registry,
            person,
            one_byte_chunks(&bytes),
            &CancelToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(sync, fragmented);
    assert_eq!(fragmented, value);
}

#[tokio::test]
async fn bare_integer_stream_yields_exactly_three_elements() {
    let mut builder = ShapeRegistry::builder();
    let int = builder.register("int", ShapeKind::Scalar(ScalarKind::Int));
    let registry = builder.build();
    let serializer = MessagePackSerializer::new();

    // [1, 2, 3] as bare msgpack integers, no array envelope.
    let mut wire = PackWriter::new();
    wire.write_int(1);
    wire.write_int(2);
    wire.write_int(3);
    let bytes = wire.into_vec();

    let mut stream = serializer
        .deserialize_stream(&registry, int, one_byte_chunks(&bytes), &CancelToken::new())
        .unwrap();
    assert_eq!(stream.next().await.unwrap(), Some(Value::Int(1)));
    assert_eq!(stream.next().await.unwrap(), Some(Value::Int(2)));
    assert_eq!(stream.next().await.unwrap(), Some(Value::Int(3)));
    // Three one-byte structures arrived in three fetches; the decoder
    // never awaited a fourth read to deliver them.
    assert_eq!(stream.fetch_count(), 3);
}

#[tokio::test]
async fn stream_reports_clean_end() {
    let (registry, person) = person_registry();
    let serializer = MessagePackSerializer::new();
    let value = Record::with_fields(
        "Person",
        [("name", Value::from("a")), ("age", Value::Int(1))],
    )
    .into_value();
    let mut bytes = serializer.serialize(&registry, person, &value).unwrap();
    let copy = bytes.clone();
    bytes.extend_from_slice(&copy);

    let mut stream = serializer
        .deserialize_stream(
            &registry,
            person,
            ChunkSource::new([bytes]),
            &CancelToken::new(),
        )
        .unwrap();
    assert!(stream.next().await.unwrap().is_some());
    assert!(stream.next().await.unwrap().is_some());
    assert_eq!(stream.next().await.unwrap(), None);
}

#[tokio::test]
async fn truncated_input_fails_with_unexpected_end() {
    let (registry, person) = person_registry();
    let serializer = MessagePackSerializer::new();
    let value = Record::with_fields(
        "Person",
        [("name", Value::from("abcdef")), ("age", Value::Int(1))],
    )
    .into_value();
    let bytes = serializer.serialize(&registry, person, &value).unwrap();

    let err = serializer
        .deserialize_async(
            &registry,
            person,
            ChunkSource::new([bytes[..bytes.len() - 2].to_vec()]),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnexpectedEnd);
}

// =============================================================================
// Buffered writes
// =============================================================================

#[tokio::test]
async fn async_serialization_matches_sync_bytes() {
    let (registry, person) = person_registry();
    let serializer = MessagePackSerializer::new().with_max_async_buffer(8);
    let values: Vec<Value> = (0..5)
        .map(|i| {
            Record::with_fields(
                "Person",
                [
                    ("name", Value::from(format!("person-{i}"))),
                    ("age", Value::Int(i)),
                ],
            )
            .into_value()
        })
        .collect();

    let sink = serializer
        .serialize_many_async(&registry, person, &values, Vec::new(), &CancelToken::new())
        .await
        .unwrap();

    let mut expected = Vec::new();
    for value in &values {
        expected.extend(serializer.serialize(&registry, person, value).unwrap());
    }
    assert_eq!(sink, expected);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn cancelled_token_stops_reads() {
    let (registry, person) = person_registry();
    let serializer = MessagePackSerializer::new();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = serializer
        .deserialize_async(&registry, person, ChunkSource::default(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Cancelled);
}

#[tokio::test]
async fn cancelled_token_stops_writes() {
    let (registry, person) = person_registry();
    let serializer = MessagePackSerializer::new();
    let cancel = CancelToken::new();
    cancel.cancel();
    let value = Record::new("Person").into_value();
    let err = serializer
        .serialize_async(&registry, person, &value, Vec::new(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Cancelled);
}
