//! The converter abstraction and the reference-aware invocation helpers.
//!
//! Composed converters never call each other's `read`/`write` directly;
//! they go through [`read_value`] / [`write_value`], which is where
//! reference preservation hooks in. A custom converter gets the same
//! treatment for its inner calls by using the same helpers, while its own
//! outer envelope stays unwrapped.

use std::sync::Arc;

use shapepack_codec::{PackWriter, SliceReader, marker};
use shapepack_core::{Record, RecordRef, ShapeId, ShapeRegistry, Value};

use crate::refs::{Tracked, decode_varint, encode_varint};
use crate::{
    ErrorCode, MessagePackSerializer, ReadContext, ReferencePreservation, Result, WriteContext,
};

/// A per-shape encoder/decoder pair.
///
/// Converters are immutable once published in the cache; all per-call
/// state lives in the contexts.
pub trait Converter: Send + Sync {
    /// Decode one value.
    fn read(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Value>;

    /// Encode one value.
    fn write(
        &self,
        writer: &mut PackWriter,
        value: &Value,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()>;

    /// Decode into an already-allocated record (two-phase construction).
    /// Only supported when [`Converter::supports_read_into`] is true.
    fn read_into(
        &self,
        _reader: &mut SliceReader<'_>,
        _target: &RecordRef,
        ctx: &mut ReadContext<'_>,
    ) -> Result<()> {
        Err(ctx.error(
            ErrorCode::Unsupported,
            "this converter does not support two-phase construction",
        ))
    }

    /// Whether [`Converter::read_into`] is available.
    fn supports_read_into(&self) -> bool {
        false
    }

    /// Whether values of this converter participate in reference
    /// preservation. Primitives never do; objects do; strings do only
    /// under `preserve_string_identity`.
    fn can_be_reference_preserved(&self) -> bool {
        false
    }

    /// Hint to the async layer that elements of this converter want a
    /// yield opportunity between them.
    fn prefer_async(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for dyn Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Converter")
    }
}

/// Produces converters the kernel cannot compose intrinsically, or
/// overrides ones it could. Factories are consulted in registration
/// order before intrinsic composition; the first non-`None` wins.
pub trait ConverterFactory: Send + Sync {
    /// A converter for `shape_id`, or `None` to pass.
    fn create(
        &self,
        shape_id: ShapeId,
        registry: &Arc<ShapeRegistry>,
        serializer: &MessagePackSerializer,
    ) -> Option<Arc<dyn Converter>>;
}

/// Invoke a converter's `write` with state-bag mutations scoped to the
/// value's subtree.
fn invoke_write(
    conv: &dyn Converter,
    writer: &mut PackWriter,
    value: &Value,
    ctx: &mut WriteContext<'_>,
) -> Result<()> {
    let saved = ctx.snapshot_state();
    let result = conv.write(writer, value, ctx);
    ctx.restore_state(saved);
    result
}

/// Encode `value` with `conv`, routing identity-bearing values through
/// the write-side reference table first.
pub fn write_value(
    conv: &dyn Converter,
    writer: &mut PackWriter,
    value: &Value,
    ctx: &mut WriteContext<'_>,
) -> Result<()> {
    if !ctx.refs.is_on() || !conv.can_be_reference_preserved() {
        return invoke_write(conv, writer, value, ctx);
    }
    let addr = match value {
        Value::Record(record) => record.addr(),
        Value::Str(s) if ctx.options.preserve_string_identity => {
            Arc::as_ptr(s) as *const u8 as usize
        }
        _ => return invoke_write(conv, writer, value, ctx),
    };
    match ctx.refs.track(addr) {
        Tracked::Seen(id) => {
            if ctx.refs.is_in_flight(addr)
                && ctx.refs.mode() == ReferencePreservation::RejectCycles
            {
                return Err(ctx.error(
                    ErrorCode::UnorderableCycle,
                    "cycle detected during encode (reference preservation is RejectCycles)",
                ));
            }
            writer.write_ext(
                ctx.options.extension_codes.object_reference,
                &encode_varint(id),
            );
            Ok(())
        }
        Tracked::New(_) => {
            ctx.refs.enter(addr);
            let result = invoke_write(conv, writer, value, ctx);
            ctx.refs.exit(addr);
            result
        }
    }
}

/// Decode a value with `conv`, resolving back references and claiming
/// ids in pre-order.
pub fn read_value(
    conv: &dyn Converter,
    reader: &mut SliceReader<'_>,
    ctx: &mut ReadContext<'_>,
) -> Result<Value> {
    if !ctx.refs.is_on() || !conv.can_be_reference_preserved() {
        return invoke_read(conv, reader, ctx);
    }
    if let Some(code) = reader.peek_ext_type().map_err(|e| ctx.codec(e))? {
        if code == ctx.options.extension_codes.object_reference {
            let (_, payload) = reader.read_ext().map_err(|e| ctx.codec(e))?;
            let id = decode_varint(payload).ok_or_else(|| {
                ctx.error(
                    ErrorCode::MalformedFormat,
                    "object-reference payload is not a single varint",
                )
            })?;
            return ctx.refs.resolve(id).map_err(|e| e.at(ctx.path.clone()));
        }
    }
    // A nil body carries no identity; nothing to track.
    if reader.peek_marker().map_err(|e| ctx.codec(e))? == marker::NIL {
        return invoke_read(conv, reader, ctx);
    }
    if ctx.refs.mode() == ReferencePreservation::AllowCycles && conv.supports_read_into() {
        let hole = RecordRef::new(Record::default());
        ctx.refs.begin_hole(Value::Record(hole.clone()));
        let saved = ctx.snapshot_state();
        let result = conv.read_into(reader, &hole, ctx);
        ctx.restore_state(saved);
        result?;
        Ok(Value::Record(hole))
    } else {
        let id = ctx.refs.begin();
        let value = invoke_read(conv, reader, ctx)?;
        ctx.refs.complete(id, value.clone());
        Ok(value)
    }
}

/// Invoke a converter's `read` with state-bag mutations scoped to the
/// value's subtree.
fn invoke_read(
    conv: &dyn Converter,
    reader: &mut SliceReader<'_>,
    ctx: &mut ReadContext<'_>,
) -> Result<Value> {
    let saved = ctx.snapshot_state();
    let result = conv.read(reader, ctx);
    ctx.restore_state(saved);
    result
}
