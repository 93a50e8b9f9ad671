//! Path-directed deserialization: skip through a structure to a nested
//! subvalue without decoding what lies beside it.

use std::sync::Arc;

use shapepack_codec::{PackWriter, SliceReader, marker};
use shapepack_core::{MemberShape, ShapeId, ShapeKind, ShapeRegistry, Value};

use crate::config::CancelToken;
use crate::converter::read_value;
use crate::{
    ErrorCode, MessagePackSerializer, PathStep, ReadContext, Result, WriteContext,
};

/// Knobs for path navigation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOptions {
    /// Yield the type's default (nil) instead of failing when the path
    /// names a member or index that is not present.
    pub default_for_missing_path: bool,
    /// After yielding the subvalue, position past the enclosing
    /// structure so sibling top-level structures stay decodable.
    pub leave_open: bool,
    /// For streaming enumeration: treat a nil enclosing value as an
    /// empty sequence instead of failing.
    pub empty_for_undiscoverable: bool,
}

/// Where navigation ended up.
pub(crate) enum Navigated {
    /// Positioned on the value; `offset` is the byte position and
    /// `shape` the subvalue's shape.
    Found { offset: usize, shape: ShapeId },
    /// The path named something absent and the options allow a default.
    Missing,
}

impl MessagePackSerializer {
    /// Deserialize only the subvalue a path points at.
    ///
    /// Navigation runs on a peek cursor; everything off the path is
    /// skipped, not decoded.
    pub fn deserialize_at_path(
        &self,
        registry: &Arc<ShapeRegistry>,
        root: ShapeId,
        bytes: &[u8],
        steps: &[PathStep],
        options: PathOptions,
    ) -> Result<Value> {
        let mut reader = SliceReader::new(bytes);
        self.deserialize_at_path_from(registry, root, &mut reader, steps, options)
    }

    /// [`MessagePackSerializer::deserialize_at_path`] over a caller-owned
    /// reader. With `leave_open` set the reader ends up past the whole
    /// enclosing structure, so sibling top-level structures stay
    /// decodable; otherwise it is left where the subvalue read stopped
    /// and the rest of the enclosing structure counts as consumed.
    pub fn deserialize_at_path_from<'a>(
        &self,
        registry: &Arc<ShapeRegistry>,
        root: ShapeId,
        reader: &mut SliceReader<'a>,
        steps: &[PathStep],
        options: PathOptions,
    ) -> Result<Value> {
        let mut ctx = ReadContext::new(self.options(), registry.clone(), CancelToken::new());
        let end = if options.leave_open {
            let mut probe = reader.create_peek_reader();
            probe.skip().map_err(|e| ctx.codec(e))?;
            Some(probe)
        } else {
            None
        };
        let navigated = self.navigate_slice(registry, root, reader, steps, &mut ctx, options)?;
        let value = match navigated {
            Navigated::Missing => Value::Nil,
            Navigated::Found { offset, shape } => {
                let mut positioned = reader.create_peek_reader();
                positioned.fast_forward(offset);
                let converter = self.get_converter(registry, shape)?;
                let value = read_value(&*converter, &mut positioned, &mut ctx)?;
                reader.sync_to(&positioned);
                value
            }
        };
        if let Some(end) = end {
            reader.sync_to(&end);
        }
        Ok(value)
    }

    /// Navigate `steps` over `bytes`, returning the byte offset of the
    /// target value. The passed reader is only used as a cursor seed;
    /// consumption happens on peek clones.
    pub(crate) fn navigate_slice(
        &self,
        registry: &Arc<ShapeRegistry>,
        root: ShapeId,
        reader: &SliceReader<'_>,
        steps: &[PathStep],
        ctx: &mut ReadContext<'_>,
        options: PathOptions,
    ) -> Result<Navigated> {
        let mut cursor = reader.create_peek_reader();
        let mut shape_id = root;
        for step in steps {
            ctx.path.push(step.clone());
            match self.unwrap_transparent(registry, shape_id, &mut cursor, ctx)? {
                Some(unwrapped) => shape_id = unwrapped,
                None => return self.missing(ctx, options, "nil value on the path"),
            }
            let m = cursor.peek_marker().map_err(|e| ctx.codec(e))?;
            if marker::is_ext(m) {
                return Err(ctx.error(
                    ErrorCode::Unsupported,
                    "cannot navigate through a back reference; disable reference preservation \
                     or deserialize the whole value",
                ));
            }
            match step {
                PathStep::Member(name) => {
                    let Some(member) = self.find_member(registry, shape_id, name) else {
                        return Err(ctx.error(
                            ErrorCode::PathUnresolved,
                            format!("shape {} has no member `{name}`", registry.get(shape_id).name),
                        ));
                    };
                    let member_shape = member.shape;
                    let member_key = member.key;
                    let wire_name = self.options().wire_name(&member.name);
                    if !self.seek_member(&mut cursor, &wire_name, member_key, ctx)? {
                        return self.missing(ctx, options, format!("member `{name}` not present"));
                    }
                    shape_id = member_shape;
                }
                PathStep::Index(index) => {
                    let element = match &registry.get(shape_id).kind {
                        ShapeKind::Sequence(sequence) if sequence.rank == 1 => sequence.element,
                        _ => {
                            return Err(ctx.error(
                                ErrorCode::PathUnresolved,
                                format!(
                                    "shape {} is not indexable",
                                    registry.get(shape_id).name
                                ),
                            ));
                        }
                    };
                    let len = cursor.read_array_header().map_err(|e| ctx.codec(e))?;
                    if *index >= len {
                        return self.missing(
                            ctx,
                            options,
                            format!("index {index} out of range for length {len}"),
                        );
                    }
                    for _ in 0..*index {
                        cursor.skip().map_err(|e| ctx.codec(e))?;
                    }
                    shape_id = element;
                }
                PathStep::Key(key) => {
                    let (key_shape, value_shape) = match &registry.get(shape_id).kind {
                        ShapeKind::Map(map) => (map.key, map.value),
                        _ => {
                            return Err(ctx.error(
                                ErrorCode::PathUnresolved,
                                format!("shape {} is not a map", registry.get(shape_id).name),
                            ));
                        }
                    };
                    if !self.seek_map_key(registry, key_shape, key, &mut cursor, ctx)? {
                        return self.missing(ctx, options, "map key not present");
                    }
                    shape_id = value_shape;
                }
            }
        }
        Ok(Navigated::Found {
            offset: cursor.position(),
            shape: shape_id,
        })
    }

    /// Step through wrappers that do not change the wire position
    /// (nullable, surrogate) or that carry their own envelope (tagged
    /// unions). Returns `None` when a nil sits where the path continues.
    fn unwrap_transparent(
        &self,
        registry: &Arc<ShapeRegistry>,
        mut shape_id: ShapeId,
        cursor: &mut SliceReader<'_>,
        ctx: &mut ReadContext<'_>,
    ) -> Result<Option<ShapeId>> {
        loop {
            match &registry.get(shape_id).kind {
                ShapeKind::Nullable(inner) => {
                    if cursor.peek_marker().map_err(|e| ctx.codec(e))? == marker::NIL {
                        return Ok(None);
                    }
                    shape_id = *inner;
                }
                ShapeKind::Surrogate(surrogate) => shape_id = surrogate.proxy,
                ShapeKind::Union(union) if !union.duck_typed => {
                    if cursor.peek_marker().map_err(|e| ctx.codec(e))? == marker::NIL {
                        return Ok(None);
                    }
                    let len = cursor.read_array_header().map_err(|e| ctx.codec(e))?;
                    if len != 2 {
                        return Err(ctx.error(
                            ErrorCode::MalformedFormat,
                            format!("union envelope of length {len}"),
                        ));
                    }
                    if cursor.try_read_nil().map_err(|e| ctx.codec(e))? {
                        shape_id = union.base;
                        continue;
                    }
                    let m = cursor.peek_marker().map_err(|e| ctx.codec(e))?;
                    let case = if marker::is_str(m) {
                        let tag = cursor.read_str().map_err(|e| ctx.codec(e))?;
                        union.cases.iter().find(|c| match &c.tag {
                            shapepack_core::UnionTag::Str(s) => s.as_ref() == tag,
                            _ => false,
                        })
                    } else {
                        let tag = cursor.read_int().map_err(|e| ctx.codec(e))?;
                        union.cases.iter().find(|c| match &c.tag {
                            shapepack_core::UnionTag::Int(v) => i64::from(*v) == tag,
                            _ => false,
                        })
                    };
                    match case {
                        Some(case) => shape_id = case.shape,
                        None => {
                            return Err(ctx.error(
                                ErrorCode::UnrecognizedUnionTag,
                                "unknown discriminator on the navigation path",
                            ));
                        }
                    }
                }
                ShapeKind::Union(union) => shape_id = union.base,
                _ => return Ok(Some(shape_id)),
            }
        }
    }

    fn find_member<'r>(
        &self,
        registry: &'r Arc<ShapeRegistry>,
        shape_id: ShapeId,
        name: &str,
    ) -> Option<&'r MemberShape> {
        match &registry.get(shape_id).kind {
            ShapeKind::Object(object) => object.members.iter().find(|member| {
                member.name.as_ref() == name || self.options().wire_name(&member.name).as_ref() == name
            }),
            _ => None,
        }
    }

    /// Position `cursor` on the value of the named member. Handles both
    /// object layouts; skips every other entry.
    fn seek_member(
        &self,
        cursor: &mut SliceReader<'_>,
        wire_name: &str,
        key: Option<u32>,
        ctx: &mut ReadContext<'_>,
    ) -> Result<bool> {
        if let Some(len) = cursor.try_read_map_header().map_err(|e| ctx.codec(e))? {
            for _ in 0..len {
                let m = cursor.peek_marker().map_err(|e| ctx.codec(e))?;
                let matched = if marker::is_str(m) {
                    cursor.read_str().map_err(|e| ctx.codec(e))? == wire_name
                } else if marker::is_int(m) {
                    let k = cursor.read_int().map_err(|e| ctx.codec(e))?;
                    key.is_some_and(|expected| i64::from(expected) == k)
                } else {
                    cursor.skip().map_err(|e| ctx.codec(e))?;
                    false
                };
                if matched {
                    return Ok(true);
                }
                cursor.skip().map_err(|e| ctx.codec(e))?;
            }
            return Ok(false);
        }
        if let Some(len) = cursor.try_read_array_header().map_err(|e| ctx.codec(e))? {
            let Some(slot) = key else {
                return Ok(false);
            };
            if slot as usize >= len {
                return Ok(false);
            }
            for _ in 0..slot {
                cursor.skip().map_err(|e| ctx.codec(e))?;
            }
            return Ok(true);
        }
        let m = cursor.peek_marker().map_err(|e| ctx.codec(e))?;
        Err(ctx.codec(shapepack_codec::CodecError::type_mismatch(
            cursor.position(),
            "object",
            m,
        )))
    }

    /// Linear scan for a structurally equal map key, comparing the
    /// wire bytes against the key re-encoded through its converter.
    fn seek_map_key(
        &self,
        registry: &Arc<ShapeRegistry>,
        key_shape: ShapeId,
        key: &Value,
        cursor: &mut SliceReader<'_>,
        ctx: &mut ReadContext<'_>,
    ) -> Result<bool> {
        let key_converter = self.get_converter(registry, key_shape)?;
        let mut encoded = PackWriter::new();
        {
            let mut write_ctx = WriteContext::new(self.options(), registry.clone(), CancelToken::new());
            key_converter.write(&mut encoded, key, &mut write_ctx)?;
        }
        let len = cursor.read_map_header().map_err(|e| ctx.codec(e))?;
        for _ in 0..len {
            let raw_key = cursor.read_value_bytes().map_err(|e| ctx.codec(e))?;
            if raw_key == encoded.as_slice() {
                return Ok(true);
            }
            cursor.skip().map_err(|e| ctx.codec(e))?;
        }
        Ok(false)
    }

    fn missing(
        &self,
        ctx: &ReadContext<'_>,
        options: PathOptions,
        what: impl Into<String>,
    ) -> Result<Navigated> {
        if options.default_for_missing_path {
            Ok(Navigated::Missing)
        } else {
            Err(ctx.error(ErrorCode::PathUnresolved, what.into()))
        }
    }
}
