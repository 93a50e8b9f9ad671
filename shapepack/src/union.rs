//! Polymorphic union dispatch: `[discriminator, inner]` envelopes,
//! precomputed nearest-ancestor tables, optional duck typing.

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use shapepack_codec::{CodecError, PackWriter, SliceReader, marker};
use shapepack_core::{UnionTag, Value};

use crate::converter::{read_value, write_value};
use crate::{Converter, ErrorCode, ReadContext, Result, WriteContext};

/// One composed union case.
pub(crate) struct ComposedCase {
    pub(crate) tag: UnionTag,
    pub(crate) type_name: Arc<str>,
    pub(crate) converter: Arc<dyn Converter>,
    /// Required member wire names unique to this case, for duck typing.
    pub(crate) duck_markers: Vec<Arc<str>>,
}

pub(crate) struct UnionConverter {
    base_name: Arc<str>,
    base: Arc<dyn Converter>,
    cases: Vec<ComposedCase>,
    by_tag: HashMap<UnionTag, usize>,
    /// Runtime type name to case, with the nearest-ancestor rule already
    /// applied over the whole registry at composition time.
    by_type: HashMap<Arc<str>, usize>,
    duck_typed: bool,
}

impl UnionConverter {
    pub(crate) fn new(
        base_name: Arc<str>,
        base: Arc<dyn Converter>,
        cases: Vec<ComposedCase>,
        by_type: HashMap<Arc<str>, usize>,
        duck_typed: bool,
    ) -> Self {
        let by_tag = cases
            .iter()
            .enumerate()
            .map(|(i, c)| (c.tag.clone(), i))
            .collect();
        UnionConverter {
            base_name,
            base,
            cases,
            by_tag,
            by_type,
            duck_typed,
        }
    }

    fn dispatch(&self, value: &Value) -> Option<usize> {
        let record = value.as_record()?;
        let type_name = record.read().type_name.clone();
        self.by_type.get(&type_name).copied()
    }

    fn read_tagged(
        &self,
        reader: &mut SliceReader<'_>,
        ctx: &mut ReadContext<'_>,
    ) -> Result<Value> {
        let len = reader.read_array_header().map_err(|e| ctx.codec(e))?;
        if len != 2 {
            return Err(ctx.error(
                ErrorCode::MalformedFormat,
                format!("union envelope of length {len} for {}", self.base_name),
            ));
        }
        if reader.try_read_nil().map_err(|e| ctx.codec(e))? {
            trace!("union {}: base case", self.base_name);
            return read_value(&*self.base, reader, ctx);
        }
        let m = reader.peek_marker().map_err(|e| ctx.codec(e))?;
        let tag = if marker::is_str(m) {
            UnionTag::Str(Arc::from(reader.read_str().map_err(|e| ctx.codec(e))?))
        } else if marker::is_int(m) {
            let raw = reader.read_int().map_err(|e| ctx.codec(e))?;
            let tag = i32::try_from(raw).map_err(|_| {
                ctx.error(
                    ErrorCode::UnrecognizedUnionTag,
                    format!("discriminator {raw} outside the 32-bit range"),
                )
            })?;
            UnionTag::Int(tag)
        } else {
            return Err(ctx.codec(CodecError::type_mismatch(
                reader.position(),
                "union discriminator",
                m,
            )));
        };
        match self.by_tag.get(&tag) {
            Some(&index) => {
                trace!("union {}: case {:?}", self.base_name, tag);
                read_value(&*self.cases[index].converter, reader, ctx)
            }
            None => Err(ctx.error(
                ErrorCode::UnrecognizedUnionTag,
                format!("no case of {} carries discriminator {tag:?}", self.base_name),
            )),
        }
    }

    fn read_duck_typed(
        &self,
        reader: &mut SliceReader<'_>,
        ctx: &mut ReadContext<'_>,
    ) -> Result<Value> {
        // Probe the body with an independent cursor; the presence of a
        // case-unique required member picks the case.
        let mut peek = reader.create_peek_reader();
        if let Some(len) = peek.try_read_map_header().map_err(|e| ctx.codec(e))? {
            let mut present: Vec<&str> = Vec::with_capacity(len);
            for _ in 0..len {
                match peek.try_read_str().map_err(|e| ctx.codec(e))? {
                    Some(name) => present.push(name),
                    None => peek.skip().map_err(|e| ctx.codec(e))?,
                }
                peek.skip().map_err(|e| ctx.codec(e))?;
            }
            for (index, case) in self.cases.iter().enumerate() {
                if case
                    .duck_markers
                    .iter()
                    .any(|m| present.iter().any(|p| *p == m.as_ref()))
                {
                    trace!("union {}: duck-typed to {}", self.base_name, case.type_name);
                    return read_value(&*self.cases[index].converter, reader, ctx);
                }
            }
        }
        read_value(&*self.base, reader, ctx)
    }
}

impl Converter for UnionConverter {
    fn read(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Value> {
        if reader.try_read_nil().map_err(|e| ctx.codec(e))? {
            return Ok(Value::Nil);
        }
        if self.duck_typed {
            self.read_duck_typed(reader, ctx)
        } else {
            self.read_tagged(reader, ctx)
        }
    }

    fn write(
        &self,
        writer: &mut PackWriter,
        value: &Value,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        if value.is_nil() {
            writer.write_nil();
            return Ok(());
        }
        let case = self.dispatch(value);
        if self.duck_typed {
            return match case {
                Some(index) => write_value(&*self.cases[index].converter, writer, value, ctx),
                None => write_value(&*self.base, writer, value, ctx),
            };
        }
        writer.write_array_header(2);
        match case {
            Some(index) => {
                let composed = &self.cases[index];
                match &composed.tag {
                    UnionTag::Int(tag) => writer.write_int(*tag as i64),
                    UnionTag::Str(tag) => writer.write_str(tag),
                }
                trace!(
                    "union {}: writing {} as {:?}",
                    self.base_name, composed.type_name, composed.tag
                );
                write_value(&*composed.converter, writer, value, ctx)
            }
            None => {
                writer.write_nil();
                write_value(&*self.base, writer, value, ctx)
            }
        }
    }
}
