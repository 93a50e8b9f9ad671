//! Converters for nullable, sequence, map and surrogate shapes.

use std::sync::Arc;

use shapepack_codec::{PackWriter, SliceReader};
use shapepack_core::{Marshaller, Value};

use crate::converter::{read_value, write_value};
use crate::{Converter, ErrorCode, PathStep, ReadContext, Result, WriteContext};

/// Optional wrapper: nil on the wire is the absent case.
pub(crate) struct NullableConverter {
    inner: Arc<dyn Converter>,
}

impl NullableConverter {
    pub(crate) fn new(inner: Arc<dyn Converter>) -> Self {
        NullableConverter { inner }
    }
}

impl Converter for NullableConverter {
    fn read(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Value> {
        if reader.try_read_nil().map_err(|e| ctx.codec(e))? {
            return Ok(Value::Nil);
        }
        read_value(&*self.inner, reader, ctx)
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
        write_value(&*self.inner, writer, value, ctx)
    }
}

/// Homogeneous sequences; rank one only (see [`MultiDimConverter`]).
pub(crate) struct SequenceConverter {
    element: Arc<dyn Converter>,
}

impl SequenceConverter {
    pub(crate) fn new(element: Arc<dyn Converter>) -> Self {
        SequenceConverter { element }
    }
}

impl Converter for SequenceConverter {
    fn read(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Value> {
        if reader.try_read_nil().map_err(|e| ctx.codec(e))? {
            return Ok(Value::Nil);
        }
        let len = reader.read_array_header().map_err(|e| ctx.codec(e))?;
        let mut items = Vec::with_capacity(len.min(4096));
        for i in 0..len {
            ctx.path.push(PathStep::Index(i));
            let item = read_value(&*self.element, reader, ctx);
            ctx.path.pop();
            items.push(item?);
        }
        Ok(Value::Array(items))
    }

    fn write(
        &self,
        writer: &mut PackWriter,
        value: &Value,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        let items = match value {
            Value::Nil => {
                writer.write_nil();
                return Ok(());
            }
            Value::Array(items) => items,
            other => {
                return Err(ctx.error(
                    ErrorCode::TypeMismatch,
                    format!("{} value where a sequence was expected", other.kind_name()),
                ));
            }
        };
        writer.write_array_header(items.len());
        for (i, item) in items.iter().enumerate() {
            ctx.path.push(PathStep::Index(i));
            let result = write_value(&*self.element, writer, item, ctx);
            ctx.path.pop();
            result?;
        }
        Ok(())
    }
}

/// Multi-dimensional arrays in the `Basic` envelope:
/// `[[d1, d2, …], e1, e2, …]` with elements flattened row-major inside
/// one outer array. The in-memory form is nested [`Value::Array`]s.
pub(crate) struct MultiDimConverter {
    element: Arc<dyn Converter>,
    rank: u32,
}

impl MultiDimConverter {
    pub(crate) fn new(element: Arc<dyn Converter>, rank: u32) -> Self {
        MultiDimConverter { element, rank }
    }

    fn collect_dims(&self, value: &Value, ctx: &WriteContext<'_>) -> Result<Vec<usize>> {
        let mut dims = Vec::with_capacity(self.rank as usize);
        let mut current = value;
        for _ in 0..self.rank {
            match current {
                Value::Array(items) => {
                    dims.push(items.len());
                    current = items.first().unwrap_or(&Value::Nil);
                }
                other => {
                    return Err(ctx.error(
                        ErrorCode::TypeMismatch,
                        format!(
                            "{} value where a rank-{} array was expected",
                            other.kind_name(),
                            self.rank
                        ),
                    ));
                }
            }
        }
        Ok(dims)
    }

    fn write_flat(
        &self,
        writer: &mut PackWriter,
        value: &Value,
        dims: &[usize],
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        let Value::Array(items) = value else {
            return Err(ctx.error(
                ErrorCode::TypeMismatch,
                "array nesting ends before the declared rank",
            ));
        };
        if items.len() != dims[0] {
            return Err(ctx.error(
                ErrorCode::TypeMismatch,
                format!(
                    "jagged multi-dimensional array: expected {} elements, found {}",
                    dims[0],
                    items.len()
                ),
            ));
        }
        for (i, item) in items.iter().enumerate() {
            ctx.path.push(PathStep::Index(i));
            let result = if dims.len() == 1 {
                write_value(&*self.element, writer, item, ctx)
            } else {
                self.write_flat(writer, item, &dims[1..], ctx)
            };
            ctx.path.pop();
            result?;
        }
        Ok(())
    }

    fn read_nested(
        &self,
        reader: &mut SliceReader<'_>,
        dims: &[usize],
        ctx: &mut ReadContext<'_>,
    ) -> Result<Value> {
        let mut items = Vec::with_capacity(dims[0].min(4096));
        for i in 0..dims[0] {
            ctx.path.push(PathStep::Index(i));
            let item = if dims.len() == 1 {
                read_value(&*self.element, reader, ctx)
            } else {
                self.read_nested(reader, &dims[1..], ctx)
            };
            ctx.path.pop();
            items.push(item?);
        }
        Ok(Value::Array(items))
    }
}

impl Converter for MultiDimConverter {
    fn read(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Value> {
        if reader.try_read_nil().map_err(|e| ctx.codec(e))? {
            return Ok(Value::Nil);
        }
        let outer = reader.read_array_header().map_err(|e| ctx.codec(e))?;
        let dims_len = reader.read_array_header().map_err(|e| ctx.codec(e))?;
        if dims_len != self.rank as usize {
            return Err(ctx.error(
                ErrorCode::MalformedFormat,
                format!("expected {} dimensions, found {dims_len}", self.rank),
            ));
        }
        let mut dims = Vec::with_capacity(dims_len);
        for _ in 0..dims_len {
            dims.push(reader.read_uint().map_err(|e| ctx.codec(e))? as usize);
        }
        let total: usize = dims.iter().product();
        if outer != total + 1 {
            return Err(ctx.error(
                ErrorCode::MalformedFormat,
                format!(
                    "envelope holds {} values for {total} elements",
                    outer.saturating_sub(1)
                ),
            ));
        }
        if dims.iter().any(|&d| d == 0) {
            return Ok(empty_nested(&dims));
        }
        self.read_nested(reader, &dims, ctx)
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
        let dims = self.collect_dims(value, ctx)?;
        let total: usize = dims.iter().product();
        writer.write_array_header(total + 1);
        writer.write_array_header(dims.len());
        for dim in &dims {
            writer.write_uint(*dim as u64);
        }
        if total > 0 {
            self.write_flat(writer, value, &dims, ctx)?;
        }
        Ok(())
    }
}

fn empty_nested(dims: &[usize]) -> Value {
    if dims.is_empty() || dims[0] == 0 {
        return Value::Array(Vec::new());
    }
    Value::Array((0..dims[0]).map(|_| empty_nested(&dims[1..])).collect())
}

/// Homogeneous key/value maps, written in entry order.
pub(crate) struct MapConverter {
    key: Arc<dyn Converter>,
    value: Arc<dyn Converter>,
}

impl MapConverter {
    pub(crate) fn new(key: Arc<dyn Converter>, value: Arc<dyn Converter>) -> Self {
        MapConverter { key, value }
    }
}

impl Converter for MapConverter {
    fn read(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Value> {
        if reader.try_read_nil().map_err(|e| ctx.codec(e))? {
            return Ok(Value::Nil);
        }
        let len = reader.read_map_header().map_err(|e| ctx.codec(e))?;
        let mut entries = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            let key = read_value(&*self.key, reader, ctx)?;
            ctx.path.push(PathStep::Key(key.clone()));
            let value = read_value(&*self.value, reader, ctx);
            ctx.path.pop();
            entries.push((key, value?));
        }
        Ok(Value::Map(entries))
    }

    fn write(
        &self,
        writer: &mut PackWriter,
        value: &Value,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        let entries = match value {
            Value::Nil => {
                writer.write_nil();
                return Ok(());
            }
            Value::Map(entries) => entries,
            other => {
                return Err(ctx.error(
                    ErrorCode::TypeMismatch,
                    format!("{} value where a map was expected", other.kind_name()),
                ));
            }
        };
        writer.write_map_header(entries.len());
        for (k, v) in entries {
            write_value(&*self.key, writer, k, ctx)?;
            ctx.path.push(PathStep::Key(k.clone()));
            let result = write_value(&*self.value, writer, v, ctx);
            ctx.path.pop();
            result?;
        }
        Ok(())
    }
}

/// Serializes a user shape through its proxy shape.
///
/// The marshaller produces a fresh proxy value per call, so surrogate
/// values do not participate in reference preservation themselves; any
/// records inside the proxy still do.
pub(crate) struct SurrogateConverter {
    proxy: Arc<dyn Converter>,
    marshaller: Marshaller,
}

impl SurrogateConverter {
    pub(crate) fn new(proxy: Arc<dyn Converter>, marshaller: Marshaller) -> Self {
        SurrogateConverter { proxy, marshaller }
    }
}

impl Converter for SurrogateConverter {
    fn read(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let proxy_value = read_value(&*self.proxy, reader, ctx)?;
        Ok((self.marshaller.from_proxy)(proxy_value))
    }

    fn write(
        &self,
        writer: &mut PackWriter,
        value: &Value,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        let proxy_value = (self.marshaller.to_proxy)(value);
        write_value(&*self.proxy, writer, &proxy_value, ctx)
    }
}
