//! Converters for scalar and enum shapes, including the extension-encoded
//! scalar family (decimal, guid, 128-bit integers, timestamps).

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use shapepack_codec::{PackWriter, SliceReader, marker};
use shapepack_core::{DateTimeKind, ScalarKind, Timestamp, Value};
use uuid::Uuid;

use crate::config::{AssumedDateTimeKind, ExtensionCodes, SerializerOptions};
use crate::{Converter, ErrorCode, ReadContext, Result, WriteContext};

/// Converter for every [`ScalarKind`].
pub(crate) struct ScalarConverter {
    kind: ScalarKind,
    codes: ExtensionCodes,
    intern: bool,
    track_identity: bool,
    assumed: AssumedDateTimeKind,
    hi_fi: bool,
}

impl ScalarConverter {
    pub(crate) fn new(kind: ScalarKind, options: &SerializerOptions) -> Self {
        ScalarConverter {
            kind,
            codes: options.extension_codes,
            intern: options.intern_strings,
            track_identity: options.preserve_string_identity,
            assumed: options.assumed_datetime_kind,
            hi_fi: options.hi_fi_datetime,
        }
    }

    fn read_i128(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<i128> {
        let m = reader.peek_marker().map_err(|e| ctx.codec(e))?;
        if marker::is_ext(m) {
            let (code, data) = reader.read_ext().map_err(|e| ctx.codec(e))?;
            if code != self.codes.int128 {
                return Err(ctx.error(
                    ErrorCode::MalformedFormat,
                    format!("extension type {code} where int128 ({}) was expected", self.codes.int128),
                ));
            }
            let bytes = fixed16(data, ctx)?;
            Ok(i128::from_be_bytes(bytes))
        } else if marker::is_bin(m) {
            let data = reader.read_bin().map_err(|e| ctx.codec(e))?;
            Ok(i128::from_le_bytes(fixed16(data, ctx)?))
        } else {
            match reader.read_int_lossless().map_err(|e| ctx.codec(e))? {
                Ok(v) => Ok(v as i128),
                Err(v) => Ok(v as i128),
            }
        }
    }

    fn read_u128(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<u128> {
        let m = reader.peek_marker().map_err(|e| ctx.codec(e))?;
        if marker::is_ext(m) {
            let (code, data) = reader.read_ext().map_err(|e| ctx.codec(e))?;
            if code != self.codes.uint128 {
                return Err(ctx.error(
                    ErrorCode::MalformedFormat,
                    format!("extension type {code} where uint128 ({}) was expected", self.codes.uint128),
                ));
            }
            Ok(u128::from_be_bytes(fixed16(data, ctx)?))
        } else if marker::is_bin(m) {
            let data = reader.read_bin().map_err(|e| ctx.codec(e))?;
            Ok(u128::from_le_bytes(fixed16(data, ctx)?))
        } else {
            Ok(reader.read_uint().map_err(|e| ctx.codec(e))? as u128)
        }
    }

    fn read_decimal(
        &self,
        reader: &mut SliceReader<'_>,
        ctx: &mut ReadContext<'_>,
    ) -> Result<Decimal> {
        let m = reader.peek_marker().map_err(|e| ctx.codec(e))?;
        if marker::is_ext(m) {
            let (code, data) = reader.read_ext().map_err(|e| ctx.codec(e))?;
            if code != self.codes.decimal {
                return Err(ctx.error(
                    ErrorCode::MalformedFormat,
                    format!("extension type {code} where decimal ({}) was expected", self.codes.decimal),
                ));
            }
            let mut bytes = fixed16(data, ctx)?;
            bytes.reverse();
            Ok(Decimal::deserialize(bytes))
        } else if marker::is_bin(m) {
            let data = reader.read_bin().map_err(|e| ctx.codec(e))?;
            Ok(Decimal::deserialize(fixed16(data, ctx)?))
        } else if marker::is_str(m) {
            let s = reader.read_str().map_err(|e| ctx.codec(e))?;
            Decimal::from_str(s).map_err(|e| {
                ctx.error(ErrorCode::MalformedFormat, format!("unparseable decimal string: {e}"))
            })
        } else {
            Err(ctx.codec(shapepack_codec::CodecError::type_mismatch(
                reader.position(),
                "decimal",
                m,
            )))
        }
    }

    fn read_uuid(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Uuid> {
        let m = reader.peek_marker().map_err(|e| ctx.codec(e))?;
        if marker::is_ext(m) {
            let (code, data) = reader.read_ext().map_err(|e| ctx.codec(e))?;
            if code != self.codes.guid {
                return Err(ctx.error(
                    ErrorCode::MalformedFormat,
                    format!("extension type {code} where guid ({}) was expected", self.codes.guid),
                ));
            }
            Ok(Uuid::from_bytes(fixed16(data, ctx)?))
        } else if marker::is_bin(m) {
            let data = reader.read_bin().map_err(|e| ctx.codec(e))?;
            Ok(Uuid::from_bytes_le(fixed16(data, ctx)?))
        } else if marker::is_str(m) {
            let s = reader.read_str().map_err(|e| ctx.codec(e))?;
            Uuid::parse_str(s).map_err(|e| {
                ctx.error(ErrorCode::MalformedFormat, format!("unparseable guid string: {e}"))
            })
        } else {
            Err(ctx.codec(shapepack_codec::CodecError::type_mismatch(
                reader.position(),
                "guid",
                m,
            )))
        }
    }

    fn read_timestamp(
        &self,
        reader: &mut SliceReader<'_>,
        ctx: &mut ReadContext<'_>,
    ) -> Result<Timestamp> {
        let m = reader.peek_marker().map_err(|e| ctx.codec(e))?;
        if marker::is_array(m) {
            // Hi-fi tuple escape: [ticks, kind].
            let len = reader.read_array_header().map_err(|e| ctx.codec(e))?;
            if len != 2 {
                return Err(ctx.error(
                    ErrorCode::MalformedFormat,
                    format!("timestamp tuple of length {len}"),
                ));
            }
            let ticks = reader.read_int().map_err(|e| ctx.codec(e))?;
            let kind_byte = reader.read_int().map_err(|e| ctx.codec(e))?;
            let kind = u8::try_from(kind_byte)
                .ok()
                .and_then(DateTimeKind::from_wire_value)
                .ok_or_else(|| {
                    ctx.error(
                        ErrorCode::MalformedFormat,
                        format!("unknown datetime kind {kind_byte}"),
                    )
                })?;
            Ok(Timestamp::from_ticks(ticks, kind))
        } else {
            let (secs, nanos) = reader.read_timestamp().map_err(|e| ctx.codec(e))?;
            Ok(Timestamp::utc(secs, nanos))
        }
    }

    fn write_timestamp(&self, writer: &mut PackWriter, ts: &Timestamp) {
        let effective = match ts.kind {
            DateTimeKind::Unspecified => self.assumed.resolve(),
            other => other,
        };
        if self.hi_fi && effective != DateTimeKind::Utc {
            writer.write_array_header(2);
            writer.write_int(ts.ticks());
            writer.write_uint(ts.kind.wire_value() as u64);
        } else {
            writer.write_timestamp(ts.secs, ts.nanos);
        }
    }

    fn value_mismatch(
        &self,
        ctx: &WriteContext<'_>,
        value: &Value,
    ) -> crate::SerializationError {
        ctx.error(
            ErrorCode::TypeMismatch,
            format!(
                "{} value where a {:?} scalar was expected",
                value.kind_name(),
                self.kind
            ),
        )
    }
}

fn fixed16(data: &[u8], ctx: &ReadContext<'_>) -> Result<[u8; 16]> {
    <[u8; 16]>::try_from(data).map_err(|_| {
        ctx.error(
            ErrorCode::MalformedFormat,
            format!("expected a 16-byte payload, got {} bytes", data.len()),
        )
    })
}

impl Converter for ScalarConverter {
    fn read(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Value> {
        match self.kind {
            ScalarKind::Bool => Ok(Value::Bool(reader.read_bool().map_err(|e| ctx.codec(e))?)),
            ScalarKind::Int => Ok(Value::Int(reader.read_int().map_err(|e| ctx.codec(e))?)),
            ScalarKind::UInt => Ok(Value::uint(reader.read_uint().map_err(|e| ctx.codec(e))?)),
            ScalarKind::F32 => Ok(Value::F32(reader.read_f32().map_err(|e| ctx.codec(e))?)),
            ScalarKind::F64 => Ok(Value::F64(reader.read_f64().map_err(|e| ctx.codec(e))?)),
            ScalarKind::Str => {
                let s = reader.read_str().map_err(|e| ctx.codec(e))?;
                let shared = if self.intern {
                    ctx.interner.intern(s)
                } else {
                    Arc::from(s)
                };
                Ok(Value::Str(shared))
            }
            ScalarKind::Bin => Ok(Value::Bin(
                reader.read_bin().map_err(|e| ctx.codec(e))?.to_vec(),
            )),
            ScalarKind::I128 => Ok(Value::I128(self.read_i128(reader, ctx)?)),
            ScalarKind::U128 => Ok(Value::U128(self.read_u128(reader, ctx)?)),
            ScalarKind::Decimal => Ok(Value::Decimal(self.read_decimal(reader, ctx)?)),
            ScalarKind::Uuid => Ok(Value::Uuid(self.read_uuid(reader, ctx)?)),
            ScalarKind::Timestamp => Ok(Value::Timestamp(self.read_timestamp(reader, ctx)?)),
        }
    }

    fn write(
        &self,
        writer: &mut PackWriter,
        value: &Value,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        match (self.kind, value) {
            (ScalarKind::Bool, Value::Bool(v)) => writer.write_bool(*v),
            (ScalarKind::Int, Value::Int(v)) => writer.write_int(*v),
            (ScalarKind::Int, Value::UInt(v)) if *v <= i64::MAX as u64 => {
                writer.write_uint(*v);
            }
            (ScalarKind::UInt, Value::UInt(v)) => writer.write_uint(*v),
            (ScalarKind::UInt, Value::Int(v)) if *v >= 0 => writer.write_uint(*v as u64),
            (ScalarKind::F32, Value::F32(v)) => writer.write_f32(*v),
            (ScalarKind::F64, Value::F64(v)) => writer.write_f64(*v),
            (ScalarKind::F64, Value::F32(v)) => writer.write_f64(*v as f64),
            (ScalarKind::Str, Value::Str(s)) => writer.write_str(s),
            (ScalarKind::Bin, Value::Bin(b)) => writer.write_bin(b),
            (ScalarKind::I128, Value::I128(v)) => {
                writer.write_ext(self.codes.int128, &v.to_be_bytes());
            }
            (ScalarKind::I128, Value::Int(v)) => {
                writer.write_ext(self.codes.int128, &(*v as i128).to_be_bytes());
            }
            (ScalarKind::U128, Value::U128(v)) => {
                writer.write_ext(self.codes.uint128, &v.to_be_bytes());
            }
            (ScalarKind::U128, Value::UInt(v)) => {
                writer.write_ext(self.codes.uint128, &(*v as u128).to_be_bytes());
            }
            (ScalarKind::U128, Value::Int(v)) if *v >= 0 => {
                writer.write_ext(self.codes.uint128, &(*v as u128).to_be_bytes());
            }
            (ScalarKind::Decimal, Value::Decimal(d)) => {
                let mut bytes = d.serialize();
                bytes.reverse();
                writer.write_ext(self.codes.decimal, &bytes);
            }
            (ScalarKind::Uuid, Value::Uuid(u)) => {
                writer.write_ext(self.codes.guid, u.as_bytes());
            }
            (ScalarKind::Timestamp, Value::Timestamp(ts)) => self.write_timestamp(writer, ts),
            (_, Value::Nil) => writer.write_nil(),
            _ => return Err(self.value_mismatch(ctx, value)),
        }
        Ok(())
    }

    fn can_be_reference_preserved(&self) -> bool {
        self.kind == ScalarKind::Str && self.track_identity
    }
}

/// Converter for enum shapes. In-memory values are the case name; the
/// wire form is the case value, or the name under
/// `serialize_enums_by_name`.
pub(crate) struct EnumConverter {
    type_name: Arc<str>,
    cases: Vec<(Arc<str>, i64)>,
    by_name: HashMap<Arc<str>, usize>,
    by_value: HashMap<i64, usize>,
    by_name_wire: bool,
}

impl EnumConverter {
    pub(crate) fn new(
        type_name: Arc<str>,
        cases: impl IntoIterator<Item = (Arc<str>, i64)>,
        options: &SerializerOptions,
    ) -> Self {
        let cases: Vec<_> = cases.into_iter().collect();
        let by_name = cases
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
        let by_value = cases
            .iter()
            .enumerate()
            .map(|(i, (_, value))| (*value, i))
            .collect();
        EnumConverter {
            type_name,
            cases,
            by_name,
            by_value,
            by_name_wire: options.serialize_enums_by_name,
        }
    }

    fn case_of(&self, value: &Value, ctx: &WriteContext<'_>) -> Result<usize> {
        match value {
            Value::Str(name) => self.by_name.get(name.as_ref()).copied().ok_or_else(|| {
                ctx.error(
                    ErrorCode::TypeMismatch,
                    format!("`{name}` is not a case of enum {}", self.type_name),
                )
            }),
            other => other
                .as_i64()
                .and_then(|v| self.by_value.get(&v).copied())
                .ok_or_else(|| {
                    ctx.error(
                        ErrorCode::TypeMismatch,
                        format!(
                            "{} value is not a case of enum {}",
                            other.kind_name(),
                            self.type_name
                        ),
                    )
                }),
        }
    }
}

impl Converter for EnumConverter {
    fn read(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let m = reader.peek_marker().map_err(|e| ctx.codec(e))?;
        let index = if marker::is_str(m) {
            let name = reader.read_str().map_err(|e| ctx.codec(e))?;
            *self.by_name.get(name).ok_or_else(|| {
                ctx.error(
                    ErrorCode::MalformedFormat,
                    format!("`{name}` is not a case of enum {}", self.type_name),
                )
            })?
        } else {
            let value = reader.read_int().map_err(|e| ctx.codec(e))?;
            *self.by_value.get(&value).ok_or_else(|| {
                ctx.error(
                    ErrorCode::MalformedFormat,
                    format!("{value} is not a case of enum {}", self.type_name),
                )
            })?
        };
        Ok(Value::Str(self.cases[index].0.clone()))
    }

    fn write(
        &self,
        writer: &mut PackWriter,
        value: &Value,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        let index = self.case_of(value, ctx)?;
        let (name, case_value) = &self.cases[index];
        if self.by_name_wire {
            writer.write_str(name);
        } else {
            writer.write_int(*case_value);
        }
        Ok(())
    }
}
