//! The object converter: map and array layouts, versioning policy,
//! required/default enforcement, unused-data round-tripping.

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use shapepack_codec::{CodecError, PackWriter, SliceReader, marker};
use shapepack_core::{MemberAccess, Record, RecordRef, UnusedData, Value};

use crate::config::{DeserializeDefaultValues, SerializeDefaultValues};
use crate::converter::{read_value, write_value};
use crate::{Converter, ErrorCode, PathStep, ReadContext, Result, WriteContext};

/// Trailing-hole budget beyond which array layout falls back to map.
const ARRAY_SLACK: usize = 4;

/// How many missing member names are spelled out before truncating.
const MISSING_LIST_LIMIT: usize = 8;

/// One member, fully composed: wire name resolved, child converter bound,
/// effective default computed.
pub(crate) struct Property {
    pub(crate) decl_name: Arc<str>,
    pub(crate) wire_name: Arc<str>,
    pub(crate) key: Option<u32>,
    pub(crate) required: bool,
    pub(crate) default: Value,
    pub(crate) nullable: bool,
    pub(crate) value_kind: bool,
    pub(crate) access: MemberAccess,
    pub(crate) converter: Arc<dyn Converter>,
}

pub(crate) struct ObjectConverter {
    type_name: Arc<str>,
    properties: Vec<Property>,
    by_name: HashMap<Arc<str>, usize>,
    by_key: HashMap<u32, usize>,
    /// Every member carries an array-layout key.
    all_keyed: bool,
    /// Two-phase construction: records of this shape can be allocated
    /// empty and filled member by member.
    two_phase: bool,
    retains_unused: bool,
    policy: SerializeDefaultValues,
    lenient: DeserializeDefaultValues,
}

impl ObjectConverter {
    pub(crate) fn new(
        type_name: Arc<str>,
        properties: Vec<Property>,
        two_phase: bool,
        retains_unused: bool,
        policy: SerializeDefaultValues,
        lenient: DeserializeDefaultValues,
    ) -> Self {
        let by_name = properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.wire_name.clone(), i))
            .collect();
        let by_key = properties
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.key.map(|k| (k, i)))
            .collect();
        let all_keyed = !properties.is_empty() && properties.iter().all(|p| p.key.is_some());
        ObjectConverter {
            type_name,
            properties,
            by_name,
            by_key,
            all_keyed,
            two_phase,
            retains_unused,
            policy,
            lenient,
        }
    }

    fn should_emit(&self, property: &Property, value: &Value) -> bool {
        if property.required
            || self.policy.contains(SerializeDefaultValues::ALWAYS)
            || (self.policy.contains(SerializeDefaultValues::VALUE_KINDS) && property.value_kind)
            || (self.policy.contains(SerializeDefaultValues::REFERENCE_KINDS)
                && !property.value_kind)
        {
            return true;
        }
        *value != property.default
    }

    fn write_member(
        &self,
        writer: &mut PackWriter,
        index: usize,
        value: &Value,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        let property = &self.properties[index];
        ctx.path.push(PathStep::Member(property.wire_name.clone()));
        let result = write_value(&*property.converter, writer, value, ctx);
        ctx.path.pop();
        result
    }

    fn read_member(
        &self,
        reader: &mut SliceReader<'_>,
        index: usize,
        ctx: &mut ReadContext<'_>,
    ) -> Result<Value> {
        let property = &self.properties[index];
        if reader.try_read_nil().map_err(|e| ctx.codec(e))? {
            return Ok(Value::Nil);
        }
        ctx.path.push(PathStep::Member(property.wire_name.clone()));
        let result = read_value(&*property.converter, reader, ctx);
        ctx.path.pop();
        result
    }

    fn assign(
        &self,
        index: usize,
        value: Value,
        seen: &mut [bool],
        target: &mut Record,
        ctx: &ReadContext<'_>,
    ) -> Result<()> {
        let property = &self.properties[index];
        if seen[index] {
            return Err(ctx.error(
                ErrorCode::DuplicateProperty,
                format!(
                    "member `{}` of {} appears more than once",
                    property.wire_name, self.type_name
                ),
            ));
        }
        seen[index] = true;
        if value.is_nil()
            && !property.nullable
            && !self
                .lenient
                .contains(DeserializeDefaultValues::ALLOW_NULL_FOR_NON_NULLABLE)
        {
            return Err(ctx.error(
                ErrorCode::DisallowedNullValue,
                format!(
                    "nil for non-nullable member `{}` of {}",
                    property.wire_name, self.type_name
                ),
            ));
        }
        // Computed members are read off the wire but never assigned.
        if property.access != MemberAccess::ReadOnly {
            let value = if value.is_nil() && !property.nullable {
                property.default.clone()
            } else {
                value
            };
            target.set(property.decl_name.as_ref(), value);
        }
        Ok(())
    }

    fn read_fields(
        &self,
        reader: &mut SliceReader<'_>,
        target: &mut Record,
        ctx: &mut ReadContext<'_>,
    ) -> Result<()> {
        target.type_name = self.type_name.clone();
        let mut seen = vec![false; self.properties.len()];
        let mut unused = UnusedData::default();

        if let Some(len) = reader.try_read_array_header().map_err(|e| ctx.codec(e))? {
            for slot in 0..len {
                match self.by_key.get(&(slot as u32)).copied() {
                    Some(index) => {
                        let value = self.read_member(reader, index, ctx)?;
                        self.assign(index, value, &mut seen, target, ctx)?;
                    }
                    None => {
                        // Gap filler or a member this shape does not know.
                        let raw = reader.read_value_bytes().map_err(|e| ctx.codec(e))?;
                        if self.retains_unused && raw != [marker::NIL] {
                            unused.array_slots.push((slot as u32, raw.to_vec()));
                        }
                    }
                }
            }
        } else if let Some(len) = reader.try_read_map_header().map_err(|e| ctx.codec(e))? {
            for _ in 0..len {
                let m = reader.peek_marker().map_err(|e| ctx.codec(e))?;
                let index = if marker::is_str(m) {
                    let mut peek = reader.create_peek_reader();
                    let name = peek.read_str().map_err(|e| ctx.codec(e))?;
                    match self.by_name.get(name).copied() {
                        Some(index) => {
                            reader.sync_to(&peek);
                            Some(index)
                        }
                        None => None,
                    }
                } else if marker::is_int(m) {
                    let mut peek = reader.create_peek_reader();
                    let key = peek.read_int().map_err(|e| ctx.codec(e))?;
                    match u32::try_from(key).ok().and_then(|k| self.by_key.get(&k)) {
                        Some(&index) => {
                            reader.sync_to(&peek);
                            Some(index)
                        }
                        None => None,
                    }
                } else {
                    None
                };
                match index {
                    Some(index) => {
                        let value = self.read_member(reader, index, ctx)?;
                        self.assign(index, value, &mut seen, target, ctx)?;
                    }
                    None => {
                        let raw_key = reader.read_value_bytes().map_err(|e| ctx.codec(e))?;
                        let raw_value = reader.read_value_bytes().map_err(|e| ctx.codec(e))?;
                        if self.retains_unused {
                            unused
                                .map_entries
                                .push((raw_key.to_vec(), raw_value.to_vec()));
                        }
                    }
                }
            }
        } else {
            let m = reader.peek_marker().map_err(|e| ctx.codec(e))?;
            return Err(ctx.codec(CodecError::type_mismatch(reader.position(), "object", m)));
        }

        let mut missing = Vec::new();
        for (index, property) in self.properties.iter().enumerate() {
            if seen[index] || property.access == MemberAccess::ReadOnly {
                continue;
            }
            if property.required
                && !self
                    .lenient
                    .contains(DeserializeDefaultValues::ALLOW_MISSING_REQUIRED)
            {
                missing.push(property.wire_name.as_ref());
                continue;
            }
            target.set(property.decl_name.as_ref(), property.default.clone());
        }
        if !missing.is_empty() {
            return Err(ctx.error(
                ErrorCode::MissingRequiredProperty,
                format_missing(&self.type_name, &missing),
            ));
        }
        if self.retains_unused && !unused.is_empty() {
            trace!(
                "{}: captured {} unrecognized member(s)",
                self.type_name,
                unused.len()
            );
            target.unused = Some(unused);
        }
        Ok(())
    }
}

fn format_missing(type_name: &str, missing: &[&str]) -> String {
    let shown = missing.len().min(MISSING_LIST_LIMIT);
    let mut message = format!(
        "{type_name} is missing required member{}: {}",
        if missing.len() == 1 { "" } else { "s" },
        missing[..shown].join(", ")
    );
    if missing.len() > shown {
        message.push_str(&format!(", … ({} total)", missing.len()));
    }
    message
}

impl Converter for ObjectConverter {
    fn read(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Value> {
        if reader.try_read_nil().map_err(|e| ctx.codec(e))? {
            return Ok(Value::Nil);
        }
        let mut record = Record::new(self.type_name.clone());
        self.read_fields(reader, &mut record, ctx)?;
        Ok(record.into_value())
    }

    fn read_into(
        &self,
        reader: &mut SliceReader<'_>,
        target: &RecordRef,
        ctx: &mut ReadContext<'_>,
    ) -> Result<()> {
        let mut guard = target.write();
        self.read_fields(reader, &mut guard, ctx)
    }

    fn write(
        &self,
        writer: &mut PackWriter,
        value: &Value,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        let record = match value {
            Value::Nil => {
                writer.write_nil();
                return Ok(());
            }
            Value::Record(record) => record,
            other => {
                return Err(ctx.error(
                    ErrorCode::TypeMismatch,
                    format!(
                        "{} value where object {} was expected",
                        other.kind_name(),
                        self.type_name
                    ),
                ));
            }
        };
        let record = record.read();

        let mut emitted: Vec<(usize, &Value)> = Vec::new();
        for (index, property) in self.properties.iter().enumerate() {
            if property.access == MemberAccess::WriteOnly {
                continue;
            }
            let value = record.get(&property.decl_name).unwrap_or(&property.default);
            if self.should_emit(property, value) {
                emitted.push((index, value));
            }
        }
        let unused = record.unused.as_ref().filter(|u| !u.is_empty());
        let has_unused_map = unused.is_some_and(|u| !u.map_entries.is_empty());
        let has_unused_slots = unused.is_some_and(|u| !u.array_slots.is_empty());

        // Array layout: only for fully keyed shapes, and only while the
        // holes stay within the slack budget. Trailing unemitted members
        // are truncated away entirely.
        let mut as_array = self.all_keyed && !has_unused_map;
        let mut array_len = 0usize;
        if as_array {
            for (index, _) in &emitted {
                let key = self.properties[*index].key.unwrap_or(0) as usize;
                array_len = array_len.max(key + 1);
            }
            if has_unused_slots {
                if let Some(u) = unused {
                    for (slot, _) in &u.array_slots {
                        array_len = array_len.max(*slot as usize + 1);
                    }
                }
            }
            let filled = emitted.len()
                + unused.map_or(0, |u| {
                    u.array_slots
                        .iter()
                        .filter(|(slot, _)| (*slot as usize) < array_len)
                        .count()
                });
            if array_len - filled > ARRAY_SLACK {
                as_array = false;
            }
        }

        if as_array {
            enum Slot<'v> {
                Gap,
                Member(usize, &'v Value),
                Raw(&'v [u8]),
            }
            let mut slots: Vec<Slot<'_>> = (0..array_len).map(|_| Slot::Gap).collect();
            for (index, value) in &emitted {
                let key = self.properties[*index].key.unwrap_or(0) as usize;
                slots[key] = Slot::Member(*index, *value);
            }
            if let Some(u) = unused {
                for (slot, raw) in &u.array_slots {
                    if let Some(entry) = slots.get_mut(*slot as usize) {
                        *entry = Slot::Raw(raw);
                    }
                }
            }
            writer.write_array_header(array_len);
            for slot in slots {
                match slot {
                    Slot::Gap => writer.write_nil(),
                    Slot::Member(index, value) => self.write_member(writer, index, value, ctx)?,
                    Slot::Raw(raw) => writer.write_raw(raw),
                }
            }
        } else {
            let unused_entries = unused.map_or(0, |u| u.map_entries.len());
            writer.write_map_header(emitted.len() + unused_entries);
            for (index, value) in &emitted {
                writer.write_str(&self.properties[*index].wire_name);
                self.write_member(writer, *index, *value, ctx)?;
            }
            if let Some(u) = unused {
                for (raw_key, raw_value) in &u.map_entries {
                    writer.write_raw(raw_key);
                    writer.write_raw(raw_value);
                }
            }
        }
        Ok(())
    }

    fn supports_read_into(&self) -> bool {
        self.two_phase
    }

    fn can_be_reference_preserved(&self) -> bool {
        true
    }
}
