//! Per-call reference tables: identity on write, id resolution on read.
//!
//! Ids form a single pre-order sequence per top-level call. On write the
//! first sighting of an object emits its body and claims the next id;
//! later sightings emit the object-reference extension with the id as a
//! varint. On read, ids are claimed before the body decodes, so a back
//! edge can resolve to an object still under construction — if the shape
//! can be constructed empty first.

use std::collections::{HashMap, HashSet};

use log::trace;
use shapepack_core::Value;

use crate::{ErrorCode, ReferencePreservation, SerializationError};

/// Outcome of a write-side identity lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tracked {
    /// First sighting; the id was just assigned.
    New(u32),
    /// Already assigned this id earlier in the call.
    Seen(u32),
}

/// Write-side identity table.
pub(crate) struct WriteRefs {
    mode: ReferencePreservation,
    ids: HashMap<usize, u32>,
    in_flight: HashSet<usize>,
    next_id: u32,
}

impl WriteRefs {
    pub(crate) fn new(mode: ReferencePreservation) -> Self {
        WriteRefs {
            mode,
            ids: HashMap::new(),
            in_flight: HashSet::new(),
            next_id: 0,
        }
    }

    pub(crate) fn mode(&self) -> ReferencePreservation {
        self.mode
    }

    pub(crate) fn is_on(&self) -> bool {
        self.mode.is_on()
    }

    /// Look up `addr`, assigning the next id on a first sighting.
    pub(crate) fn track(&mut self, addr: usize) -> Tracked {
        match self.ids.get(&addr) {
            Some(&id) => Tracked::Seen(id),
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.ids.insert(addr, id);
                trace!("assigned reference id {id}");
                Tracked::New(id)
            }
        }
    }

    /// Whether `addr`'s body is currently being written (a repeat
    /// sighting of it closes a cycle).
    pub(crate) fn is_in_flight(&self, addr: usize) -> bool {
        self.in_flight.contains(&addr)
    }

    pub(crate) fn enter(&mut self, addr: usize) {
        self.in_flight.insert(addr);
    }

    pub(crate) fn exit(&mut self, addr: usize) {
        self.in_flight.remove(&addr);
    }
}

/// One id slot on the read side.
enum Slot {
    /// The body is decoding and the shape offers no placeholder.
    InProgress,
    /// A placeholder object the body is decoding into; back edges may
    /// resolve to it.
    Hole(Value),
    /// Fully decoded.
    Done(Value),
}

/// Read-side id table.
pub(crate) struct ReadRefs {
    mode: ReferencePreservation,
    slots: Vec<Slot>,
}

impl ReadRefs {
    pub(crate) fn new(mode: ReferencePreservation) -> Self {
        ReadRefs {
            mode,
            slots: Vec::new(),
        }
    }

    pub(crate) fn mode(&self) -> ReferencePreservation {
        self.mode
    }

    pub(crate) fn is_on(&self) -> bool {
        self.mode.is_on()
    }

    /// Claim the next id with no placeholder.
    pub(crate) fn begin(&mut self) -> u32 {
        self.slots.push(Slot::InProgress);
        (self.slots.len() - 1) as u32
    }

    /// Claim the next id with `placeholder` as the under-construction
    /// value.
    pub(crate) fn begin_hole(&mut self, placeholder: Value) -> u32 {
        self.slots.push(Slot::Hole(placeholder));
        (self.slots.len() - 1) as u32
    }

    /// Record the finished value for an id claimed with
    /// [`ReadRefs::begin`].
    pub(crate) fn complete(&mut self, id: u32, value: Value) {
        self.slots[id as usize] = Slot::Done(value);
    }

    /// Resolve a back reference.
    pub(crate) fn resolve(&self, id: u32) -> Result<Value, SerializationError> {
        match self.slots.get(id as usize) {
            Some(Slot::Done(value)) => Ok(value.clone()),
            Some(Slot::Hole(value)) => Ok(value.clone()),
            Some(Slot::InProgress) => {
                if matches!(self.mode, ReferencePreservation::AllowCycles) {
                    Err(SerializationError::new(
                        ErrorCode::UnorderableCycle,
                        format!(
                            "reference id {id} points into an object that cannot be \
                             constructed before its members"
                        ),
                    ))
                } else {
                    Err(SerializationError::new(
                        ErrorCode::UnresolvedReference,
                        format!("reference id {id} is still under construction"),
                    ))
                }
            }
            None => Err(SerializationError::new(
                ErrorCode::UnresolvedReference,
                format!("reference id {id} was never assigned"),
            )),
        }
    }
}

/// Encode an id as an unsigned LEB128 varint.
pub(crate) fn encode_varint(mut value: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Decode an unsigned LEB128 varint, requiring the payload be exactly
/// one varint.
pub(crate) fn decode_varint(bytes: &[u8]) -> Option<u32> {
    let mut value: u32 = 0;
    let mut shift = 0u32;
    for (i, byte) in bytes.iter().enumerate() {
        if shift >= 32 {
            return None;
        }
        value |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return if i + 1 == bytes.len() { Some(value) } else { None };
        }
        shift += 7;
    }
    None
}
