//! Passive type-shape model and dynamic value document for the shapepack
//! MessagePack engine.
//!
//! A [`ShapeRegistry`] (the *shape provider*) describes each serializable
//! type as a passive [`Shape`] value: its kind, members with keys,
//! constructor style, ancestors and union cases. The engine crate composes
//! converters by visiting these shapes; it never introspects Rust types.
//!
//! Values travel as the dynamic [`Value`] document: scalars, arrays, maps
//! and identity-bearing [`Record`]s. Records are shared handles, so one
//! value can appear in several places of a graph and decoded cycles can
//! close.

#![warn(missing_docs)]

mod bitflags;
mod registry;
mod shape;
mod timestamp;
mod value;

pub use registry::{ShapeRegistry, ShapeRegistryBuilder};
pub use shape::{
    Construction, EnumCase, EnumShape, MapShape, Marshaller, MemberAccess, MemberShape,
    ObjectShape, ScalarKind, SequenceShape, Shape, ShapeId, ShapeKind, SurrogateShape, UnionCase,
    UnionShape, UnionTag,
};
pub use timestamp::{DateTimeKind, OutOfRangeError, Timestamp};
pub use value::{Record, RecordRef, UnusedData, Value};
