//! Shape-driven MessagePack serialization.
//!
//! Given a [`shapepack_core::ShapeRegistry`] describing the types in
//! play, a [`MessagePackSerializer`] composes a cached converter per
//! shape and turns [`Value`]s into MessagePack bytes and back:
//!
//! ```
//! use shapepack::MessagePackSerializer;
//! use shapepack_core::{
//!     MemberShape, ObjectShape, Record, ScalarKind, ShapeKind, ShapeRegistry, Value,
//! };
//!
//! let mut shapes = ShapeRegistry::builder();
//! let string = shapes.register("string", ShapeKind::Scalar(ScalarKind::Str));
//! let person = shapes.register(
//!     "Person",
//!     ShapeKind::Object(ObjectShape::new(vec![
//!         MemberShape::new("name", string).required(),
//!     ])),
//! );
//! let registry = shapes.build();
//!
//! let serializer = MessagePackSerializer::new();
//! let value = Record::with_fields("Person", [("name", Value::from("Andrew"))]).into_value();
//! let bytes = serializer.serialize(&registry, person, &value).unwrap();
//! let back = serializer.deserialize(&registry, person, &bytes).unwrap();
//! assert_eq!(back, value);
//! ```
//!
//! The serializer is an immutable configuration value: every `with_*`
//! method returns a new serializer with a fresh converter cache, so
//! converters composed under one configuration are never observed by
//! another.

#![warn(missing_docs)]

use std::sync::Arc;

use shapepack_codec::{PackWriter, SliceReader};
use shapepack_core::{ShapeId, ShapeRegistry, UnionTag, Value};

mod config;
mod context;
mod converter;
mod error;
mod kernel;
mod navigate;
mod object;
mod path;
mod refs;
mod scalar;
mod seq;
mod stream;
mod union;

pub use config::{
    AssumedDateTimeKind, CancelToken, DeserializeDefaultValues, ExtensionCodes, MultiDimFormat,
    NameConvention, NamingPolicy, ReferencePreservation, SerializeDefaultValues, StateBag,
};
pub use context::{ReadContext, WriteContext};
pub use converter::{Converter, ConverterFactory, read_value, write_value};
pub use error::{ErrorCode, Result, SerializationError};
pub use navigate::PathOptions;
pub use path::{Path, PathStep};
pub use stream::{PathStream, ValueStream};

use config::SerializerOptions;
use kernel::ConverterCache;

/// The serializer value: recognized options plus the converter cache
/// their composition feeds.
#[derive(Clone)]
pub struct MessagePackSerializer {
    options: SerializerOptions,
    cache: Arc<ConverterCache>,
}

impl Default for MessagePackSerializer {
    fn default() -> Self {
        MessagePackSerializer {
            options: SerializerOptions::with_defaults(),
            cache: Arc::new(ConverterCache::new()),
        }
    }
}

impl MessagePackSerializer {
    /// A serializer with default options.
    pub fn new() -> Self {
        MessagePackSerializer::default()
    }

    pub(crate) fn options(&self) -> &SerializerOptions {
        &self.options
    }

    pub(crate) fn cache(&self) -> &ConverterCache {
        &self.cache
    }

    /// Rebuild with changed options and an empty cache. Converters
    /// published in the previous cache stay valid for the previous
    /// serializer value only.
    fn reconfigure(options: SerializerOptions) -> Self {
        MessagePackSerializer {
            options,
            cache: Arc::new(ConverterCache::new()),
        }
    }

    /// Set the reference-preservation mode.
    pub fn with_preserve_references(mut self, mode: ReferencePreservation) -> Self {
        self.options.preserve_references = mode;
        Self::reconfigure(self.options)
    }

    /// Intern strings while reading.
    pub fn with_intern_strings(mut self, on: bool) -> Self {
        self.options.intern_strings = on;
        Self::reconfigure(self.options)
    }

    /// Reference-track strings as well as objects. Reference
    /// preservation wins over interning on the wire.
    pub fn with_preserve_string_identity(mut self, on: bool) -> Self {
        self.options.preserve_string_identity = on;
        Self::reconfigure(self.options)
    }

    /// Set the write-side default-values policy.
    pub fn with_serialize_default_values(mut self, policy: SerializeDefaultValues) -> Self {
        self.options.serialize_default_values = policy;
        Self::reconfigure(self.options)
    }

    /// Set the read-side leniency flags.
    pub fn with_deserialize_default_values(mut self, policy: DeserializeDefaultValues) -> Self {
        self.options.deserialize_default_values = policy;
        Self::reconfigure(self.options)
    }

    /// Write enum cases by name instead of by value.
    pub fn with_serialize_enums_by_name(mut self, on: bool) -> Self {
        self.options.serialize_enums_by_name = on;
        Self::reconfigure(self.options)
    }

    /// Transform member names with a function. A configured
    /// [`NameConvention`] takes precedence.
    pub fn with_property_naming_policy(
        mut self,
        policy: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.options.property_naming_policy = Some(Arc::new(policy));
        Self::reconfigure(self.options)
    }

    /// Transform member names with a standard convention.
    pub fn with_property_name_convention(mut self, convention: NameConvention) -> Self {
        self.options.property_name_convention = Some(convention);
        Self::reconfigure(self.options)
    }

    /// How instants without kind information are interpreted.
    pub fn with_assumed_datetime_kind(mut self, kind: AssumedDateTimeKind) -> Self {
        self.options.assumed_datetime_kind = kind;
        Self::reconfigure(self.options)
    }

    /// Escape non-UTC instants into a `[ticks, kind]` tuple so kind and
    /// precision round-trip.
    pub fn with_hi_fi_datetime(mut self, on: bool) -> Self {
        self.options.hi_fi_datetime = on;
        Self::reconfigure(self.options)
    }

    /// Buffer size at which async writes flush, and below which buffered
    /// reads take the synchronous fast path.
    pub fn with_max_async_buffer(mut self, bytes: usize) -> Self {
        self.options.max_async_buffer = bytes;
        Self::reconfigure(self.options)
    }

    /// Envelope for multi-dimensional arrays.
    pub fn with_multi_dimensional_array_format(mut self, format: MultiDimFormat) -> Self {
        self.options.multi_dimensional_array_format = format;
        Self::reconfigure(self.options)
    }

    /// Override the engine's reserved extension type-code bytes.
    pub fn with_extension_codes(mut self, codes: ExtensionCodes) -> Self {
        self.options.extension_codes = codes;
        Self::reconfigure(self.options)
    }

    /// Seed the state bag threaded into every converter call.
    pub fn with_starting_context(mut self, state: StateBag) -> Self {
        self.options.starting_context = state;
        Self::reconfigure(self.options)
    }

    /// Attach a converter to one shape. Attached converters take
    /// absolute precedence over factories and intrinsic composition.
    pub fn with_converter(
        mut self,
        registry: &Arc<ShapeRegistry>,
        shape: ShapeId,
        converter: Arc<dyn Converter>,
    ) -> Self {
        self.options
            .converters
            .insert((registry.provider_id(), shape.index() as u32), converter);
        Self::reconfigure(self.options)
    }

    /// Register a converter factory, consulted before intrinsic
    /// composition; the first factory returning a converter wins.
    pub fn with_converter_factory(mut self, factory: Arc<dyn ConverterFactory>) -> Self {
        self.options.converter_factories.push(factory);
        Self::reconfigure(self.options)
    }

    /// Replace the declared case set of a union base. Replacement is
    /// wholesale; partial registration does not merge.
    pub fn with_derived_type_mappings(
        mut self,
        registry: &Arc<ShapeRegistry>,
        base: ShapeId,
        mappings: Vec<(UnionTag, ShapeId)>,
    ) -> Self {
        self.options
            .derived_type_mappings
            .insert((registry.provider_id(), base.index() as u32), mappings);
        Self::reconfigure(self.options)
    }

    /// Serialize `value` under `shape` into a byte vector.
    pub fn serialize(
        &self,
        registry: &Arc<ShapeRegistry>,
        shape: ShapeId,
        value: &Value,
    ) -> Result<Vec<u8>> {
        let converter = self.get_converter(registry, shape)?;
        let mut writer = PackWriter::new();
        let mut ctx = WriteContext::new(&self.options, registry.clone(), CancelToken::new());
        write_value(&*converter, &mut writer, value, &mut ctx)?;
        Ok(writer.into_vec())
    }

    /// Deserialize one value of `shape` from `bytes`.
    pub fn deserialize(
        &self,
        registry: &Arc<ShapeRegistry>,
        shape: ShapeId,
        bytes: &[u8],
    ) -> Result<Value> {
        let mut reader = SliceReader::new(bytes);
        self.deserialize_from(registry, shape, &mut reader)
    }

    /// Deserialize the next value of `shape` from a caller-owned reader,
    /// leaving the reader positioned after it.
    pub fn deserialize_from(
        &self,
        registry: &Arc<ShapeRegistry>,
        shape: ShapeId,
        reader: &mut SliceReader<'_>,
    ) -> Result<Value> {
        let converter = self.get_converter(registry, shape)?;
        let mut ctx = ReadContext::new(&self.options, registry.clone(), CancelToken::new());
        read_value(&*converter, reader, &mut ctx)
    }
}
