//! Converter composition and the per-serializer cache.
//!
//! Composition is recursion with tie-the-knot: before a shape's children
//! are visited, a placeholder cell is published under the cache key, so a
//! cyclic shape graph resolves to a shared converter through a deferred
//! handle. The cell is filled exactly once; late readers observe the
//! finished converter.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use log::trace;
use shapepack_codec::{PackWriter, SliceReader};
use shapepack_core::{
    Construction, ObjectShape, ScalarKind, Shape, ShapeId, ShapeKind, ShapeRegistry, UnionShape,
    UnionTag, Value,
};

use crate::config::MultiDimFormat;
use crate::object::{ObjectConverter, Property};
use crate::scalar::{EnumConverter, ScalarConverter};
use crate::seq::{MapConverter, MultiDimConverter, NullableConverter, SequenceConverter, SurrogateConverter};
use crate::union::{ComposedCase, UnionConverter};
use crate::{
    Converter, ErrorCode, MessagePackSerializer, ReadContext, Result, SerializationError,
    WriteContext,
};

type CacheKey = (u64, u32);

fn cache_key(registry: &ShapeRegistry, shape: ShapeId) -> CacheKey {
    (registry.provider_id(), shape.index() as u32)
}

/// A single cache slot: empty while the shape composes, then frozen.
pub(crate) struct CacheCell {
    slot: OnceLock<Arc<dyn Converter>>,
}

impl CacheCell {
    fn new() -> Self {
        CacheCell {
            slot: OnceLock::new(),
        }
    }
}

/// The converter cache owned by one serializer value.
///
/// Populated with per-cell compare-and-set under a short-lived table
/// lock; no lock is held across composition or user code.
pub(crate) struct ConverterCache {
    cells: RwLock<HashMap<CacheKey, Arc<CacheCell>>>,
}

impl ConverterCache {
    pub(crate) fn new() -> Self {
        ConverterCache {
            cells: RwLock::new(HashMap::new()),
        }
    }
}

/// Tie-the-knot handle: a converter that forwards to a cache cell once
/// the cell is filled.
struct DeferredConverter {
    cell: Arc<CacheCell>,
    shape_name: Arc<str>,
}

impl DeferredConverter {
    fn resolve(&self) -> Result<&Arc<dyn Converter>> {
        self.cell.slot.get().ok_or_else(|| {
            SerializationError::composition(format!(
                "converter for {} was invoked before composition finished",
                self.shape_name
            ))
        })
    }
}

impl Converter for DeferredConverter {
    fn read(&self, reader: &mut SliceReader<'_>, ctx: &mut ReadContext<'_>) -> Result<Value> {
        self.resolve()?.read(reader, ctx)
    }

    fn write(
        &self,
        writer: &mut PackWriter,
        value: &Value,
        ctx: &mut WriteContext<'_>,
    ) -> Result<()> {
        self.resolve()?.write(writer, value, ctx)
    }

    fn read_into(
        &self,
        reader: &mut SliceReader<'_>,
        target: &shapepack_core::RecordRef,
        ctx: &mut ReadContext<'_>,
    ) -> Result<()> {
        self.resolve()?.read_into(reader, target, ctx)
    }

    fn supports_read_into(&self) -> bool {
        self.cell
            .slot
            .get()
            .is_some_and(|c| c.supports_read_into())
    }

    fn can_be_reference_preserved(&self) -> bool {
        self.cell
            .slot
            .get()
            .is_some_and(|c| c.can_be_reference_preserved())
    }

    fn prefer_async(&self) -> bool {
        self.cell.slot.get().is_some_and(|c| c.prefer_async())
    }
}

impl MessagePackSerializer {
    /// The converter for a shape: cached, or composed on first use.
    /// Never returns a null-equivalent; composition failures surface as
    /// [`ErrorCode::ConverterComposition`].
    pub fn get_converter(
        &self,
        registry: &Arc<ShapeRegistry>,
        shape: ShapeId,
    ) -> Result<Arc<dyn Converter>> {
        let key = cache_key(registry, shape);
        {
            let cells = self
                .cache()
                .cells
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(cell) = cells.get(&key) {
                if let Some(converter) = cell.slot.get() {
                    return Ok(converter.clone());
                }
                // Mid-composition: hand out the tie-the-knot handle.
                return Ok(Arc::new(DeferredConverter {
                    cell: cell.clone(),
                    shape_name: registry.get(shape).name.clone(),
                }));
            }
        }
        let cell = {
            let mut cells = self
                .cache()
                .cells
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            cells
                .entry(key)
                .or_insert_with(|| Arc::new(CacheCell::new()))
                .clone()
        };
        if let Some(converter) = cell.slot.get() {
            return Ok(converter.clone());
        }
        let composed = self.compose(registry, shape)?;
        // First publication wins; a concurrent composer's result is
        // simply the one everybody shares.
        let published = cell.slot.get_or_init(|| composed).clone();
        Ok(published)
    }

    fn compose(
        &self,
        registry: &Arc<ShapeRegistry>,
        shape_id: ShapeId,
    ) -> Result<Arc<dyn Converter>> {
        let shape = registry.get(shape_id);
        trace!("composing converter for {} ({})", shape.name, shape.kind.kind_name());

        let key = cache_key(registry, shape_id);
        if let Some(attached) = self.options().converters.get(&key) {
            return Ok(attached.clone());
        }
        for factory in &self.options().converter_factories {
            if let Some(converter) = factory.create(shape_id, registry, self) {
                return Ok(converter);
            }
        }

        match &shape.kind {
            ShapeKind::Scalar(kind) => Ok(Arc::new(ScalarConverter::new(*kind, self.options()))),
            ShapeKind::Enum(shape_enum) => Ok(Arc::new(EnumConverter::new(
                shape.name.clone(),
                shape_enum
                    .cases
                    .iter()
                    .map(|case| (case.name.clone(), case.value)),
                self.options(),
            ))),
            ShapeKind::Nullable(inner) => Ok(Arc::new(NullableConverter::new(
                self.get_converter(registry, *inner)?,
            ))),
            ShapeKind::Sequence(sequence) => {
                let element = self.get_converter(registry, sequence.element)?;
                if sequence.rank > 1 {
                    match self.options().multi_dimensional_array_format {
                        MultiDimFormat::Basic => {
                            Ok(Arc::new(MultiDimConverter::new(element, sequence.rank)))
                        }
                        MultiDimFormat::Lz4 => Err(SerializationError::new(
                            ErrorCode::Unsupported,
                            "the Lz4 multi-dimensional envelope is not available in this build",
                        )),
                    }
                } else {
                    Ok(Arc::new(SequenceConverter::new(element)))
                }
            }
            ShapeKind::Map(map) => Ok(Arc::new(MapConverter::new(
                self.get_converter(registry, map.key)?,
                self.get_converter(registry, map.value)?,
            ))),
            ShapeKind::Object(object) => self.compose_object(registry, shape, object),
            ShapeKind::Union(union) => self.compose_union(registry, shape_id, shape, union),
            ShapeKind::Surrogate(surrogate) => Ok(Arc::new(SurrogateConverter::new(
                self.get_converter(registry, surrogate.proxy)?,
                surrogate.marshaller.clone(),
            ))),
            ShapeKind::Opaque => Err(SerializationError::composition(format!(
                "shape {} is opaque and has no attached custom converter",
                shape.name
            ))),
        }
    }

    fn compose_object(
        &self,
        registry: &Arc<ShapeRegistry>,
        shape: &Shape,
        object: &ObjectShape,
    ) -> Result<Arc<dyn Converter>> {
        let mut properties = Vec::with_capacity(object.members.len());
        for member in &object.members {
            let converter = self.get_converter(registry, member.shape)?;
            let default = member
                .default
                .clone()
                .unwrap_or_else(|| implicit_default(registry, member.shape));
            properties.push(Property {
                decl_name: member.name.clone(),
                wire_name: self.options().wire_name(&member.name),
                key: member.key,
                required: member.required,
                default,
                nullable: member.nullable,
                value_kind: member.value_kind,
                access: member.access,
                converter,
            });
        }
        Ok(Arc::new(ObjectConverter::new(
            shape.name.clone(),
            properties,
            object.construction == Construction::Mutable,
            object.retains_unused_data,
            self.options().serialize_default_values,
            self.options().deserialize_default_values,
        )))
    }

    fn compose_union(
        &self,
        registry: &Arc<ShapeRegistry>,
        shape_id: ShapeId,
        shape: &Shape,
        union: &UnionShape,
    ) -> Result<Arc<dyn Converter>> {
        let base = self.get_converter(registry, union.base)?;

        // Runtime registration replaces the statically declared set
        // wholesale; partial registration does not merge.
        let key = cache_key(registry, shape_id);
        let case_list: Vec<(UnionTag, ShapeId)> = match self.options().derived_type_mappings.get(&key)
        {
            Some(mappings) => mappings.clone(),
            None => union
                .cases
                .iter()
                .map(|case| (case.tag.clone(), case.shape))
                .collect(),
        };

        let mut tags_seen = HashSet::new();
        let mut cases = Vec::with_capacity(case_list.len());
        for (tag, case_shape) in &case_list {
            if !tags_seen.insert(tag.clone()) {
                return Err(SerializationError::composition(format!(
                    "union {} declares discriminator {tag:?} twice",
                    shape.name
                )));
            }
            cases.push(ComposedCase {
                tag: tag.clone(),
                type_name: registry.get(*case_shape).name.clone(),
                converter: self.get_converter(registry, *case_shape)?,
                duck_markers: Vec::new(),
            });
        }

        if union.duck_typed {
            self.compute_duck_markers(registry, shape, &case_list, &mut cases)?;
        }

        // Nearest-ancestor dispatch is a table precomputation: every
        // shape in the registry maps to the registered case with the
        // shortest ancestor chain, if any.
        let mut by_type = HashMap::new();
        for candidate in registry.ids() {
            let mut best: Option<(usize, usize)> = None;
            for (index, (_, case_shape)) in case_list.iter().enumerate() {
                if let Some(distance) = registry.ancestor_distance(candidate, *case_shape) {
                    if best.is_none_or(|(bd, _)| distance < bd) {
                        best = Some((distance, index));
                    }
                }
            }
            if let Some((_, index)) = best {
                by_type.insert(registry.get(candidate).name.clone(), index);
            }
        }

        Ok(Arc::new(UnionConverter::new(
            shape.name.clone(),
            base,
            cases,
            by_type,
            union.duck_typed,
        )))
    }

    fn compute_duck_markers(
        &self,
        registry: &Arc<ShapeRegistry>,
        shape: &Shape,
        case_list: &[(UnionTag, ShapeId)],
        cases: &mut [ComposedCase],
    ) -> Result<()> {
        let mut required_names: Vec<Vec<Arc<str>>> = Vec::with_capacity(case_list.len());
        let mut all_names: Vec<HashSet<Arc<str>>> = Vec::with_capacity(case_list.len());
        for (_, case_shape) in case_list {
            let ShapeKind::Object(object) = &registry.get(*case_shape).kind else {
                return Err(SerializationError::composition(format!(
                    "duck-typed union {} requires object cases, but {} is not one",
                    shape.name,
                    registry.get(*case_shape).name
                )));
            };
            required_names.push(
                object
                    .members
                    .iter()
                    .filter(|m| m.required)
                    .map(|m| self.options().wire_name(&m.name))
                    .collect(),
            );
            all_names.push(
                object
                    .members
                    .iter()
                    .map(|m| self.options().wire_name(&m.name))
                    .collect(),
            );
        }
        for (index, case) in cases.iter_mut().enumerate() {
            let markers: Vec<Arc<str>> = required_names[index]
                .iter()
                .filter(|name| {
                    let name: &str = name.as_ref();
                    all_names
                        .iter()
                        .enumerate()
                        .all(|(other, names)| other == index || !names.contains(name))
                })
                .cloned()
                .collect();
            if markers.is_empty() {
                return Err(SerializationError::new(
                    ErrorCode::AmbiguousUnionShape,
                    format!(
                        "duck-typed union {}: case {} has no required member unique to it",
                        shape.name, case.type_name
                    ),
                ));
            }
            case.duck_markers = markers;
        }
        Ok(())
    }
}

/// The value assumed for a member that was neither written nor given a
/// declared default.
fn implicit_default(registry: &ShapeRegistry, shape: ShapeId) -> Value {
    match &registry.get(shape).kind {
        ShapeKind::Scalar(kind) => match kind {
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::Int | ScalarKind::UInt => Value::Int(0),
            ScalarKind::F32 => Value::F32(0.0),
            ScalarKind::F64 => Value::F64(0.0),
            ScalarKind::I128 => Value::I128(0),
            ScalarKind::U128 => Value::U128(0),
            ScalarKind::Decimal => Value::Decimal(rust_decimal::Decimal::ZERO),
            ScalarKind::Uuid => Value::Uuid(uuid::Uuid::nil()),
            ScalarKind::Timestamp => Value::Timestamp(shapepack_core::Timestamp::default()),
            ScalarKind::Str | ScalarKind::Bin => Value::Nil,
        },
        ShapeKind::Enum(shape_enum) => shape_enum
            .cases
            .iter()
            .find(|case| case.value == 0)
            .map(|case| Value::Str(case.name.clone()))
            .unwrap_or(Value::Nil),
        _ => Value::Nil,
    }
}
