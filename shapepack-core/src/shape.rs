//! Passive descriptions of serializable types.
//!
//! A [`Shape`] says what a type *is* — scalar, sequence, object with
//! members, union of cases — without knowing how any wire format encodes
//! it. Shapes reference each other by [`ShapeId`] through the registry
//! that owns them, which is what lets cyclic type graphs be described.

use core::fmt;
use std::sync::Arc;

use crate::Value;

/// Identifier of a shape within its [`crate::ShapeRegistry`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub(crate) u32);

impl ShapeId {
    /// Position of the shape in its registry.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShapeId({})", self.0)
    }
}

/// A named, passive description of one type.
pub struct Shape {
    /// Type name, unique within the registry.
    pub name: Arc<str>,
    /// What the type is.
    pub kind: ShapeKind,
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({} = {})", self.name, self.kind.kind_name())
    }
}

/// The structural kind of a shape.
pub enum ShapeKind {
    /// A leaf value.
    Scalar(ScalarKind),
    /// A closed set of named cases.
    Enum(EnumShape),
    /// An optional wrapper around an inner shape.
    Nullable(ShapeId),
    /// A homogeneous sequence.
    Sequence(SequenceShape),
    /// A homogeneous key/value mapping.
    Map(MapShape),
    /// An object with named/keyed members.
    Object(ObjectShape),
    /// A closed polymorphic hierarchy dispatched by discriminator.
    Union(UnionShape),
    /// A type serialized through a proxy shape.
    Surrogate(SurrogateShape),
    /// No intrinsic mapping; a custom converter must be attached.
    Opaque,
}

impl ShapeKind {
    /// A short name for diagnostics.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            ShapeKind::Scalar(_) => "scalar",
            ShapeKind::Enum(_) => "enum",
            ShapeKind::Nullable(_) => "nullable",
            ShapeKind::Sequence(_) => "sequence",
            ShapeKind::Map(_) => "map",
            ShapeKind::Object(_) => "object",
            ShapeKind::Union(_) => "union",
            ShapeKind::Surrogate(_) => "surrogate",
            ShapeKind::Opaque => "opaque",
        }
    }
}

/// Leaf value kinds with intrinsic wire mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Boolean.
    Bool,
    /// Signed integer up to 64 bits.
    Int,
    /// Unsigned integer up to 64 bits.
    UInt,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// UTF-8 string.
    Str,
    /// Raw bytes.
    Bin,
    /// Signed 128-bit integer (extension-encoded).
    I128,
    /// Unsigned 128-bit integer (extension-encoded).
    U128,
    /// Fixed-point decimal (extension-encoded).
    Decimal,
    /// UUID / GUID (extension-encoded).
    Uuid,
    /// Wall-clock instant (timestamp extension).
    Timestamp,
}

/// Cases of an [`ShapeKind::Enum`].
pub struct EnumShape {
    /// Declared cases.
    pub cases: Vec<EnumCase>,
}

/// One named enum case with its integer value.
pub struct EnumCase {
    /// Case name (the by-name wire form).
    pub name: Arc<str>,
    /// Case value (the default wire form).
    pub value: i64,
}

/// Element type of a [`ShapeKind::Sequence`].
pub struct SequenceShape {
    /// Element shape.
    pub element: ShapeId,
    /// Whether element order is significant (lists vs. sets).
    pub ordered: bool,
    /// Number of dimensions. Ranks above 1 use the configured
    /// multi-dimensional envelope; the value form is nested arrays.
    pub rank: u32,
}

impl SequenceShape {
    /// An ordered, one-dimensional sequence.
    pub fn new(element: ShapeId) -> Self {
        SequenceShape {
            element,
            ordered: true,
            rank: 1,
        }
    }

    /// Builder-style: element order is not significant.
    pub fn unordered(mut self) -> Self {
        self.ordered = false;
        self
    }

    /// Builder-style: a multi-dimensional array of the given rank.
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }
}

/// Key/value types of a [`ShapeKind::Map`].
pub struct MapShape {
    /// Key shape.
    pub key: ShapeId,
    /// Value shape.
    pub value: ShapeId,
}

/// How object values come into existence on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Construction {
    /// Two-phase: construct empty, then assign members. Required for a
    /// record to sit on the receiving end of a decoded cycle.
    #[default]
    Mutable,
    /// Single-phase: all members are bound at construction, in
    /// declaration order.
    Parameterized,
}

/// Members, constructor and versioning policy of an object shape.
pub struct ObjectShape {
    /// Members in declaration order.
    pub members: Vec<MemberShape>,
    /// How values of this shape are constructed on read.
    pub construction: Construction,
    /// Ancestor shape, if this object derives from another. Union
    /// dispatch walks this chain for the nearest registered ancestor.
    pub extends: Option<ShapeId>,
    /// Whether unrecognized members are captured and re-emitted.
    pub retains_unused_data: bool,
}

impl ObjectShape {
    /// An object shape with the given members and defaults elsewhere.
    pub fn new(members: Vec<MemberShape>) -> Self {
        ObjectShape {
            members,
            construction: Construction::Mutable,
            extends: None,
            retains_unused_data: false,
        }
    }

    /// Builder-style: single-phase construction.
    pub fn parameterized(mut self) -> Self {
        self.construction = Construction::Parameterized;
        self
    }

    /// Builder-style: set the ancestor link.
    pub fn extending(mut self, ancestor: ShapeId) -> Self {
        self.extends = Some(ancestor);
        self
    }

    /// Builder-style: capture unrecognized members.
    pub fn version_safe(mut self) -> Self {
        self.retains_unused_data = true;
        self
    }
}

/// Access capability of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemberAccess {
    /// Readable and writable.
    #[default]
    ReadWrite,
    /// Computed: read on write, never assigned on read.
    ReadOnly,
    /// Constructor parameter: assigned on read, not read back.
    WriteOnly,
}

/// One property of an object shape.
pub struct MemberShape {
    /// Declared name. Naming policies transform this at composition time.
    pub name: Arc<str>,
    /// Array-layout slot, if the member participates in array layout.
    pub key: Option<u32>,
    /// Shape of the member's value.
    pub shape: ShapeId,
    /// Must be present on read.
    pub required: bool,
    /// Value to assume when omitted.
    pub default: Option<Value>,
    /// Whether nil is an acceptable value.
    pub nullable: bool,
    /// Whether the member's type is value-like (scalar/enum), as consumed
    /// by the default-values policy.
    pub value_kind: bool,
    /// Getter/setter capability.
    pub access: MemberAccess,
}

impl MemberShape {
    /// A mutable, optional member.
    pub fn new(name: impl Into<Arc<str>>, shape: ShapeId) -> Self {
        MemberShape {
            name: name.into(),
            key: None,
            shape,
            required: false,
            default: None,
            nullable: false,
            value_kind: false,
            access: MemberAccess::ReadWrite,
        }
    }

    /// Builder-style: assign an array-layout key.
    pub fn with_key(mut self, key: u32) -> Self {
        self.key = Some(key);
        self
    }

    /// Builder-style: mark required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder-style: declare a default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Builder-style: accept nil.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Builder-style: mark the member's type value-like.
    pub fn value_kind(mut self) -> Self {
        self.value_kind = true;
        self
    }

    /// Builder-style: set the access capability.
    pub fn with_access(mut self, access: MemberAccess) -> Self {
        self.access = access;
        self
    }
}

/// Discriminator carried on the wire for a union case.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum UnionTag {
    /// 32-bit signed integer discriminator.
    Int(i32),
    /// String discriminator.
    Str(Arc<str>),
}

impl fmt::Debug for UnionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnionTag::Int(v) => write!(f, "{v}"),
            UnionTag::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i32> for UnionTag {
    fn from(v: i32) -> Self {
        UnionTag::Int(v)
    }
}

impl From<&str> for UnionTag {
    fn from(v: &str) -> Self {
        UnionTag::Str(Arc::from(v))
    }
}

/// One `(discriminator, sub-shape)` entry of a union.
pub struct UnionCase {
    /// Wire discriminator.
    pub tag: UnionTag,
    /// Shape of the case.
    pub shape: ShapeId,
}

impl UnionCase {
    /// A union case.
    pub fn new(tag: impl Into<UnionTag>, shape: ShapeId) -> Self {
        UnionCase {
            tag: tag.into(),
            shape,
        }
    }
}

/// A polymorphic hierarchy with a base shape and discriminated cases.
pub struct UnionShape {
    /// The base type, encoded with a nil discriminator.
    pub base: ShapeId,
    /// Registered cases.
    pub cases: Vec<UnionCase>,
    /// Discriminate by probing for case-unique required members instead
    /// of reading a wire discriminator.
    pub duck_typed: bool,
}

/// Conversion functions between a user shape and its proxy.
#[derive(Clone)]
pub struct Marshaller {
    /// User value to proxy value.
    pub to_proxy: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
    /// Proxy value back to user value.
    pub from_proxy: Arc<dyn Fn(Value) -> Value + Send + Sync>,
}

impl Marshaller {
    /// A marshaller from a pair of closures.
    pub fn new(
        to_proxy: impl Fn(&Value) -> Value + Send + Sync + 'static,
        from_proxy: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Marshaller {
            to_proxy: Arc::new(to_proxy),
            from_proxy: Arc::new(from_proxy),
        }
    }
}

impl fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Marshaller")
    }
}

/// A type serialized as its proxy shape.
pub struct SurrogateShape {
    /// The shape actually written to / read from the wire.
    pub proxy: ShapeId,
    /// User ↔ proxy conversion.
    pub marshaller: Marshaller,
}
