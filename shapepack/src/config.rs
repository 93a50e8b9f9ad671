//! The serializer value's recognized options.
//!
//! The serializer is an immutable configuration bundle; every `with_*`
//! method on [`crate::MessagePackSerializer`] returns a new value with a
//! fresh converter cache, so converters composed under one configuration
//! never observe another.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use shapepack_core::{DateTimeKind, ShapeId, UnionTag, Value, bitflags};

bitflags! {
    /// When members equal to their default are still written.
    ///
    /// The empty set is the `Never` policy: only values that differ from
    /// their (declared or implicit) default are written. Flags are
    /// combined bitwise, e.g. `REQUIRED | VALUE_KINDS`.
    pub struct SerializeDefaultValues: u32 {
        /// Write every member regardless of value.
        const ALWAYS = 1 << 0;
        /// Write required members even at their default.
        const REQUIRED = 1 << 1;
        /// Write reference-kind members even at their default.
        const REFERENCE_KINDS = 1 << 2;
        /// Write value-kind members even at their default.
        const VALUE_KINDS = 1 << 3;
    }
}

impl SerializeDefaultValues {
    /// The `Never` policy.
    pub const NEVER: SerializeDefaultValues = SerializeDefaultValues::empty();
}

bitflags! {
    /// Leniencies applied while reading objects.
    pub struct DeserializeDefaultValues: u32 {
        /// Use the member default instead of failing when a required
        /// member is absent.
        const ALLOW_MISSING_REQUIRED = 1 << 0;
        /// Accept nil for non-nullable members.
        const ALLOW_NULL_FOR_NON_NULLABLE = 1 << 1;
    }
}

/// Whether and how object identity is preserved on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferencePreservation {
    /// Every occurrence is written as a full body; cycles hang the
    /// caller's object graph, not this engine, because graphs are trees
    /// to the writer.
    #[default]
    Off,
    /// Repeated objects become references; cycles are detected during
    /// encode and rejected.
    RejectCycles,
    /// Repeated objects become references; cycles round-trip when the
    /// shape supports two-phase construction.
    AllowCycles,
}

impl ReferencePreservation {
    /// Whether any tracking happens.
    pub const fn is_on(self) -> bool {
        !matches!(self, ReferencePreservation::Off)
    }
}

/// Member name transform applied at composition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameConvention {
    /// `memberName`.
    CamelCase,
    /// `member_name`.
    SnakeCase,
    /// `member-name`.
    KebabCase,
    /// `MemberName`.
    PascalCase,
}

impl NameConvention {
    /// Apply the convention to a declared member name.
    pub fn apply(self, name: &str) -> String {
        let words = split_words(name);
        match self {
            NameConvention::SnakeCase => words.join("_"),
            NameConvention::KebabCase => words.join("-"),
            NameConvention::PascalCase => words.iter().map(|w| capitalize(w)).collect(),
            NameConvention::CamelCase => {
                let mut out = String::new();
                for (i, word) in words.iter().enumerate() {
                    if i == 0 {
                        out.push_str(word);
                    } else {
                        out.push_str(&capitalize(word));
                    }
                }
                out
            }
        }
    }
}

fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                words.push(core::mem::take(&mut current));
            }
            prev_lower = false;
        } else if c.is_uppercase() && prev_lower {
            words.push(core::mem::take(&mut current));
            current.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.extend(c.to_lowercase());
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Envelope used for multi-dimensional arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiDimFormat {
    /// `[dimension lengths, flat elements]`.
    #[default]
    Basic,
    /// LZ4-compressed flat elements. Recognized but not shipped; shapes
    /// of rank above one report `Unsupported` under this format.
    Lz4,
}

/// Extension type-code bytes reserved by the engine, each independently
/// reconfigurable. Defaults sit in the negative application space, clear
/// of the standard `-1` timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionCodes {
    /// Back reference to an already-encoded object; payload is the
    /// varint id.
    pub object_reference: i8,
    /// Fixed 16-byte big-endian decimal.
    pub decimal: i8,
    /// Two's-complement big-endian arbitrary integer, minimal length.
    /// Reserved for custom converters; no intrinsic scalar claims it.
    pub big_integer: i8,
    /// 16-byte big-endian signed integer.
    pub int128: i8,
    /// 16-byte big-endian unsigned integer.
    pub uint128: i8,
    /// 16-byte GUID, RFC byte order.
    pub guid: i8,
}

impl Default for ExtensionCodes {
    fn default() -> Self {
        ExtensionCodes {
            object_reference: -101,
            decimal: -102,
            big_integer: -103,
            int128: -104,
            uint128: -105,
            guid: -106,
        }
    }
}

/// String-keyed state threaded into every converter call.
///
/// Mutations made by a converter are scoped to its subtree: the engine
/// snapshots the bag around nested custom-converter calls.
#[derive(Debug, Clone, Default)]
pub struct StateBag {
    entries: HashMap<String, Value>,
}

impl StateBag {
    /// An empty bag.
    pub fn new() -> Self {
        StateBag::default()
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Insert or replace an entry.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Remove an entry.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cooperative cancellation handle.
///
/// Checked at every buffer refill and flush boundary and at async element
/// boundaries; between those points work is synchronous and runs to the
/// next check.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request cancellation. Safe from any thread.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// A member-name transform supplied as a function.
pub type NamingPolicy = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// The full option set carried by a serializer value.
#[derive(Clone, Default)]
pub(crate) struct SerializerOptions {
    pub preserve_references: ReferencePreservation,
    pub intern_strings: bool,
    pub preserve_string_identity: bool,
    pub serialize_default_values: SerializeDefaultValues,
    pub deserialize_default_values: DeserializeDefaultValues,
    pub serialize_enums_by_name: bool,
    pub property_naming_policy: Option<NamingPolicy>,
    pub property_name_convention: Option<NameConvention>,
    pub assumed_datetime_kind: AssumedDateTimeKind,
    pub hi_fi_datetime: bool,
    pub max_async_buffer: usize,
    pub multi_dimensional_array_format: MultiDimFormat,
    pub extension_codes: ExtensionCodes,
    pub starting_context: StateBag,
    /// Converters attached to specific shapes; absolute precedence.
    pub converters: HashMap<(u64, u32), Arc<dyn crate::Converter>>,
    /// User factories, consulted in order before intrinsic composition.
    pub converter_factories: Vec<Arc<dyn crate::ConverterFactory>>,
    /// Union case sets registered at configuration time, replacing the
    /// shape-declared set for that base wholesale.
    pub derived_type_mappings: HashMap<(u64, u32), Vec<(UnionTag, ShapeId)>>,
}

/// Interpretation of wall-clock instants whose kind is unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssumedDateTimeKind {
    /// Treat unspecified instants as UTC.
    #[default]
    Utc,
    /// Treat unspecified instants as local time.
    Local,
}

impl AssumedDateTimeKind {
    /// The concrete kind this assumption resolves to.
    pub const fn resolve(self) -> DateTimeKind {
        match self {
            AssumedDateTimeKind::Utc => DateTimeKind::Utc,
            AssumedDateTimeKind::Local => DateTimeKind::Local,
        }
    }
}

impl SerializerOptions {
    pub(crate) fn with_defaults() -> Self {
        SerializerOptions {
            extension_codes: ExtensionCodes::default(),
            max_async_buffer: 64 * 1024,
            ..SerializerOptions::default()
        }
    }

    /// The wire name of a member under the current naming options. The
    /// convention, if set, takes precedence over the policy function.
    pub(crate) fn wire_name(&self, declared: &str) -> Arc<str> {
        if let Some(convention) = self.property_name_convention {
            return Arc::from(convention.apply(declared));
        }
        if let Some(policy) = &self.property_naming_policy {
            return Arc::from(policy(declared));
        }
        Arc::from(declared)
    }
}
