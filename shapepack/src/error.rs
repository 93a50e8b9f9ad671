//! The engine's single error surface.

use core::fmt;
use std::borrow::Cow;

use shapepack_codec::{CodecError, CodecErrorKind, StreamError};

use crate::Path;

/// Machine-readable classification of a [`SerializationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// The input ended mid-structure.
    UnexpectedEnd,
    /// The wire value (or in-memory value) does not match the shape.
    TypeMismatch,
    /// Bytes no conforming encoder produces.
    MalformedFormat,
    /// A required member was absent.
    MissingRequiredProperty,
    /// A nil arrived for a non-nullable member.
    DisallowedNullValue,
    /// The same member name or array key appeared twice in one object.
    DuplicateProperty,
    /// A union discriminator with no registered case.
    UnrecognizedUnionTag,
    /// Two duck-typed union cases cannot be told apart.
    AmbiguousUnionShape,
    /// A cycle that cannot be serialized or reconstructed in order.
    UnorderableCycle,
    /// An object reference id with no resolvable target.
    UnresolvedReference,
    /// A navigation path did not resolve.
    PathUnresolved,
    /// Converter composition failed for a shape.
    ConverterComposition,
    /// The operation was cooperatively cancelled.
    Cancelled,
    /// The feature is incompatible with the current configuration.
    Unsupported,
}

impl ErrorCode {
    /// Stable lowercase name of the code.
    pub const fn name(self) -> &'static str {
        match self {
            ErrorCode::UnexpectedEnd => "unexpected-end",
            ErrorCode::TypeMismatch => "type-mismatch",
            ErrorCode::MalformedFormat => "malformed-format",
            ErrorCode::MissingRequiredProperty => "missing-required-property",
            ErrorCode::DisallowedNullValue => "disallowed-null-value",
            ErrorCode::DuplicateProperty => "duplicate-property",
            ErrorCode::UnrecognizedUnionTag => "unrecognized-union-tag",
            ErrorCode::AmbiguousUnionShape => "ambiguous-union-shape",
            ErrorCode::UnorderableCycle => "unorderable-cycle",
            ErrorCode::UnresolvedReference => "unresolved-reference",
            ErrorCode::PathUnresolved => "path-unresolved",
            ErrorCode::ConverterComposition => "converter-composition",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Unsupported => "unsupported",
        }
    }
}

/// Error surfaced by every engine entry point.
///
/// Carries the [`ErrorCode`], the structural [`Path`] where the failure
/// happened, a human-readable message, and optionally the lower-level
/// cause. Failures are fatal to the current call; the engine never
/// resynchronizes a partially decoded value.
#[derive(Debug)]
pub struct SerializationError {
    /// Classification.
    pub code: ErrorCode,
    /// Where in the structure the failure happened.
    pub path: Path,
    /// Human-readable description.
    pub message: Cow<'static, str>,
    /// The underlying error, when one exists.
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SerializationError {
    /// An error with a code and message, at the root path.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        SerializationError {
            code,
            path: Path::new(),
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the structural path.
    pub fn at(mut self, path: Path) -> Self {
        self.path = path;
        self
    }

    /// Attach an underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Wrap a codec error, mapping its kind onto the engine codes.
    pub fn from_codec(error: CodecError, path: Path) -> Self {
        let code = match &error.kind {
            CodecErrorKind::UnexpectedEnd => ErrorCode::UnexpectedEnd,
            CodecErrorKind::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            CodecErrorKind::Malformed { .. } => ErrorCode::MalformedFormat,
        };
        SerializationError {
            code,
            path,
            message: Cow::Owned(error.to_string()),
            cause: Some(Box::new(error)),
        }
    }

    /// Wrap a streaming-layer error.
    pub fn from_stream(error: StreamError, path: Path) -> Self {
        match error {
            StreamError::Codec(e) => SerializationError::from_codec(e, path),
            StreamError::Io(e) => SerializationError {
                code: ErrorCode::UnexpectedEnd,
                path,
                message: Cow::Owned(format!("byte source failed: {e}")),
                cause: Some(Box::new(e)),
            },
        }
    }

    /// A cooperative-cancellation error.
    pub fn cancelled() -> Self {
        SerializationError::new(ErrorCode::Cancelled, "operation was cancelled")
    }

    /// An unsupported-configuration error.
    pub fn unsupported(message: impl Into<Cow<'static, str>>) -> Self {
        SerializationError::new(ErrorCode::Unsupported, message)
    }

    /// A composition error.
    pub fn composition(message: impl Into<Cow<'static, str>>) -> Self {
        SerializationError::new(ErrorCode::ConverterComposition, message)
    }

    /// A value/wire mismatch error.
    pub fn type_mismatch(message: impl Into<Cow<'static, str>>) -> Self {
        SerializationError::new(ErrorCode::TypeMismatch, message)
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.code.name(), self.path, self.message)
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result alias for engine operations.
pub type Result<T> = core::result::Result<T, SerializationError>;
