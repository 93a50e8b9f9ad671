//! Per-call state threaded through every converter invocation.
//!
//! Contexts are per-call arenas: the reference tables and the intern
//! table live exactly as long as one serialize/deserialize call.

use std::collections::HashSet;
use std::sync::Arc;

use shapepack_codec::CodecError;
use shapepack_core::ShapeRegistry;

use crate::config::SerializerOptions;
use crate::refs::{ReadRefs, WriteRefs};
use crate::{CancelToken, Path, Result, SerializationError, StateBag};

/// Per-call string intern table.
///
/// Repeated strings on the wire come back as the same shared allocation.
#[derive(Default)]
pub(crate) struct Interner {
    strings: HashSet<Arc<str>>,
}

impl Interner {
    pub(crate) fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return existing.clone();
        }
        let shared: Arc<str> = Arc::from(s);
        self.strings.insert(shared.clone());
        shared
    }
}

/// State carried through one deserialization call.
pub struct ReadContext<'s> {
    pub(crate) options: &'s SerializerOptions,
    pub(crate) registry: Arc<ShapeRegistry>,
    pub(crate) path: Path,
    pub(crate) refs: ReadRefs,
    pub(crate) interner: Interner,
    state: StateBag,
    cancel: CancelToken,
}

impl<'s> ReadContext<'s> {
    pub(crate) fn new(
        options: &'s SerializerOptions,
        registry: Arc<ShapeRegistry>,
        cancel: CancelToken,
    ) -> Self {
        ReadContext {
            options,
            registry,
            path: Path::new(),
            refs: ReadRefs::new(options.preserve_references),
            interner: Interner::default(),
            state: options.starting_context.clone(),
            cancel,
        }
    }

    /// The shape registry for this call.
    pub fn registry(&self) -> &Arc<ShapeRegistry> {
        &self.registry
    }

    /// The structural path currently being decoded.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The string-keyed state bag.
    pub fn state(&self) -> &StateBag {
        &self.state
    }

    /// Mutable access to the state bag. Use
    /// [`ReadContext::scoped_state`] when the mutation must not outlive
    /// a subtree.
    pub fn state_mut(&mut self) -> &mut StateBag {
        &mut self.state
    }

    /// Run `f` with state-bag mutations confined to that call.
    pub fn scoped_state<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.state.clone();
        let result = f(self);
        self.state = saved;
        result
    }

    pub(crate) fn snapshot_state(&self) -> StateBag {
        self.state.clone()
    }

    pub(crate) fn restore_state(&mut self, saved: StateBag) {
        self.state = saved;
    }

    /// Fail if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SerializationError::cancelled().at(self.path.clone()))
        } else {
            Ok(())
        }
    }

    /// Wrap a codec error with the current path.
    pub(crate) fn codec(&self, error: CodecError) -> SerializationError {
        SerializationError::from_codec(error, self.path.clone())
    }

    /// Build an engine error at the current path.
    pub(crate) fn error(
        &self,
        code: crate::ErrorCode,
        message: impl Into<std::borrow::Cow<'static, str>>,
    ) -> SerializationError {
        SerializationError::new(code, message).at(self.path.clone())
    }
}

/// State carried through one serialization call.
pub struct WriteContext<'s> {
    pub(crate) options: &'s SerializerOptions,
    pub(crate) registry: Arc<ShapeRegistry>,
    pub(crate) path: Path,
    pub(crate) refs: WriteRefs,
    state: StateBag,
    cancel: CancelToken,
}

impl<'s> WriteContext<'s> {
    pub(crate) fn new(
        options: &'s SerializerOptions,
        registry: Arc<ShapeRegistry>,
        cancel: CancelToken,
    ) -> Self {
        WriteContext {
            options,
            registry,
            path: Path::new(),
            refs: WriteRefs::new(options.preserve_references),
            state: options.starting_context.clone(),
            cancel,
        }
    }

    /// The shape registry for this call.
    pub fn registry(&self) -> &Arc<ShapeRegistry> {
        &self.registry
    }

    /// The structural path currently being encoded.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The string-keyed state bag.
    pub fn state(&self) -> &StateBag {
        &self.state
    }

    /// Mutable access to the state bag.
    pub fn state_mut(&mut self) -> &mut StateBag {
        &mut self.state
    }

    /// Run `f` with state-bag mutations confined to that call.
    pub fn scoped_state<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.state.clone();
        let result = f(self);
        self.state = saved;
        result
    }

    pub(crate) fn snapshot_state(&self) -> StateBag {
        self.state.clone()
    }

    pub(crate) fn restore_state(&mut self, saved: StateBag) {
        self.state = saved;
    }

    /// Fail if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SerializationError::cancelled().at(self.path.clone()))
        } else {
            Ok(())
        }
    }

    /// Build an engine error at the current path.
    pub(crate) fn error(
        &self,
        code: crate::ErrorCode,
        message: impl Into<std::borrow::Cow<'static, str>>,
    ) -> SerializationError {
        SerializationError::new(code, message).at(self.path.clone())
    }
}
