//! The shape provider: an id-indexed, frozen collection of shapes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Shape, ShapeId, ShapeKind};

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// A frozen collection of [`Shape`]s, addressed by [`ShapeId`].
///
/// Built once through [`ShapeRegistryBuilder`] and then shared; the
/// converter cache keys on `(provider_id, shape id)`, so every registry
/// gets a process-unique provider id.
pub struct ShapeRegistry {
    provider_id: u64,
    shapes: Vec<Shape>,
    by_name: HashMap<Arc<str>, ShapeId>,
}

impl ShapeRegistry {
    /// Start building a registry.
    pub fn builder() -> ShapeRegistryBuilder {
        ShapeRegistryBuilder::default()
    }

    /// Process-unique identity of this registry.
    pub fn provider_id(&self) -> u64 {
        self.provider_id
    }

    /// The shape for an id issued by this registry.
    pub fn get(&self, id: ShapeId) -> &Shape {
        &self.shapes[id.index()]
    }

    /// Look a shape up by type name.
    pub fn lookup(&self, name: &str) -> Option<ShapeId> {
        self.by_name.get(name).copied()
    }

    /// Number of registered shapes.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// All ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = ShapeId> + '_ {
        (0..self.shapes.len() as u32).map(ShapeId)
    }

    /// The ancestor chain of an object shape, nearest first, excluding
    /// `id` itself. Non-object shapes have no ancestors.
    pub fn ancestors(&self, id: ShapeId) -> impl Iterator<Item = ShapeId> + '_ {
        let mut current = match &self.get(id).kind {
            ShapeKind::Object(object) => object.extends,
            _ => None,
        };
        core::iter::from_fn(move || {
            let next = current?;
            current = match &self.get(next).kind {
                ShapeKind::Object(object) => object.extends,
                _ => None,
            };
            Some(next)
        })
    }

    /// Distance in `extends` steps from `descendant` up to `ancestor`.
    /// `Some(0)` when they are the same shape.
    pub fn ancestor_distance(&self, descendant: ShapeId, ancestor: ShapeId) -> Option<usize> {
        if descendant == ancestor {
            return Some(0);
        }
        self.ancestors(descendant)
            .position(|id| id == ancestor)
            .map(|pos| pos + 1)
    }
}

/// Accumulates shapes, then freezes them into a [`ShapeRegistry`].
#[derive(Default)]
pub struct ShapeRegistryBuilder {
    shapes: Vec<Shape>,
    by_name: HashMap<Arc<str>, ShapeId>,
}

impl ShapeRegistryBuilder {
    /// A fresh builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a complete shape. Re-registering a name replaces the
    /// previous definition in name lookups but keeps the old id valid.
    pub fn register(&mut self, name: impl Into<Arc<str>>, kind: ShapeKind) -> ShapeId {
        let name = name.into();
        let id = ShapeId(self.shapes.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.shapes.push(Shape { name, kind });
        id
    }

    /// Forward-declare a shape so that other shapes (including itself)
    /// can reference it. The slot starts out [`ShapeKind::Opaque`]; fill
    /// it with [`ShapeRegistryBuilder::define`].
    pub fn declare(&mut self, name: impl Into<Arc<str>>) -> ShapeId {
        self.register(name, ShapeKind::Opaque)
    }

    /// Fill a previously declared slot.
    pub fn define(&mut self, id: ShapeId, kind: ShapeKind) {
        self.shapes[id.index()].kind = kind;
    }

    /// Freeze into a shared registry.
    pub fn build(self) -> Arc<ShapeRegistry> {
        Arc::new(ShapeRegistry {
            provider_id: NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed),
            shapes: self.shapes,
            by_name: self.by_name,
        })
    }
}
