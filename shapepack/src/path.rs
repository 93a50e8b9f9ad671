//! Structural paths through a value, for diagnostics and navigation.

use core::fmt;
use std::sync::Arc;

use shapepack_core::Value;

/// One step through the structure of a value.
#[derive(Clone, PartialEq)]
pub enum PathStep {
    /// An object member, by name.
    Member(Arc<str>),
    /// A sequence element, by position.
    Index(usize),
    /// A map entry, by key value.
    Key(Value),
}

impl PathStep {
    /// A member step.
    pub fn member(name: impl Into<Arc<str>>) -> Self {
        PathStep::Member(name.into())
    }

    /// A key step from anything convertible to a [`Value`].
    pub fn key(key: impl Into<Value>) -> Self {
        PathStep::Key(key.into())
    }
}

impl fmt::Debug for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Member(name) => write!(f, ".{name}"),
            PathStep::Index(i) => write!(f, "[{i}]"),
            PathStep::Key(key) => write!(f, "[{key:?}]"),
        }
    }
}

impl From<usize> for PathStep {
    fn from(i: usize) -> Self {
        PathStep::Index(i)
    }
}

impl From<&str> for PathStep {
    fn from(name: &str) -> Self {
        PathStep::Member(Arc::from(name))
    }
}

/// A structural path, rendered `$.member.inner[2]` style.
#[derive(Clone, Default, PartialEq)]
pub struct Path {
    steps: Vec<PathStep>,
}

impl Path {
    /// The empty (root) path.
    pub const fn new() -> Self {
        Path { steps: Vec::new() }
    }

    /// A path from a list of steps.
    pub fn from_steps(steps: impl IntoIterator<Item = PathStep>) -> Self {
        Path {
            steps: steps.into_iter().collect(),
        }
    }

    /// Append a step.
    pub fn push(&mut self, step: PathStep) {
        self.steps.push(step);
    }

    /// Remove the last step.
    pub fn pop(&mut self) {
        self.steps.pop();
    }

    /// The steps in order.
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for step in &self.steps {
            write!(f, "{step:?}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
