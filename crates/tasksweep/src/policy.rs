//! Classification of captured tasks into ignorable and candidate.
//!
//! The catalog of known-safe background tasks belongs to the caller; this
//! module only holds the ordered predicate list and a few common shapes.

use std::collections::BTreeSet;
use std::fmt;

use crate::capture::{CaptureError, Capturer, Introspect};
use crate::snapshot::{TaskId, TaskSnapshot};

type Predicate = Box<dyn Fn(&TaskSnapshot) -> bool + Send + Sync>;

/// Ordered set of "ignore this task" predicates.
#[derive(Default)]
pub struct Policy {
    rules: Vec<Predicate>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore tasks for which `predicate` returns `true`.
    pub fn ignore_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TaskSnapshot) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Box::new(predicate));
        self
    }

    /// Ignore tasks whose topmost frame is exactly `function`.
    pub fn ignore_top_function(self, function: impl Into<String>) -> Self {
        let function = function.into();
        self.ignore_if(move |stack| stack.first_function() == function)
    }

    /// Ignore tasks with `function` anywhere on their stack.
    pub fn ignore_any_function(self, function: impl Into<String>) -> Self {
        let function = function.into();
        self.ignore_if(move |stack| stack.has_function(&function))
    }

    pub fn ignore_ids(self, ids: impl IntoIterator<Item = TaskId>) -> Self {
        let ids: BTreeSet<TaskId> = ids.into_iter().collect();
        self.ignore_if(move |stack| ids.contains(&stack.id()))
    }

    /// Ignore every task alive right now, so only tasks started later count.
    pub fn ignore_current<I: Introspect>(self, capturer: &Capturer<I>) -> Result<Self, CaptureError> {
        let baseline = capturer.all()?;
        Ok(self.ignore_ids(baseline.iter().map(TaskSnapshot::id)))
    }

    /// Whether any rule marks `stack` as ignorable. Rules run in insertion order.
    pub fn is_ignored(&self, stack: &TaskSnapshot) -> bool {
        self.rules.iter().any(|rule| rule(stack))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy").field("rules", &self.rules.len()).finish()
    }
}
