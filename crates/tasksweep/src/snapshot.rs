use std::fmt;

use facet::Facet;

/// Task ID as reported in a dump header.
pub type TaskId = u64;

/// One task parsed out of a dump.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct TaskSnapshot {
    /// ID from the `task <id> [<state>]:` header.
    pub(crate) id: TaskId,
    /// State label between the brackets, copied verbatim.
    pub(crate) state: String,
    /// Topmost frame with its argument list stripped. Empty if the record has no body.
    pub(crate) first_function: String,
    /// Header line plus every body line, byte-for-byte.
    pub(crate) full_stack: String,
}

impl TaskSnapshot {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn first_function(&self) -> &str {
        &self.first_function
    }

    pub fn full_stack(&self) -> &str {
        &self.full_stack
    }

    /// Whether any frame in the stack calls `function`.
    ///
    /// Frame lines look like `path::to::function(...)`; the header and the
    /// indented location lines never match.
    pub fn has_function(&self, function: &str) -> bool {
        self.full_stack
            .lines()
            .skip(1)
            .filter(|line| !line.starts_with(char::is_whitespace))
            .filter_map(|line| line.find('(').map(|idx| &line[..idx]))
            .any(|frame| frame == function)
    }
}

impl fmt::Display for TaskSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task {} in state {}, with {} on top of the stack:\n{}",
            self.id, self.state, self.first_function, self.full_stack
        )
    }
}
