//! Parser for the live-task dump format.
//!
//! A dump is a sequence of records. Each record opens with a header line
//!
//! ```text
//! task 17 [idle]:
//! ```
//!
//! followed by body lines (frames and their locations), and runs until the
//! next header or the end of input. There is no length prefix anywhere, so
//! the header prefix is the only record separator.

use std::error::Error;
use std::fmt;

use crate::snapshot::{TaskId, TaskSnapshot};

const HEADER_PREFIX: &str = "task ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Header did not split into `task`, an ID, and a state.
    MalformedHeader { line: String },
    /// Header ID field was not a decimal integer.
    InvalidTaskId { field: String, line: String },
    /// First frame of a record had no argument list, or nothing before it.
    MalformedFrame { line: String },
    /// Body text appeared before the first header.
    OrphanLine { line: String },
    /// A current-task capture described more than one task.
    UnexpectedTaskCount { expected: usize, got: usize },
    /// The dump contained no records at all.
    NoTasks,
}

impl ParseError {
    /// `true` for grammar violations, `false` for an empty dump.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::NoTasks)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHeader { line } => write!(
                f,
                "stack header not in expected format \"task ID-NUM [state]\", got {line:?}"
            ),
            Self::InvalidTaskId { field, line } => {
                write!(f, "failed to parse task ID {field:?} in line {line:?}")
            }
            Self::MalformedFrame { line } => {
                write!(f, "function call missing argument list: {line:?}")
            }
            Self::OrphanLine { line } => {
                write!(f, "stack line appears before any task header: {line:?}")
            }
            Self::UnexpectedTaskCount { expected, got } => {
                write!(f, "expected {expected} task(s) in dump, got {got}")
            }
            Self::NoTasks => write!(f, "no stacks parsed"),
        }
    }
}

impl Error for ParseError {}

struct PartialRecord {
    id: TaskId,
    state: String,
    first_function: Option<String>,
    full_stack: String,
}

impl PartialRecord {
    fn finish(self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            state: self.state,
            first_function: self.first_function.unwrap_or_default(),
            full_stack: self.full_stack,
        }
    }
}

/// Parse a raw dump into task records, in dump order.
///
/// Fails on the first grammar violation without returning partial output,
/// and with [`ParseError::NoTasks`] if the input holds no records.
pub fn parse(raw: &[u8]) -> Result<Vec<TaskSnapshot>, ParseError> {
    let text = String::from_utf8_lossy(raw);
    let mut stacks = Vec::new();
    let mut current: Option<PartialRecord> = None;

    for line in text.split_inclusive('\n') {
        if line.starts_with(HEADER_PREFIX) {
            if let Some(done) = current.take() {
                stacks.push(done.finish());
            }
            let (id, state) = parse_header(line)?;
            current = Some(PartialRecord {
                id,
                state,
                first_function: None,
                full_stack: line.to_owned(),
            });
            continue;
        }

        let Some(record) = current.as_mut() else {
            return Err(ParseError::OrphanLine {
                line: line.to_owned(),
            });
        };
        if record.first_function.is_none() {
            record.first_function = Some(parse_first_function(line)?);
        }
        record.full_stack.push_str(line);
    }

    if let Some(done) = current {
        stacks.push(done.finish());
    }

    if stacks.is_empty() {
        return Err(ParseError::NoTasks);
    }
    Ok(stacks)
}

/// Parse a dump that must describe exactly one task.
pub fn parse_single(raw: &[u8]) -> Result<TaskSnapshot, ParseError> {
    let mut stacks = parse(raw)?;
    if stacks.len() != 1 {
        return Err(ParseError::UnexpectedTaskCount {
            expected: 1,
            got: stacks.len(),
        });
    }
    Ok(stacks.remove(0))
}

// task 643 [chan receive]:\n
fn parse_header(line: &str) -> Result<(TaskId, String), ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let line = line.strip_suffix(':').unwrap_or(line);

    let mut parts = line.splitn(3, ' ');
    let (Some(_), Some(id_field), Some(state)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ParseError::MalformedHeader {
            line: line.to_owned(),
        });
    };

    let id = id_field
        .parse::<TaskId>()
        .map_err(|_| ParseError::InvalidTaskId {
            field: id_field.to_owned(),
            line: line.to_owned(),
        })?;

    let state = state.strip_prefix('[').unwrap_or(state);
    let state = state.strip_suffix(']').unwrap_or(state);
    Ok((id, state.to_owned()))
}

fn parse_first_function(line: &str) -> Result<String, ParseError> {
    let trimmed = line.trim();
    match trimmed.find('(') {
        Some(idx) if idx > 0 => Ok(trimmed[..idx].to_owned()),
        _ => Err(ParseError::MalformedFrame {
            line: trimmed.to_owned(),
        }),
    }
}
