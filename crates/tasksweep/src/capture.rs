//! Raw dump capture from a runtime's introspection primitive.
//!
//! The primitive fills a caller-provided buffer and reports how much it
//! wrote, but cannot say how large the full dump would have been. A report
//! equal to the buffer's capacity therefore means "possibly truncated", and
//! the only way forward is a bigger buffer.

use std::error::Error;
use std::fmt;

use tracing::debug;

use crate::parse::{self, ParseError};
use crate::snapshot::TaskSnapshot;

/// Initial buffer size for a dump.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
/// Largest buffer the capturer will allocate before giving up.
pub const DEFAULT_BUFFER_CEILING: usize = 64 * 1024 * 1024;

/// Source of live-task dumps.
///
/// Implementations write at most `buf.len()` bytes of the dump (all tasks if
/// `all`, otherwise only the calling task) and return the number written.
pub trait Introspect {
    fn fill(&self, buf: &mut [u8], all: bool) -> usize;
}

impl<T: Introspect + ?Sized> Introspect for &T {
    fn fill(&self, buf: &mut [u8], all: bool) -> usize {
        (**self).fill(buf, all)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The dump still filled a buffer of the ceiling size.
    DumpTooLarge { ceiling: usize },
    /// The primitive claimed to write more than the buffer holds.
    Overreported { capacity: usize, reported: usize },
    Parse(ParseError),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DumpTooLarge { ceiling } => {
                write!(f, "task dump does not fit in {ceiling} bytes")
            }
            Self::Overreported { capacity, reported } => write!(
                f,
                "invariant violated: introspection reported {reported} bytes for a {capacity}-byte buffer"
            ),
            Self::Parse(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CaptureError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ParseError> for CaptureError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}

/// Captures dumps from an [`Introspect`] source, growing the buffer as needed.
#[derive(Debug, Clone)]
pub struct Capturer<I> {
    source: I,
    initial_size: usize,
    ceiling: usize,
}

impl<I: Introspect> Capturer<I> {
    pub fn new(source: I) -> Self {
        Self {
            source,
            initial_size: DEFAULT_BUFFER_SIZE,
            ceiling: DEFAULT_BUFFER_CEILING,
        }
    }

    /// Override the starting buffer size and the hard ceiling.
    ///
    /// Zero sizes are bumped to one byte; a ceiling below the starting size
    /// is raised to it.
    pub fn with_buffer_limits(mut self, initial_size: usize, ceiling: usize) -> Self {
        self.initial_size = initial_size.max(1);
        self.ceiling = ceiling.max(self.initial_size);
        self
    }

    pub fn source(&self) -> &I {
        &self.source
    }

    /// Capture the complete raw dump.
    ///
    /// Doubles the buffer until the reported length is strictly below its
    /// capacity.
    pub fn capture_dump(&self, all: bool) -> Result<Vec<u8>, CaptureError> {
        let mut capacity = self.initial_size;
        loop {
            let mut buf = vec![0u8; capacity];
            let written = self.source.fill(&mut buf, all);
            if written > capacity {
                return Err(CaptureError::Overreported {
                    capacity,
                    reported: written,
                });
            }
            if written < capacity {
                buf.truncate(written);
                return Ok(buf);
            }
            if capacity >= self.ceiling {
                return Err(CaptureError::DumpTooLarge {
                    ceiling: self.ceiling,
                });
            }
            capacity = capacity.saturating_mul(2).min(self.ceiling);
            debug!(capacity, all, "task dump filled the buffer, retrying with a larger one");
        }
    }

    /// Capture and parse every live task.
    pub fn all(&self) -> Result<Vec<TaskSnapshot>, CaptureError> {
        let raw = self.capture_dump(true)?;
        Ok(parse::parse(&raw)?)
    }

    /// Capture and parse only the calling task.
    pub fn current(&self) -> Result<TaskSnapshot, CaptureError> {
        let raw = self.capture_dump(false)?;
        Ok(parse::parse_single(&raw)?)
    }
}
