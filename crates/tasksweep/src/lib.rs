//! Task leak detection for test harnesses.
//!
//! After a test run passes, tasksweep asks the runtime for a dump of every
//! live task, parses it, drops the tasks the caller's [`Policy`] considers
//! background noise, and fails the run if anything is left. Tasks that are
//! merely slow to unwind get several chances to disappear: verification
//! retries on a bounded [`RetrySchedule`] before calling anything a leak.
//!
//! # Pieces
//!
//! | Item | Role |
//! |---|---|
//! | [`Introspect`] | The runtime's "write a task dump into this buffer" primitive |
//! | [`Capturer`] | Grows the buffer until the dump fits, then parses it |
//! | [`parse()`] | Dump text to [`TaskSnapshot`]s |
//! | [`Verifier`] | Capture, classify, retry, decide |
//! | [`run_and_verify`] | Wraps a test entry point and maps the verdict to an exit code |
//!
//! # Dump format
//!
//! ```text
//! task 12 [idle]:
//! app::worker::drain(...)
//!     /src/worker.rs:9
//! ```
//!
//! Records start at a `task <id> [<state>]:` header and run to the next
//! header or the end of input.
//!
//! # Usage
//!
//! ```rust,no_run
//! use tasksweep::{Capturer, Introspect, Policy, ProcessExit, RetrySchedule, Verifier};
//!
//! fn test_main<I: Introspect>(runtime: I, run_tests: impl FnMut() -> i32) {
//!     let policy = Policy::new().ignore_top_function("signal_listener");
//!     let mut verifier = Verifier::new(Capturer::new(runtime), policy, RetrySchedule::default());
//!     tasksweep::verify_test_main(run_tests, &mut verifier, &mut ProcessExit, &mut std::io::stderr());
//! }
//! ```

pub mod capture;
pub mod config;
pub mod harness;
pub mod parse;
pub mod policy;
pub mod schedule;
pub mod snapshot;
pub mod verify;

pub use capture::{CaptureError, Capturer, Introspect};
pub use config::{Config, ConfigError, ReportFormat};
pub use harness::{
    EXIT_LEAKED, EXIT_OK, ExitSink, ProcessExit, TestRun, run_and_verify, run_and_verify_with,
    verify_test_main,
};
pub use parse::{ParseError, parse, parse_single};
pub use policy::Policy;
pub use schedule::{RetrySchedule, ScheduleError, Sleep, ThreadSleep};
pub use snapshot::{TaskId, TaskSnapshot};
pub use verify::{LeakCheck, LeakDetected, LeakReport, Verifier, VerifyError};
