//! Test-run wrapper that turns leak verification into an exit code.
//!
//! A failing test run is never touched: its exit code passes through and no
//! verification happens. A passing run is only failed by a confirmed leak.
//! If the dump cannot be captured or parsed the check is skipped, since that
//! says something about the environment rather than about the code under
//! test.

use std::io::Write;

use tracing::{info, warn};

use crate::config::ReportFormat;
use crate::verify::{LeakCheck, VerifyError};

/// Exit code for a passing run with no leaks (or a skipped check).
pub const EXIT_OK: i32 = 0;
/// Exit code for a passing run that leaked tasks.
pub const EXIT_LEAKED: i32 = 1;

/// A test-run entry point returning its exit code.
pub trait TestRun {
    fn run(&mut self) -> i32;
}

impl<F: FnMut() -> i32> TestRun for F {
    fn run(&mut self) -> i32 {
        (self)()
    }
}

/// Where the final exit code goes.
pub trait ExitSink {
    fn exit(&mut self, code: i32);
}

/// Terminates the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit;

impl ExitSink for ProcessExit {
    fn exit(&mut self, code: i32) {
        std::process::exit(code);
    }
}

/// Run the tests, then check for leaks if they passed.
pub fn run_and_verify(
    mut entry: impl TestRun,
    check: &mut impl LeakCheck,
    diag: &mut impl Write,
) -> i32 {
    run_and_verify_with(&mut entry, check, diag, ReportFormat::Text)
}

pub fn run_and_verify_with(
    entry: &mut impl TestRun,
    check: &mut impl LeakCheck,
    diag: &mut impl Write,
    format: ReportFormat,
) -> i32 {
    let code = entry.run();
    if code != EXIT_OK {
        info!(code, "test run failed, skipping leak check");
        return code;
    }

    match check.verify() {
        Ok(()) => EXIT_OK,
        Err(VerifyError::Leaked(leak)) => {
            warn!(tasks = leak.tasks.len(), rounds = leak.rounds, "leaked tasks detected");
            let rendered = match format {
                ReportFormat::Text => Ok(leak.to_string()),
                ReportFormat::Json => leak.to_json(),
            };
            let written = match rendered {
                Ok(report) => writeln!(diag, "tasksweep: {report}"),
                Err(err) => writeln!(diag, "tasksweep: {leak} ({err})"),
            };
            report_write_failure(written);
            EXIT_LEAKED
        }
        Err(VerifyError::Capture(err)) => {
            warn!(%err, "task dump could not be captured, skipping leak check");
            report_write_failure(writeln!(
                diag,
                "tasksweep: skipped: could not capture task dump: {err}"
            ));
            EXIT_OK
        }
        Err(err) => {
            warn!(%err, "leak check could not run");
            report_write_failure(writeln!(
                diag,
                "tasksweep: skipped due to stack parsing failures: {err}"
            ));
            EXIT_OK
        }
    }
}

/// [`run_and_verify`], handing the resulting code to `exit`.
pub fn verify_test_main(
    entry: impl TestRun,
    check: &mut impl LeakCheck,
    exit: &mut impl ExitSink,
    diag: &mut impl Write,
) {
    exit.exit(run_and_verify(entry, check, diag));
}

fn report_write_failure(result: std::io::Result<()>) {
    if let Err(err) = result {
        warn!(%err, "failed to write leak diagnostic");
    }
}
