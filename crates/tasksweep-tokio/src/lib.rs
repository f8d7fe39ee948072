//! Tracked Tokio tasks for tasksweep leak checks.
//!
//! Rust has no built-in "dump every task" primitive, so this crate keeps one:
//! tasks started with [`spawn`] are registered until their future is dropped,
//! and [`TokioTasks`] renders the registry in tasksweep's dump format.
//!
//! ```rust,no_run
//! use tasksweep::Policy;
//!
//! fn main() {
//!     tasksweep_tokio::verify_test_main(run_all_tests, Policy::new());
//! }
//! # fn run_all_tests() -> i32 { 0 }
//! ```
//!
//! Verification sleeps between rounds on the calling thread. Call it from
//! outside the runtime (or from a multi-threaded runtime) so the tasks being
//! waited on can still make progress.

mod dump;
mod registry;

pub use dump::TokioTasks;
pub use registry::{UNTRACKED_TASK_ID, current_task_id, live_task_count, spawn, spawn_on};

use std::io::Write;

use tasksweep::{Config, ConfigError, EXIT_OK, ExitSink, Policy, ProcessExit, TestRun, Verifier};
use tracing::warn;

/// Build a verifier over tracked tasks with `config`'s buffer and retry settings.
pub fn verifier(policy: Policy, config: &Config) -> Result<Verifier<TokioTasks>, ConfigError> {
    Ok(Verifier::new(config.capturer(TokioTasks), policy, config.schedule()?))
}

/// Run `run_tests`, check for leaked tracked tasks, and exit the process.
///
/// Settings come from the `TASKSWEEP_*` environment variables. An invalid
/// setting skips the leak check: the tests still run and their own exit code
/// is used.
pub fn verify_test_main(run_tests: impl TestRun, policy: Policy) {
    let code = run_with_config(run_tests, policy, Config::from_env(), &mut std::io::stderr());
    ProcessExit.exit(code);
}

fn run_with_config(
    mut run_tests: impl TestRun,
    policy: Policy,
    config: Result<Config, ConfigError>,
    diag: &mut impl Write,
) -> i32 {
    let checked = config.and_then(|config| Ok((verifier(policy, &config)?, config.report)));
    match checked {
        Ok((mut verifier, report)) => {
            tasksweep::run_and_verify_with(&mut run_tests, &mut verifier, diag, report)
        }
        Err(err) => {
            warn!(%err, "invalid tasksweep configuration, skipping leak check");
            let code = run_tests.run();
            if code == EXIT_OK {
                if let Err(write_err) =
                    writeln!(diag, "tasksweep: skipped: invalid configuration: {err}")
                {
                    warn!(err = %write_err, "failed to write leak diagnostic");
                }
            }
            code
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksweep::ScheduleError;

    #[test]
    fn invalid_config_still_runs_the_tests_and_skips_the_check() {
        let mut runs = 0;
        let mut diag = Vec::new();
        let config = Err(ConfigError::Schedule(ScheduleError::ZeroRounds));

        let code = run_with_config(
            || {
                runs += 1;
                0
            },
            Policy::new(),
            config,
            &mut diag,
        );

        assert_eq!(code, EXIT_OK);
        assert_eq!(runs, 1);
        let diag = String::from_utf8(diag).expect("utf-8 diagnostic");
        assert!(diag.starts_with("tasksweep: skipped: invalid configuration:"));
    }

    #[test]
    fn invalid_config_keeps_a_failing_exit_code() {
        let mut diag = Vec::new();
        let config = Err(ConfigError::InvalidReportFormat {
            value: "xml".into(),
        });

        assert_eq!(run_with_config(|| 101, Policy::new(), config, &mut diag), 101);
        assert!(diag.is_empty());
    }

    #[test]
    fn valid_config_runs_the_check() {
        let mut diag = Vec::new();
        let code = run_with_config(|| 0, Policy::new(), Ok(Config::default()), &mut diag);
        assert_eq!(code, EXIT_OK);
        assert!(diag.is_empty());
    }
}
