//! Convergent leak verification.
//!
//! A task that has been told to stop does not vanish the instant its caller
//! returns, so a single snapshot over-reports. Verification captures, filters,
//! and if anything is left, waits and tries again, up to the retry schedule's
//! budget. Only the candidates of the last round are reported.

use std::error::Error;
use std::fmt;

use facet::Facet;
use tracing::{debug, warn};

use crate::capture::{CaptureError, Capturer, Introspect};
use crate::parse::ParseError;
use crate::policy::Policy;
use crate::schedule::{RetrySchedule, Sleep, ThreadSleep};
use crate::snapshot::TaskSnapshot;

/// Tasks still alive after every verification round, in capture order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakDetected {
    pub tasks: Vec<TaskSnapshot>,
    pub rounds: usize,
}

impl fmt::Display for LeakDetected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "found unexpected tasks:")?;
        for task in &self.tasks {
            write!(f, "\n[{task}]")?;
        }
        Ok(())
    }
}

/// Serializable form of a [`LeakDetected`].
#[derive(Debug, Clone, Facet)]
pub struct LeakReport {
    pub rounds: u64,
    pub tasks: Vec<TaskSnapshot>,
}

impl LeakDetected {
    pub fn report(&self) -> LeakReport {
        LeakReport {
            rounds: self.rounds as u64,
            tasks: self.tasks.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, String> {
        facet_json::to_string_pretty(&self.report()).map_err(|e| format!("encode leak report: {e}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    Leaked(LeakDetected),
    Parse(ParseError),
    Capture(CaptureError),
}

impl VerifyError {
    /// Whether the check itself could not run, as opposed to finding a leak.
    pub fn is_inconclusive(&self) -> bool {
        !matches!(self, Self::Leaked(_))
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaked(leak) => write!(f, "{leak}"),
            Self::Parse(err) => write!(f, "{err}"),
            Self::Capture(err) => write!(f, "{err}"),
        }
    }
}

impl Error for VerifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Leaked(_) => None,
            Self::Parse(err) => Some(err),
            Self::Capture(err) => Some(err),
        }
    }
}

impl From<CaptureError> for VerifyError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::Parse(err) => Self::Parse(err),
            other => Self::Capture(other),
        }
    }
}

/// Anything the test-harness adapter can ask for a leak verdict.
pub trait LeakCheck {
    fn verify(&mut self) -> Result<(), VerifyError>;
}

/// Captures, classifies and retries until clean or out of budget.
#[derive(Debug)]
pub struct Verifier<I, S = ThreadSleep> {
    capturer: Capturer<I>,
    policy: Policy,
    schedule: RetrySchedule,
    sleeper: S,
}

impl<I: Introspect> Verifier<I> {
    pub fn new(capturer: Capturer<I>, policy: Policy, schedule: RetrySchedule) -> Self {
        Self {
            capturer,
            policy,
            schedule,
            sleeper: ThreadSleep,
        }
    }
}

impl<I: Introspect, S: Sleep> Verifier<I, S> {
    pub fn with_sleeper<S2: Sleep>(self, sleeper: S2) -> Verifier<I, S2> {
        Verifier {
            capturer: self.capturer,
            policy: self.policy,
            schedule: self.schedule,
            sleeper,
        }
    }

    pub fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Run the verification protocol once.
    pub fn verify(&mut self) -> Result<(), VerifyError> {
        let me = self.capturer.current()?.id();
        let max_rounds = self.schedule.max_rounds();
        let mut delays = self.schedule.delays().iter();
        let mut round = 0;

        loop {
            round += 1;
            let candidates: Vec<TaskSnapshot> = self
                .capturer
                .all()?
                .into_iter()
                .filter(|stack| stack.id() != me && !self.policy.is_ignored(stack))
                .collect();

            if candidates.is_empty() {
                debug!(round, "no leaked tasks");
                return Ok(());
            }

            let Some(delay) = delays.next() else {
                warn!(round, candidates = candidates.len(), "tasks still alive after final round");
                return Err(VerifyError::Leaked(LeakDetected {
                    tasks: candidates,
                    rounds: round,
                }));
            };

            debug!(
                round,
                max_rounds,
                candidates = candidates.len(),
                delay_us = delay.as_micros() as u64,
                "tasks still alive, retrying"
            );
            self.sleeper.sleep(*delay);
        }
    }
}

impl<I: Introspect, S: Sleep> LeakCheck for Verifier<I, S> {
    fn verify(&mut self) -> Result<(), VerifyError> {
        Verifier::verify(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    const SELF_TASK: &str = "task 1 [running]:\ntest_main(...)\n\t/tests/main.rs:5\n";
    const BACKGROUND: &str = "task 2 [idle]:\nsignal_listener(...)\n";
    const LEAKER: &str = "task 40 [chan receive]:\nleaky_worker(...)\n\t/src/worker.rs:77\n";

    /// Reports the leaking task for the first `leaky_rounds` all-task captures.
    struct ScriptedRuntime {
        leaky_rounds: usize,
        all_captures: Cell<usize>,
        broken: bool,
    }

    impl ScriptedRuntime {
        fn leaking_for(leaky_rounds: usize) -> Self {
            Self {
                leaky_rounds,
                all_captures: Cell::new(0),
                broken: false,
            }
        }
    }

    impl Introspect for ScriptedRuntime {
        fn fill(&self, buf: &mut [u8], all: bool) -> usize {
            let dump = if self.broken {
                "task x [idle]:\nf(...)\n".to_owned()
            } else if all {
                let round = self.all_captures.get() + 1;
                self.all_captures.set(round);
                let mut dump = format!("{SELF_TASK}{BACKGROUND}");
                if round <= self.leaky_rounds {
                    dump.push_str(LEAKER);
                }
                dump
            } else {
                SELF_TASK.to_owned()
            };
            let n = dump.len().min(buf.len());
            buf[..n].copy_from_slice(&dump.as_bytes()[..n]);
            n
        }
    }

    #[derive(Default)]
    struct RecordingSleep(Vec<Duration>);

    impl Sleep for RecordingSleep {
        fn sleep(&mut self, duration: Duration) {
            self.0.push(duration);
        }
    }

    fn schedule() -> RetrySchedule {
        RetrySchedule::exponential(Duration::from_millis(1), Duration::from_millis(4), 5)
            .expect("valid schedule")
    }

    fn verifier(runtime: &ScriptedRuntime) -> Verifier<&ScriptedRuntime, RecordingSleep> {
        Verifier::new(
            Capturer::new(runtime),
            Policy::new().ignore_top_function("signal_listener"),
            schedule(),
        )
        .with_sleeper(RecordingSleep::default())
    }

    #[test]
    fn persistent_task_is_reported_after_the_schedule_runs_out() {
        let runtime = ScriptedRuntime::leaking_for(usize::MAX);
        let mut verifier = verifier(&runtime);

        let err = verifier.verify().expect_err("leak must be detected");
        let VerifyError::Leaked(leak) = err else {
            panic!("expected a leak, got {err:?}");
        };
        assert_eq!(leak.rounds, 5);
        assert_eq!(leak.tasks.len(), 1);
        assert_eq!(leak.tasks[0].id(), 40);
        assert_eq!(leak.tasks[0].state(), "chan receive");
        assert_eq!(leak.tasks[0].full_stack(), LEAKER);

        assert_eq!(runtime.all_captures.get(), 5);
        assert_eq!(
            verifier.sleeper().0,
            [1, 2, 4, 4].map(Duration::from_millis)
        );
    }

    #[test]
    fn task_that_unwinds_by_round_two_is_clean() {
        let runtime = ScriptedRuntime::leaking_for(1);
        let mut verifier = verifier(&runtime);

        verifier.verify().expect("task went away on the second round");
        assert_eq!(runtime.all_captures.get(), 2);
        assert!(runtime.all_captures.get() <= verifier.schedule().max_rounds());
        assert_eq!(verifier.sleeper().0, [Duration::from_millis(1)]);
    }

    #[test]
    fn clean_first_round_never_sleeps() {
        let runtime = ScriptedRuntime::leaking_for(0);
        let mut verifier = verifier(&runtime);

        verifier.verify().expect("nothing leaked");
        assert_eq!(runtime.all_captures.get(), 1);
        assert!(verifier.sleeper().0.is_empty());
    }

    #[test]
    fn parse_errors_end_verification_without_retrying() {
        let runtime = ScriptedRuntime {
            broken: true,
            ..ScriptedRuntime::leaking_for(usize::MAX)
        };
        let mut verifier = verifier(&runtime);

        let err = verifier.verify().expect_err("broken dump");
        assert!(matches!(err, VerifyError::Parse(ParseError::InvalidTaskId { .. })));
        assert!(err.is_inconclusive());
        assert!(verifier.sleeper().0.is_empty());
    }

    #[test]
    fn leak_report_lists_every_task() {
        let runtime = ScriptedRuntime::leaking_for(usize::MAX);
        let mut verifier = Verifier::new(Capturer::new(&runtime), Policy::new(), RetrySchedule::once())
            .with_sleeper(RecordingSleep::default());

        let Err(VerifyError::Leaked(leak)) = verifier.verify() else {
            panic!("expected a leak");
        };
        insta::assert_snapshot!(leak.to_string(), @r"
        found unexpected tasks:
        [Task 2 in state idle, with signal_listener on top of the stack:
        task 2 [idle]:
        signal_listener(...)
        ]
        [Task 40 in state chan receive, with leaky_worker on top of the stack:
        task 40 [chan receive]:
        leaky_worker(...)
        	/src/worker.rs:77
        ]
        ");

        let json = leak.to_json().expect("report encodes");
        assert!(json.contains("\"leaky_worker\""));
        assert!(json.contains("\"rounds\""));
        assert!(json.contains("\"chan receive\""));
    }
}
