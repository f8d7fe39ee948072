//! Environment-driven settings for capture sizing, retries and reporting.
//!
//! | Variable | Default |
//! |---|---|
//! | `TASKSWEEP_BUFFER_SIZE` | 65536 bytes |
//! | `TASKSWEEP_BUFFER_CEILING` | 64 MiB |
//! | `TASKSWEEP_MAX_ROUNDS` | 20 |
//! | `TASKSWEEP_INITIAL_DELAY_US` | 1 |
//! | `TASKSWEEP_MAX_DELAY_MS` | 100 |
//! | `TASKSWEEP_REPORT` | `text` |

use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::capture::{Capturer, DEFAULT_BUFFER_CEILING, DEFAULT_BUFFER_SIZE, Introspect};
use crate::schedule::{
    DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_ROUNDS, RetrySchedule, ScheduleError,
};

const BUFFER_SIZE_ENV: &str = "TASKSWEEP_BUFFER_SIZE";
const BUFFER_CEILING_ENV: &str = "TASKSWEEP_BUFFER_CEILING";
const MAX_ROUNDS_ENV: &str = "TASKSWEEP_MAX_ROUNDS";
const INITIAL_DELAY_ENV: &str = "TASKSWEEP_INITIAL_DELAY_US";
const MAX_DELAY_ENV: &str = "TASKSWEEP_MAX_DELAY_MS";
const REPORT_ENV: &str = "TASKSWEEP_REPORT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidNumber { var: &'static str, value: String },
    InvalidReportFormat { value: String },
    Schedule(ScheduleError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNumber { var, value } => {
                write!(f, "{var} must be a non-negative integer, got {value:?}")
            }
            Self::InvalidReportFormat { value } => {
                write!(f, "{REPORT_ENV} must be \"text\" or \"json\", got {value:?}")
            }
            Self::Schedule(err) => write!(f, "invalid retry schedule: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schedule(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub buffer_size: usize,
    pub buffer_ceiling: usize,
    pub max_rounds: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub report: ReportFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_ceiling: DEFAULT_BUFFER_CEILING,
            max_rounds: DEFAULT_MAX_ROUNDS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            report: ReportFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable lookup. Unset variables keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let number = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            lookup(var)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| ConfigError::InvalidNumber { var, value })
                })
                .transpose()
        };

        let report = match lookup(REPORT_ENV).as_deref().map(str::trim) {
            None | Some("") | Some("text") => ReportFormat::Text,
            Some("json") => ReportFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidReportFormat {
                    value: other.to_owned(),
                });
            }
        };

        let config = Self {
            buffer_size: number(BUFFER_SIZE_ENV)?.map_or(defaults.buffer_size, |v| v as usize),
            buffer_ceiling: number(BUFFER_CEILING_ENV)?
                .map_or(defaults.buffer_ceiling, |v| v as usize),
            max_rounds: number(MAX_ROUNDS_ENV)?.map_or(defaults.max_rounds, |v| v as usize),
            initial_delay: number(INITIAL_DELAY_ENV)?
                .map_or(defaults.initial_delay, Duration::from_micros),
            max_delay: number(MAX_DELAY_ENV)?.map_or(defaults.max_delay, Duration::from_millis),
            report,
        };
        config.schedule()?;
        Ok(config)
    }

    pub fn schedule(&self) -> Result<RetrySchedule, ConfigError> {
        RetrySchedule::exponential(self.initial_delay, self.max_delay, self.max_rounds)
            .map_err(ConfigError::Schedule)
    }

    pub fn capturer<I: Introspect>(&self, source: I) -> Capturer<I> {
        Capturer::new(source).with_buffer_limits(self.buffer_size, self.buffer_ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = Config::from_lookup(lookup(&[])).expect("defaults are valid");
        assert_eq!(config, Config::default());
        assert_eq!(config.schedule().expect("schedule"), RetrySchedule::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("TASKSWEEP_BUFFER_SIZE", "1024"),
            ("TASKSWEEP_MAX_ROUNDS", "3"),
            ("TASKSWEEP_INITIAL_DELAY_US", "500"),
            ("TASKSWEEP_MAX_DELAY_MS", "2"),
            ("TASKSWEEP_REPORT", "json"),
        ]))
        .expect("valid overrides");

        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.report, ReportFormat::Json);
        assert_eq!(
            config.schedule().expect("schedule").delays(),
            [Duration::from_micros(500), Duration::from_millis(1)]
        );
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[("TASKSWEEP_MAX_ROUNDS", "lots")]))
            .expect_err("non-numeric");
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var: "TASKSWEEP_MAX_ROUNDS",
                value: "lots".into()
            }
        );

        let err = Config::from_lookup(lookup(&[("TASKSWEEP_MAX_ROUNDS", "0")]))
            .expect_err("zero rounds");
        assert_eq!(err, ConfigError::Schedule(ScheduleError::ZeroRounds));

        let err = Config::from_lookup(lookup(&[("TASKSWEEP_REPORT", "xml")])).expect_err("format");
        assert!(matches!(err, ConfigError::InvalidReportFormat { .. }));
    }
}
