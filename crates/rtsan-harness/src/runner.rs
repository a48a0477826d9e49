//! Scenario execution engine.
//!
//! Each scenario runs in a child process (`<harness> exec --scenario <name>`)
//! with `RTSAN_OPTIONS` set for it; the parent compares the exit status and
//! stderr against the scenario's [`Expectation`].

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Instant;

use rtsan_core::config::OPTIONS_ENV;

use crate::error::HarnessError;
use crate::scenarios::{Expectation, Scenario};
use crate::structured_log::{LogEntry, LogLevel, Outcome};

const VIOLATION_BANNER: &str = "ERROR: RealtimeSanitizer: unsafe-library-call";

/// Observed result of one scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub scenario: &'static str,
    pub symbol: &'static str,
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub duration_ms: u64,
    /// Differences from the expectation; empty on pass.
    pub mismatches: Vec<String>,
}

impl ScenarioRun {
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        if self.mismatches.is_empty() {
            Outcome::Pass
        } else {
            Outcome::Fail
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome() == Outcome::Pass
    }

    /// Structured log record for this run; the emitter assigns the trace id.
    #[must_use]
    pub fn to_log_entry(&self) -> LogEntry {
        let level = if self.passed() {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        let mut entry = LogEntry::new("", level, "scenario_result")
            .with_scenario(self.scenario, self.symbol)
            .with_outcome(self.outcome())
            .with_duration_ms(self.duration_ms);
        if let Some(code) = self.exit_code {
            entry = entry.with_exit_code(code);
        }
        if !self.mismatches.is_empty() {
            entry = entry.with_details(serde_json::json!({
                "mismatches": self.mismatches,
                "stderr": self.stderr,
            }));
        }
        entry
    }
}

/// Level of the `run_end` record: `Warn` if any scenario failed.
#[must_use]
pub fn summary_level(runs: &[ScenarioRun]) -> LogLevel {
    if runs.iter().all(ScenarioRun::passed) {
        LogLevel::Info
    } else {
        LogLevel::Warn
    }
}

/// Runs scenarios by re-invoking a harness executable.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    exe: PathBuf,
}

impl ScenarioRunner {
    /// Runner that spawns `exe` as the scenario child.
    #[must_use]
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    /// Runner that spawns the currently running executable.
    pub fn current() -> Result<Self, HarnessError> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Run one scenario in a child process and classify the result.
    pub fn run(&self, scenario: &Scenario) -> Result<ScenarioRun, HarnessError> {
        let started = Instant::now();
        let output = Command::new(&self.exe)
            .args(["exec", "--scenario", scenario.name])
            .env(OPTIONS_ENV, child_options(scenario))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| HarnessError::Spawn {
                scenario: scenario.name.to_string(),
                source,
            })?;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();
        let mismatches = compare(scenario, &scenario.expected, exit_code, &stderr);

        Ok(ScenarioRun {
            scenario: scenario.name,
            symbol: scenario.symbol,
            exit_code,
            stderr,
            duration_ms,
            mismatches,
        })
    }

    /// Run every scenario in order.
    pub fn run_all<'a>(
        &self,
        scenarios: impl IntoIterator<Item = &'a Scenario>,
    ) -> Result<Vec<ScenarioRun>, HarnessError> {
        scenarios.into_iter().map(|s| self.run(s)).collect()
    }
}

/// `RTSAN_OPTIONS` for the child: plain output plus the scenario's entries.
fn child_options(scenario: &Scenario) -> String {
    if scenario.options.is_empty() {
        "color=never".to_string()
    } else {
        format!("color=never:{}", scenario.options)
    }
}

fn compare(
    scenario: &Scenario,
    expected: &Expectation,
    exit_code: Option<i32>,
    stderr: &str,
) -> Vec<String> {
    let mut mismatches = Vec::new();

    match exit_code {
        Some(code) if code == expected.exit_code => {}
        Some(code) => mismatches.push(format!(
            "exit code: expected {}, got {code}",
            expected.exit_code
        )),
        None => mismatches.push(format!(
            "exit code: expected {}, child terminated by signal",
            expected.exit_code
        )),
    }

    let reported = stderr.contains(VIOLATION_BANNER)
        && stderr.contains(&format!("`{}`", scenario.symbol));
    if reported != expected.reports_violation {
        mismatches.push(if expected.reports_violation {
            format!("expected a violation report for `{}`", scenario.symbol)
        } else {
            "unexpected violation report".to_string()
        });
    }

    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::find_scenario;

    fn report_for(symbol: &str) -> String {
        format!(
            "==1234=={VIOLATION_BANNER}\nIntercepted call to real-time unsafe function `{symbol}` in real-time context!\n"
        )
    }

    #[test]
    fn matching_violation_passes() {
        let s = find_scenario("realtime_malloc").unwrap();
        assert!(compare(s, &s.expected, Some(1), &report_for("malloc")).is_empty());
    }

    #[test]
    fn wrong_exit_code_is_reported() {
        let s = find_scenario("custom_exitcode").unwrap();
        let mismatches = compare(s, &s.expected, Some(1), &report_for("calloc"));
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].contains("expected 42"));
    }

    #[test]
    fn signal_termination_is_a_mismatch() {
        let s = find_scenario("realtime_malloc").unwrap();
        let mismatches = compare(s, &s.expected, None, &report_for("malloc"));
        assert!(mismatches[0].contains("signal"));
    }

    #[test]
    fn report_for_other_symbol_does_not_count() {
        let s = find_scenario("realtime_malloc").unwrap();
        let mismatches = compare(s, &s.expected, Some(1), &report_for("free"));
        assert_eq!(mismatches.len(), 1);
    }

    #[test]
    fn unexpected_report_on_clean_scenario() {
        let s = find_scenario("bypassed_malloc").unwrap();
        let mismatches = compare(s, &s.expected, Some(0), &report_for("malloc"));
        assert_eq!(mismatches, vec!["unexpected violation report".to_string()]);
    }

    #[test]
    fn child_options_prepend_color() {
        let s = find_scenario("custom_exitcode").unwrap();
        assert_eq!(child_options(s), "color=never:exitcode=42");
        let s = find_scenario("realtime_malloc").unwrap();
        assert_eq!(child_options(s), "color=never");
    }

    #[test]
    fn failed_run_logs_details() {
        let run = ScenarioRun {
            scenario: "realtime_malloc",
            symbol: "malloc",
            exit_code: Some(0),
            stderr: String::new(),
            duration_ms: 5,
            mismatches: vec!["exit code: expected 1, got 0".to_string()],
        };
        assert_eq!(run.outcome(), Outcome::Fail);
        let entry = run.to_log_entry();
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.exit_code, Some(0));
        assert!(entry.details.is_some());
    }

    #[test]
    fn summary_warns_only_when_something_failed() {
        let pass = ScenarioRun {
            scenario: "malloc_outside_realtime",
            symbol: "malloc",
            exit_code: Some(0),
            stderr: String::new(),
            duration_ms: 1,
            mismatches: Vec::new(),
        };
        let mut fail = pass.clone();
        fail.mismatches.push("unexpected violation report".to_string());

        assert_eq!(summary_level(&[]), LogLevel::Info);
        assert_eq!(summary_level(&[pass.clone()]), LogLevel::Info);
        assert_eq!(summary_level(&[pass, fail]), LogLevel::Warn);
    }
}
