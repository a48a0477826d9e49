//! Structured JSONL logging for harness runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes records to a file, stdout or an in-memory buffer.
//! - [`validate_log_line`]: checks a single JSONL line against the schema.
//! - [`validate_log_file`]: checks a whole JSONL file.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    /// Run summary when at least one scenario failed.
    Warn,
    /// A scenario whose observed outcome differs from its expectation.
    Error,
}

/// Scenario outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

const LEVELS: [&str; 3] = ["info", "warn", "error"];
const OUTCOMES: [&str; 2] = ["pass", "fail"];

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    /// Function name the scenario reports through the detector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Exit code of the scenario child process (`None` if killed by a signal).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            scenario: None,
            symbol: None,
            outcome: None,
            exit_code: None,
            duration_ms: None,
            details: None,
        }
    }

    /// Set the scenario name and the symbol it exercises.
    #[must_use]
    pub fn with_scenario(mut self, scenario: impl Into<String>, symbol: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    /// Set free-form details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// JSONL writer that stamps sequential trace ids (`<run_id>::<seq>`).
pub struct LogEmitter<W: Write> {
    writer: W,
    seq: u64,
    run_id: String,
}

impl LogEmitter<std::io::BufWriter<std::fs::File>> {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(std::io::BufWriter::new(file), run_id))
    }
}

impl LogEmitter<std::io::Stdout> {
    #[must_use]
    pub fn to_stdout(run_id: &str) -> Self {
        Self::new(std::io::stdout(), run_id)
    }
}

impl LogEmitter<Vec<u8>> {
    /// Create an emitter that writes to a buffer (for testing).
    #[must_use]
    pub fn to_buffer(run_id: &str) -> Self {
        Self::new(Vec::new(), run_id)
    }
}

impl<W: Write> LogEmitter<W> {
    pub fn new(writer: W, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{:03}", self.run_id, self.seq)
    }

    /// Emit a bare event with an auto-generated trace id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let entry = LogEntry::new(self.next_trace_id(), level, event);
        self.write_line(&entry)?;
        Ok(entry)
    }

    /// Emit a fully-populated entry; an empty trace id is filled in.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        self.write_line(&entry)
    }

    fn write_line(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    /// Consume the emitter and return the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug, thiserror::Error)]
#[error("line {line_number}: field '{field}': {message}")]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl LogValidationError {
    fn new(line_number: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            line_number,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
        vec![LogValidationError::new(
            line_number,
            "<json>",
            format!("invalid JSON: {e}"),
        )]
    })?;

    let Some(obj) = value.as_object() else {
        return Err(vec![LogValidationError::new(
            line_number,
            "<root>",
            "expected JSON object",
        )]);
    };

    let mut errors = Vec::new();
    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(LogValidationError::new(
                line_number,
                field,
                "required field missing",
            ));
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !LEVELS.contains(&level)
    {
        errors.push(LogValidationError::new(
            line_number,
            "level",
            format!("invalid level: '{level}'"),
        ));
    }

    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && !OUTCOMES.contains(&outcome)
    {
        errors.push(LogValidationError::new(
            line_number,
            "outcome",
            format!("invalid outcome: '{outcome}'"),
        ));
    }

    // A scenario result must say how it ended.
    if obj.contains_key("scenario") && !obj.contains_key("outcome") {
        errors.push(LogValidationError::new(
            line_number,
            "outcome",
            "scenario entries must include an outcome",
        ));
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && !trace_id.contains("::")
    {
        errors.push(LogValidationError::new(
            line_number,
            "trace_id",
            format!("trace_id should follow <run_id>::<seq> format, got: '{trace_id}'"),
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<LogEntry>(value).map_err(|e| {
        vec![LogValidationError::new(
            line_number,
            "<deserialization>",
            format!("failed to deserialize: {e}"),
        )]
    })
}

/// Validate an entire JSONL file.
///
/// Returns the non-empty line count and any validation errors found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

/// RFC 3339 UTC timestamp with millisecond precision.
fn format_utc(secs: u64, millis: u32) -> String {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
    )
}

// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new("run-1::001", LogLevel::Info, "run_start");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "run-1::001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "run_start");
        assert!(parsed.get("scenario").is_none());
        assert!(parsed.get("outcome").is_none());
    }

    #[test]
    fn log_entry_with_scenario_fields() {
        let entry = LogEntry::new("run-1::002", LogLevel::Error, "scenario_result")
            .with_scenario("realtime_malloc", "malloc")
            .with_outcome(Outcome::Fail)
            .with_exit_code(1)
            .with_duration_ms(3)
            .with_details(serde_json::json!({"mismatch": "exit code"}));

        let parsed: serde_json::Value =
            serde_json::from_str(&entry.to_jsonl().unwrap()).unwrap();
        assert_eq!(parsed["scenario"], "realtime_malloc");
        assert_eq!(parsed["symbol"], "malloc");
        assert_eq!(parsed["outcome"], "fail");
        assert_eq!(parsed["exit_code"], 1);
        assert_eq!(parsed["duration_ms"], 3);
        assert_eq!(parsed["details"]["mismatch"], "exit code");
    }

    #[test]
    fn emitter_generates_sequential_trace_ids() {
        let mut emitter = LogEmitter::to_buffer("run-42");
        let e1 = emitter.emit(LogLevel::Info, "a").unwrap();
        let e2 = emitter.emit(LogLevel::Info, "b").unwrap();
        assert_eq!(e1.trace_id, "run-42::001");
        assert_eq!(e2.trace_id, "run-42::002");

        let out = String::from_utf8(emitter.into_inner()).unwrap();
        assert_eq!(out.lines().count(), 2);
        for (i, line) in out.lines().enumerate() {
            validate_log_line(line, i + 1).unwrap();
        }
    }

    #[test]
    fn emit_entry_fills_missing_trace_id() {
        let mut emitter = LogEmitter::to_buffer("run-7");
        let entry = LogEntry::new("", LogLevel::Info, "scenario_result")
            .with_scenario("nested_regions", "malloc")
            .with_outcome(Outcome::Pass);
        emitter.emit_entry(entry).unwrap();
        let out = String::from_utf8(emitter.into_inner()).unwrap();
        let parsed = validate_log_line(out.trim(), 1).unwrap();
        assert_eq!(parsed.trace_id, "run-7::001");
    }

    #[test]
    fn validate_missing_required_field() {
        let errs = validate_log_line(r#"{"timestamp":"x","trace_id":"a::1","level":"info"}"#, 1)
            .unwrap_err();
        assert!(errs.iter().any(|e| e.field == "event"));
    }

    #[test]
    fn validate_invalid_level_and_outcome() {
        let line = r#"{"timestamp":"x","trace_id":"a::1","level":"fatal","event":"e","scenario":"s","outcome":"skip"}"#;
        let errs = validate_log_line(line, 4).unwrap_err();
        assert!(errs.iter().any(|e| e.field == "level"));
        assert!(errs.iter().any(|e| e.field == "outcome"));
        assert!(errs.iter().all(|e| e.line_number == 4));
    }

    #[test]
    fn validate_rejects_levels_the_harness_never_emits() {
        for level in ["trace", "debug"] {
            let line = format!(
                r#"{{"timestamp":"x","trace_id":"a::1","level":"{level}","event":"e"}}"#
            );
            let errs = validate_log_line(&line, 1).unwrap_err();
            assert_eq!(errs[0].field, "level");
        }
        let line = r#"{"timestamp":"x","trace_id":"a::1","level":"warn","event":"run_end"}"#;
        assert!(validate_log_line(line, 1).is_ok());
    }

    #[test]
    fn validate_scenario_without_outcome() {
        let line = r#"{"timestamp":"x","trace_id":"a::1","level":"info","event":"e","scenario":"s"}"#;
        let errs = validate_log_line(line, 1).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].field, "outcome");
    }

    #[test]
    fn validate_invalid_json_and_bad_trace_id() {
        assert!(validate_log_line("not json", 1).is_err());
        let errs = validate_log_line(
            r#"{"timestamp":"x","trace_id":"plain","level":"info","event":"e"}"#,
            1,
        )
        .unwrap_err();
        assert_eq!(errs[0].field, "trace_id");
    }

    #[test]
    fn utc_formatting_known_instants() {
        assert_eq!(format_utc(0, 0), "1970-01-01T00:00:00.000Z");
        // 2000-02-29T12:34:56Z
        assert_eq!(format_utc(951_827_696, 7), "2000-02-29T12:34:56.007Z");
        // 2024-12-31T23:59:59Z
        assert_eq!(format_utc(1_735_689_599, 999), "2024-12-31T23:59:59.999Z");
    }
}
