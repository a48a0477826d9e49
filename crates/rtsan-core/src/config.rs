//! Runtime options.
//!
//! Options are read from the `RTSAN_OPTIONS` environment variable when the
//! runtime initializes. The syntax follows the usual sanitizer convention:
//! `key=value` entries separated by `:`, `,` or whitespace.
//!
//! - `violation_action=exit|continue|wait` (default `exit`)
//! - `exitcode=<int>` (default `1`)
//! - `abort_on_error=<bool>` (default `0`)
//! - `color=auto|always|never` (default `auto`)
//! - `verbosity=0|1|2` (default `0`)
//!
//! The effective options live in atomics so the detector can read them on
//! the violation path without taking a lock.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

use crate::action::ViolationAction;
use crate::error::ConfigError;

/// Name of the environment variable holding runtime options.
pub const OPTIONS_ENV: &str = "RTSAN_OPTIONS";

/// When to emit ANSI color sequences in reports.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMode {
    /// Color when stderr is a terminal.
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorMode {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "always" | "1" | "true" | "yes" => Some(Self::Always),
            "never" | "0" | "false" | "no" => Some(Self::Never),
            _ => None,
        }
    }

    /// Resolve against whether the output stream is a terminal.
    #[must_use]
    pub const fn enabled(self, is_tty: bool) -> bool {
        match self {
            Self::Auto => is_tty,
            Self::Always => true,
            Self::Never => false,
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Always => 1,
            Self::Never => 2,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Always,
            2 => Self::Never,
            _ => Self::Auto,
        }
    }
}

/// Effective runtime options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// What to do once a violation has been reported.
    pub violation_action: ViolationAction,
    /// Process exit status used by [`ViolationAction::Exit`].
    pub exitcode: i32,
    /// Terminate with `abort()` instead of `_exit(exitcode)`.
    pub abort_on_error: bool,
    pub color: ColorMode,
    /// 0: reports only. 1: initialization summary. 2: per-thread context events.
    pub verbosity: u8,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            violation_action: ViolationAction::Exit,
            exitcode: 1,
            abort_on_error: false,
            color: ColorMode::Auto,
            verbosity: 0,
        }
    }
}

const MAX_VERBOSITY: u8 = 2;

impl Options {
    /// Parse an options string, failing on the first bad entry.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut opts = Self::default();
        for entry in entries(raw) {
            opts.apply_entry(entry)?;
        }
        Ok(opts)
    }

    /// Parse an options string, keeping every valid entry.
    ///
    /// Bad entries are skipped and returned alongside the result so the
    /// caller can warn about them.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> (Self, Vec<ConfigError>) {
        let mut opts = Self::default();
        let mut errors = Vec::new();
        for entry in entries(raw) {
            if let Err(err) = opts.apply_entry(entry) {
                errors.push(err);
            }
        }
        (opts, errors)
    }

    fn apply_entry(&mut self, entry: &str) -> Result<(), ConfigError> {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(ConfigError::Malformed {
                entry: entry.to_string(),
            });
        };
        let key = key.trim();
        let value = value.trim();
        let invalid = |reason: &'static str| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason,
        };

        match key {
            "violation_action" => {
                self.violation_action = ViolationAction::from_str_loose(value)
                    .ok_or_else(|| invalid("expected exit|continue|wait"))?;
            }
            "exitcode" => {
                self.exitcode = value.parse().map_err(|_| invalid("expected an integer"))?;
            }
            "abort_on_error" => {
                self.abort_on_error = parse_bool(value).ok_or_else(|| invalid("expected a boolean"))?;
            }
            "color" => {
                self.color =
                    ColorMode::from_str_loose(value).ok_or_else(|| invalid("expected auto|always|never"))?;
            }
            "verbosity" => {
                self.verbosity = value
                    .parse::<u8>()
                    .ok()
                    .filter(|v| *v <= MAX_VERBOSITY)
                    .ok_or_else(|| invalid("expected 0, 1 or 2"))?;
            }
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn entries(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| c == ':' || c == ',' || c.is_whitespace())
        .filter(|e| !e.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read `RTSAN_OPTIONS` from the environment.
///
/// An unset or non-UTF-8 variable yields the defaults.
#[must_use]
pub fn options_from_env() -> (Options, Vec<ConfigError>) {
    match std::env::var(OPTIONS_ENV) {
        Ok(raw) => Options::parse_lenient(&raw),
        Err(_) => (Options::default(), Vec::new()),
    }
}

struct RuntimeFlags {
    violation_action: AtomicU8,
    exitcode: AtomicI32,
    abort_on_error: AtomicBool,
    color: AtomicU8,
    verbosity: AtomicU8,
}

static FLAGS: RuntimeFlags = RuntimeFlags {
    violation_action: AtomicU8::new(0),
    exitcode: AtomicI32::new(1),
    abort_on_error: AtomicBool::new(false),
    color: AtomicU8::new(0),
    verbosity: AtomicU8::new(0),
};

/// Current effective options.
#[must_use]
pub fn options() -> Options {
    Options {
        violation_action: ViolationAction::from_u8(FLAGS.violation_action.load(Ordering::Acquire)),
        exitcode: FLAGS.exitcode.load(Ordering::Acquire),
        abort_on_error: FLAGS.abort_on_error.load(Ordering::Acquire),
        color: ColorMode::from_u8(FLAGS.color.load(Ordering::Acquire)),
        verbosity: FLAGS.verbosity.load(Ordering::Acquire),
    }
}

/// Replace the effective options.
pub fn set_options(opts: Options) {
    FLAGS.exitcode.store(opts.exitcode, Ordering::Release);
    FLAGS.abort_on_error.store(opts.abort_on_error, Ordering::Release);
    FLAGS.color.store(opts.color.to_u8(), Ordering::Release);
    FLAGS.verbosity.store(opts.verbosity, Ordering::Release);
    FLAGS
        .violation_action
        .store(opts.violation_action.to_u8(), Ordering::Release);
}

/// Replace only the violation action.
pub fn set_violation_action(action: ViolationAction) {
    FLAGS.violation_action.store(action.to_u8(), Ordering::Release);
}
