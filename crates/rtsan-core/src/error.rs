//! Error types for recoverable runtime failures.
//!
//! Violations and internal invariant failures are not errors in this sense:
//! the former are handled by the configured action, the latter abort.

use thiserror::Error;

use crate::context::ScopeKind;

/// Misuse of the push/pop discipline on a [`RegionContext`](crate::RegionContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A pop was issued while the matching counter was already zero.
    #[error("unbalanced {scope} pop: depth is already zero")]
    Underflow { scope: ScopeKind },
}

/// Failure while parsing `RTSAN_OPTIONS`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Entry without a `=` separator.
    #[error("malformed option entry '{entry}', expected key=value")]
    Malformed { entry: String },
    /// Key not recognized by the runtime.
    #[error("unknown option '{key}'")]
    UnknownKey { key: String },
    /// Key recognized but the value could not be parsed.
    #[error("invalid value '{value}' for option '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: &'static str,
    },
}
