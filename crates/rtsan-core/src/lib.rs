//! Real-time safety violation detection for rtsan-rs.
//!
//! Instrumented code brackets "real-time critical" regions of execution on a
//! thread. Interceptors for functions that may allocate, lock or block call
//! [`expect_not_realtime`] with the calling thread's [`RegionContext`]; a call
//! made inside a real-time region (and outside any bypass scope) is reported
//! and handled by the configured [`ViolationAction`].
//!
//! # Architecture
//!
//! ```text
//! interceptor -> get_context_for_this_thread() -> expect_not_realtime(ctx, name)
//!                                                    |
//!                        (violation) bypass push -> capture -> report -> action -> bypass pop
//! ```
//!
//! The crate consists of:
//! - **Internal allocator** (`internal_alloc`): raw mmap-backed storage that is never intercepted
//! - **Per-thread storage** (`storage`): lazily created context per thread, released at thread exit
//! - **Region context** (`context`): real-time and bypass nesting counters
//! - **Detector** (`detector`): the report-or-allow decision point
//! - **Diagnostics** (`report`, `stack`): decorated violation reports with a stack trace
//! - **Actions** (`action`): what happens after a violation is reported
//! - **Configuration** (`config`): `RTSAN_OPTIONS` runtime flags
//! - **Runtime** (`runtime`): process-wide initialization state
//! - **Metrics** (`metrics`): atomic counters for observability
//! - **Guards** (`guard`): RAII scopes for Rust callers

#[macro_use]
mod macros;

pub mod action;
pub mod config;
pub mod context;
pub mod detector;
pub mod error;
pub mod guard;
pub mod internal_alloc;
pub mod metrics;
pub mod report;
pub mod runtime;
pub mod stack;
pub mod storage;

pub use action::ViolationAction;
pub use config::{ColorMode, Options};
pub use context::{RegionContext, ScopeKind};
pub use detector::{AllowReason, Verdict, classify, expect_not_realtime};
pub use error::{ConfigError, ContextError};
pub use guard::{ScopedBypass, ScopedRealtime, with_realtime, without_detection};
pub use metrics::{MetricsSnapshot, RtsanMetrics, global_metrics};
pub use runtime::{init, is_initialized};
pub use stack::CallerLocation;
pub use storage::{get_context_for_this_thread, try_get_context_for_this_thread};
