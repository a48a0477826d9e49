//! The violation decision point.
//!
//! Every intercepted call to a real-time-unsafe function lands in
//! [`expect_not_realtime`]. The decision itself is deliberately trivial:
//! a violation is a call made inside a real-time region while detection is
//! not bypassed. Correctness rests on the push/pop discipline of the callers.

use crate::config::options;
use crate::context::RegionContext;
use crate::guard::ScopedBypass;
use crate::metrics::{RtsanMetrics, global_metrics};
use crate::report;
use crate::runtime::is_initialized;
use crate::stack::{CallerLocation, current_frame};

/// Why a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowReason {
    /// The thread is not inside a real-time region.
    NotRealtime,
    /// Inside a real-time region, but detection is suspended.
    Bypassed,
}

/// Outcome of classifying a call against a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Allowed(AllowReason),
    Violation,
}

impl Verdict {
    #[must_use]
    pub const fn is_violation(self) -> bool {
        matches!(self, Self::Violation)
    }
}

/// Classify a call made now on the thread owning `ctx`. No side effects.
#[inline]
#[must_use]
pub fn classify(ctx: &RegionContext) -> Verdict {
    if !ctx.in_realtime_context() {
        Verdict::Allowed(AllowReason::NotRealtime)
    } else if ctx.is_bypassed() {
        Verdict::Allowed(AllowReason::Bypassed)
    } else {
        Verdict::Violation
    }
}

/// Report `intercepted_function_name` if it was called inside a real-time
/// region with detection active, then run the configured action.
///
/// With the default action the process terminates and this never returns
/// on a violation. The runtime must be initialized.
///
/// Always inlined: the function that calls this is the interception point,
/// and the report starts at the code that called it.
#[inline(always)]
pub fn expect_not_realtime(ctx: &RegionContext, intercepted_function_name: &str) {
    check!(is_initialized());
    match classify(ctx) {
        Verdict::Allowed(AllowReason::NotRealtime) => {}
        Verdict::Allowed(AllowReason::Bypassed) => {
            RtsanMetrics::inc(&global_metrics().bypassed_checks);
        }
        Verdict::Violation => {
            // Anything the report path calls must not re-enter here.
            let _bypass = ScopedBypass::enter(ctx);
            let location = CallerLocation::capture_caller(current_frame());
            handle_violation(intercepted_function_name, location);
        }
    }
}

#[cold]
#[inline(never)]
fn handle_violation(intercepted_function_name: &str, location: CallerLocation) {
    RtsanMetrics::inc(&global_metrics().violations);

    report::print_diagnostics(intercepted_function_name, location);
    let opts = options();
    opts.violation_action.invoke(&opts);
}
