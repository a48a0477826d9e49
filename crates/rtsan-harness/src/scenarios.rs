//! Scenario catalog.
//!
//! A scenario is a short sequence of region operations followed by a call
//! reported through the detector. It runs inside a child process (see
//! [`crate::runner`]) so that the terminating action can be observed from the
//! outside.

use rtsan_core::{
    ScopedBypass, ScopedRealtime, expect_not_realtime, get_context_for_this_thread, init,
    with_realtime, without_detection,
};

/// What a scenario run must look like from the parent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    pub exit_code: i32,
    /// The violation banner naming the scenario's symbol appears on stderr.
    pub reports_violation: bool,
}

impl Expectation {
    const CLEAN: Self = Self {
        exit_code: 0,
        reports_violation: false,
    };

    const fn violation(exit_code: i32) -> Self {
        Self {
            exit_code,
            reports_violation: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    /// Function name reported to the detector.
    pub symbol: &'static str,
    /// Extra `RTSAN_OPTIONS` entries for the child.
    pub options: &'static str,
    pub expected: Expectation,
    body: fn(&'static str),
}

impl Scenario {
    /// Initialize the runtime and run the scenario body on this thread.
    ///
    /// Returns normally only if the configured action lets execution go on.
    pub fn execute(&self) {
        init();
        (self.body)(self.symbol);
    }

    /// Run the body with the runtime left uninitialized. A body that reaches
    /// the detector aborts with a `CHECK failed` line.
    pub fn execute_uninitialized(&self) {
        (self.body)(self.symbol);
    }
}

fn realtime_call(symbol: &'static str) {
    let ctx = get_context_for_this_thread();
    ctx.realtime_push();
    expect_not_realtime(ctx, symbol);
    let _ = ctx.realtime_pop();
}

fn plain_call(symbol: &'static str) {
    expect_not_realtime(get_context_for_this_thread(), symbol);
}

fn bypassed_call(symbol: &'static str) {
    let ctx = get_context_for_this_thread();
    ctx.realtime_push();
    ctx.bypass_push();
    expect_not_realtime(ctx, symbol);
    let _ = ctx.bypass_pop();
    let _ = ctx.realtime_pop();
}

fn nested_inner_closed(symbol: &'static str) {
    let ctx = get_context_for_this_thread();
    ctx.realtime_push();
    ctx.realtime_push();
    let _ = ctx.realtime_pop();
    expect_not_realtime(ctx, symbol);
}

fn nested_all_closed(symbol: &'static str) {
    let ctx = get_context_for_this_thread();
    ctx.realtime_push();
    ctx.realtime_push();
    let _ = ctx.realtime_pop();
    let _ = ctx.realtime_pop();
    expect_not_realtime(ctx, symbol);
}

fn bypass_then_resume(symbol: &'static str) {
    let ctx = get_context_for_this_thread();
    let _region = ScopedRealtime::enter(ctx);
    {
        let _bypass = ScopedBypass::enter(ctx);
        expect_not_realtime(ctx, symbol);
    }
    expect_not_realtime(ctx, symbol);
}

fn guarded_closures(symbol: &'static str) {
    with_realtime(|| without_detection(|| plain_call(symbol)));
}

fn unbalanced_pop_then_call(symbol: &'static str) {
    let ctx = get_context_for_this_thread();
    let _ = ctx.realtime_pop();
    expect_not_realtime(ctx, symbol);
}

fn worker_thread_call(symbol: &'static str) {
    // The main thread's region does not leak into the worker.
    let ctx = get_context_for_this_thread();
    ctx.realtime_push();
    let _ = std::thread::spawn(move || plain_call(symbol)).join();
    let _ = ctx.realtime_pop();
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "realtime_malloc",
        description: "malloc inside a real-time region terminates with the default exit code",
        symbol: "malloc",
        options: "",
        expected: Expectation::violation(1),
        body: realtime_call,
    },
    Scenario {
        name: "malloc_outside_realtime",
        description: "malloc outside any region is not reported",
        symbol: "malloc",
        options: "",
        expected: Expectation::CLEAN,
        body: plain_call,
    },
    Scenario {
        name: "bypassed_malloc",
        description: "malloc inside a region with detection disabled is not reported",
        symbol: "malloc",
        options: "",
        expected: Expectation::CLEAN,
        body: bypassed_call,
    },
    Scenario {
        name: "nested_inner_closed",
        description: "closing the inner of two nested regions keeps the thread real-time",
        symbol: "pthread_mutex_lock",
        options: "",
        expected: Expectation::violation(1),
        body: nested_inner_closed,
    },
    Scenario {
        name: "nested_all_closed",
        description: "closing both nested regions leaves the thread unrestricted",
        symbol: "pthread_mutex_lock",
        options: "",
        expected: Expectation::CLEAN,
        body: nested_all_closed,
    },
    Scenario {
        name: "bypass_then_resume",
        description: "detection resumes once the bypass scope ends",
        symbol: "usleep",
        options: "",
        expected: Expectation::violation(1),
        body: bypass_then_resume,
    },
    Scenario {
        name: "guarded_closures",
        description: "without_detection inside with_realtime suppresses the report",
        symbol: "free",
        options: "",
        expected: Expectation::CLEAN,
        body: guarded_closures,
    },
    Scenario {
        name: "unbalanced_pop",
        description: "a pop at depth zero is clamped and does not open a region",
        symbol: "malloc",
        options: "",
        expected: Expectation::CLEAN,
        body: unbalanced_pop_then_call,
    },
    Scenario {
        name: "worker_thread",
        description: "a region on one thread does not affect another thread",
        symbol: "nanosleep",
        options: "",
        expected: Expectation::CLEAN,
        body: worker_thread_call,
    },
    Scenario {
        name: "custom_exitcode",
        description: "exitcode from RTSAN_OPTIONS becomes the process exit status",
        symbol: "calloc",
        options: "exitcode=42",
        expected: Expectation::violation(42),
        body: realtime_call,
    },
    Scenario {
        name: "wait_action",
        description: "violation_action=wait prompts on stderr and resumes once stdin yields a line or EOF",
        symbol: "pthread_mutex_unlock",
        options: "violation_action=wait",
        expected: Expectation::violation(0),
        body: realtime_call,
    },
    Scenario {
        name: "continue_action",
        description: "violation_action=continue reports and keeps running",
        symbol: "realloc",
        options: "violation_action=continue",
        expected: Expectation::violation(0),
        body: realtime_call,
    },
];

/// All scenarios, in catalog order.
#[must_use]
pub fn scenarios() -> &'static [Scenario] {
    SCENARIOS
}

#[must_use]
pub fn find_scenario(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}
