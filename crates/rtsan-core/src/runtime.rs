//! Process-wide runtime initialization.
//!
//! Uses a manual atomic state machine instead of `OnceLock`: initialization
//! reads the environment, which allocates, and with interceptors installed
//! those allocations call back into the runtime. `OnceLock` would park the
//! thread on its own in-progress initializer. Here the owning thread is
//! recorded; interceptors see "not initialized" and pass through, other
//! threads wait for `READY`.

#![allow(unsafe_code)]

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::config::{OPTIONS_ENV, options_from_env, set_options};
use crate::report;
use crate::storage::get_context_for_this_thread;

const STATE_UNINIT: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;

static RUNTIME_STATE: AtomicU8 = AtomicU8::new(STATE_UNINIT);
static INIT_OWNER: AtomicUsize = AtomicUsize::new(0);

fn current_thread_token() -> usize {
    // SAFETY: pthread_self has no preconditions.
    unsafe { libc::pthread_self() as usize }
}

/// True once [`init`] has completed.
#[inline]
#[must_use]
pub fn is_initialized() -> bool {
    RUNTIME_STATE.load(Ordering::Acquire) == STATE_READY
}

/// Initialize the runtime. Idempotent and safe to call from any thread.
///
/// Reads `RTSAN_OPTIONS`, publishes the effective options and creates the
/// per-thread storage key. Concurrent callers block until the first one
/// finishes; a reentrant call from the initializing thread returns at once.
pub fn init() {
    match RUNTIME_STATE.load(Ordering::Acquire) {
        STATE_READY => return,
        STATE_INITIALIZING => {
            wait_for_ready();
            return;
        }
        _ => {}
    }

    if RUNTIME_STATE
        .compare_exchange(
            STATE_UNINIT,
            STATE_INITIALIZING,
            Ordering::SeqCst,
            Ordering::Acquire,
        )
        .is_err()
    {
        wait_for_ready();
        return;
    }
    INIT_OWNER.store(current_thread_token(), Ordering::Release);

    let (opts, errors) = options_from_env();
    set_options(opts);
    // Forces the one-time key creation and gives the initializing thread its
    // context before any interceptor can ask for it.
    let _ = get_context_for_this_thread();

    RUNTIME_STATE.store(STATE_READY, Ordering::Release);

    for err in &errors {
        report::warn(format_args!("ignoring {OPTIONS_ENV} entry: {err}"));
    }
    report::info(
        1,
        format_args!(
            "initialized (violation_action={}, exitcode={}, abort_on_error={})",
            opts.violation_action.as_str(),
            opts.exitcode,
            u8::from(opts.abort_on_error)
        ),
    );
}

fn wait_for_ready() {
    while RUNTIME_STATE.load(Ordering::Acquire) != STATE_READY {
        if INIT_OWNER.load(Ordering::Acquire) == current_thread_token() {
            return;
        }
        std::thread::yield_now();
    }
}
