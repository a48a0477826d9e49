//! Per-thread context storage.
//!
//! Built directly on POSIX thread-specific data rather than `thread_local!`:
//! Rust TLS destructors are registered lazily through the C runtime, which
//! may allocate, and allocation is exactly what the interceptors watch. A
//! pthread key with a destructor is registered once per process and never
//! allocates on the lookup path.
//!
//! - `pthread_once` guards key creation; racing first callers block until the
//!   single initializer finished.
//! - The first lookup on a thread places a fresh [`RegionContext`] in
//!   internal memory and stores it in the thread's slot.
//! - The key destructor releases the context when the thread exits.
//! - With `verbosity=2` both events are logged with the thread id and the
//!   number of live contexts.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::context::RegionContext;
use crate::guard::ScopedBypass;
use crate::internal_alloc::{internal_delete, internal_new};
use crate::metrics::{RtsanMetrics, global_metrics};
use crate::report;

/// Verbosity at which context creation and release are logged.
const CONTEXT_EVENTS_VERBOSITY: u8 = 2;

fn thread_id() -> libc::c_long {
    // SAFETY: gettid has no preconditions.
    unsafe { libc::syscall(libc::SYS_gettid) }
}

struct ContextKey {
    once: UnsafeCell<libc::pthread_once_t>,
    key: UnsafeCell<libc::pthread_key_t>,
}

// SAFETY: `key` is written exactly once inside the pthread_once initializer
// and only read after pthread_once returned, which orders the write.
unsafe impl Sync for ContextKey {}

static CONTEXT_KEY: ContextKey = ContextKey {
    once: UnsafeCell::new(libc::PTHREAD_ONCE_INIT),
    key: UnsafeCell::new(0),
};

static KEY_CREATE_STATUS: AtomicI32 = AtomicI32::new(-1);

unsafe extern "C" fn release_context(ptr: *mut c_void) {
    if let Some(ctx) = NonNull::new(ptr.cast::<RegionContext>()) {
        // SAFETY: the slot only ever holds pointers produced by internal_new
        // below, and pthread clears the slot before calling us.
        unsafe { internal_delete(ctx) };
        RtsanMetrics::inc(&global_metrics().contexts_released);
        // The slot is already cleared, so interceptors reached from here
        // find no context and skip the check.
        report::info(
            CONTEXT_EVENTS_VERBOSITY,
            format_args!(
                "released context for thread {} (live contexts: {})",
                thread_id(),
                global_metrics().snapshot().live_contexts()
            ),
        );
    }
}

extern "C" fn create_context_key() {
    // SAFETY: runs once under pthread_once; the key cell is not read until
    // pthread_once returns.
    let rc = unsafe { libc::pthread_key_create(CONTEXT_KEY.key.get(), Some(release_context)) };
    KEY_CREATE_STATUS.store(rc, Ordering::Release);
}

fn context_key() -> libc::pthread_key_t {
    // SAFETY: the once cell is a static pthread_once_t initialized with
    // PTHREAD_ONCE_INIT.
    let rc = unsafe { libc::pthread_once(CONTEXT_KEY.once.get(), create_context_key) };
    check!(rc == 0);
    check!(KEY_CREATE_STATUS.load(Ordering::Acquire) == 0);
    // SAFETY: written by create_context_key before pthread_once returned.
    unsafe { *CONTEXT_KEY.key.get() }
}

/// The calling thread's context, created on first use.
///
/// The reference stays valid for the rest of the thread's life. It cannot be
/// moved to another thread because `RegionContext` is not `Sync`.
pub fn get_context_for_this_thread() -> &'static RegionContext {
    let key = context_key();
    // SAFETY: key is a live pthread key.
    let current = unsafe { libc::pthread_getspecific(key) }.cast::<RegionContext>();
    if let Some(ctx) = NonNull::new(current) {
        // SAFETY: slot values are live contexts owned by this thread.
        return unsafe { &*ctx.as_ptr() };
    }

    let Some(ctx) = internal_new(RegionContext::new()) else {
        crate::report::check_failed(file!(), line!(), "internal_new(RegionContext)");
    };
    // SAFETY: key is live; ownership of ctx moves into the slot.
    let rc = unsafe { libc::pthread_setspecific(key, ctx.as_ptr().cast::<c_void>()) };
    check!(rc == 0);
    RtsanMetrics::inc(&global_metrics().contexts_created);

    // SAFETY: ctx stays allocated until this thread's key destructor runs.
    let ctx: &'static RegionContext = unsafe { &*ctx.as_ptr() };
    {
        let _bypass = ScopedBypass::enter(ctx);
        report::info(
            CONTEXT_EVENTS_VERBOSITY,
            format_args!(
                "created context for thread {} (live contexts: {})",
                thread_id(),
                global_metrics().snapshot().live_contexts()
            ),
        );
    }
    ctx
}

/// The calling thread's context if one was already created.
///
/// Never allocates. A thread without a context has never entered a region,
/// so interceptors use this to skip the check entirely.
#[must_use]
pub fn try_get_context_for_this_thread() -> Option<&'static RegionContext> {
    let key = context_key();
    // SAFETY: key is a live pthread key.
    let current = unsafe { libc::pthread_getspecific(key) }.cast::<RegionContext>();
    // SAFETY: slot values are live contexts owned by this thread.
    NonNull::new(current).map(|ctx| unsafe { &*ctx.as_ptr() })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn repeated_lookups_return_same_instance() {
        let a = get_context_for_this_thread();
        let b = get_context_for_this_thread();
        assert!(std::ptr::eq(a, b));
        assert!(try_get_context_for_this_thread().is_some());
    }

    #[test]
    fn state_persists_across_lookups() {
        thread::spawn(|| {
            get_context_for_this_thread().realtime_push();
            let again = get_context_for_this_thread();
            assert!(again.in_realtime_context());
            again.realtime_pop().unwrap();
            assert!(!get_context_for_this_thread().in_realtime_context());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn fresh_thread_has_no_context_until_first_lookup() {
        thread::spawn(|| {
            assert!(try_get_context_for_this_thread().is_none());
            let ctx = get_context_for_this_thread();
            assert_eq!(ctx.realtime_depth(), 0);
            assert_eq!(ctx.bypass_depth(), 0);
            let existing = try_get_context_for_this_thread().unwrap();
            assert!(std::ptr::eq(existing, ctx));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn threads_see_independent_contexts() {
        let barrier = Arc::new(Barrier::new(2));

        let a_barrier = Arc::clone(&barrier);
        let a = thread::spawn(move || {
            let ctx = get_context_for_this_thread();
            ctx.realtime_push();
            a_barrier.wait();
            // B checks its own context while A is inside a region.
            a_barrier.wait();
            assert!(ctx.in_realtime_context());
            ctx.realtime_pop().unwrap();
        });

        let b_barrier = Arc::clone(&barrier);
        let b = thread::spawn(move || {
            b_barrier.wait();
            let ctx = get_context_for_this_thread();
            assert!(!ctx.in_realtime_context());
            b_barrier.wait();
        });

        a.join().unwrap();
        b.join().unwrap();
    }

    #[test]
    fn contexts_are_released_at_thread_exit() {
        let before = global_metrics().snapshot().contexts_released;
        thread::spawn(|| {
            let _ = get_context_for_this_thread();
        })
        .join()
        .unwrap();
        // The key destructor runs before join returns.
        assert!(global_metrics().snapshot().contexts_released > before);
    }

    #[test]
    fn concurrent_first_touch_initializes_key_once() {
        const THREADS: usize = 8;
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let ctx = get_context_for_this_thread();
                    ctx.bypass_push();
                    let key = context_key();
                    ctx.bypass_pop().unwrap();
                    key
                })
            })
            .collect();
        let keys: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }
}
