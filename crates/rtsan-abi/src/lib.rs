// Every export accepts raw pointers from C callers.
#![allow(clippy::missing_safety_doc)]
//! # rtsan-abi
//!
//! `extern "C"` boundary for the rtsan runtime.
//!
//! Instrumented programs (or a compiler pass) call the `__rtsan_*` entry points
//! to open and close real-time regions and to suspend detection. With the
//! `interpose` feature the `cdylib` also exports libc-named interceptors that
//! check the calling thread's context before forwarding to the real function.
//!
//! ```text
//! C caller -> __rtsan_* / interceptor (this crate) -> rtsan-core detector -> libc
//! ```

use std::ffi::{CStr, c_char};

use rtsan_core::{ScopeKind, get_context_for_this_thread, report};

#[macro_use]
mod macros;

// Gated behind cfg(not(test)): these export #[no_mangle] malloc/free/...
// which would replace the allocator of this crate's own test binary.
// The allocator forwards bind `__libc_*@GLIBC_2.2.5`, the x86_64 glibc
// symbol version, so other targets build without interceptors.
#[cfg(all(
    not(test),
    feature = "interpose",
    target_arch = "x86_64",
    target_os = "linux",
    target_env = "gnu"
))]
pub mod interceptors;

fn warn_unbalanced(scope: ScopeKind, entry: &str) {
    report::warn(format_args!(
        "{entry} called without a matching {scope} enter; ignoring"
    ));
}

/// Initialize the runtime. Safe to call more than once.
#[unsafe(no_mangle)]
pub extern "C" fn __rtsan_init() {
    rtsan_core::init();
}

/// Non-zero once the runtime is initialized.
#[unsafe(no_mangle)]
pub extern "C" fn __rtsan_is_initialized() -> bool {
    rtsan_core::is_initialized()
}

/// Enter a real-time region on the calling thread.
#[unsafe(no_mangle)]
pub extern "C" fn __rtsan_realtime_enter() {
    get_context_for_this_thread().realtime_push();
}

/// Leave the innermost real-time region on the calling thread.
#[unsafe(no_mangle)]
pub extern "C" fn __rtsan_realtime_exit() {
    if get_context_for_this_thread().realtime_pop().is_err() {
        warn_unbalanced(ScopeKind::Realtime, "__rtsan_realtime_exit");
    }
}

/// Suspend detection on the calling thread.
#[unsafe(no_mangle)]
pub extern "C" fn __rtsan_disable() {
    get_context_for_this_thread().bypass_push();
}

/// Resume detection suspended by the matching [`__rtsan_disable`].
#[unsafe(no_mangle)]
pub extern "C" fn __rtsan_enable() {
    if get_context_for_this_thread().bypass_pop().is_err() {
        warn_unbalanced(ScopeKind::Bypass, "__rtsan_enable");
    }
}

/// Check a call to `intercepted_function_name` made now on the calling thread.
///
/// A null name is reported as `<unknown>`. Initializes the runtime if needed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __rtsan_expect_not_realtime(intercepted_function_name: *const c_char) {
    rtsan_core::init();
    let name = if intercepted_function_name.is_null() {
        "<unknown>".into()
    } else {
        // SAFETY: caller passes a NUL-terminated string.
        unsafe { CStr::from_ptr(intercepted_function_name) }.to_string_lossy()
    };
    rtsan_core::expect_not_realtime(get_context_for_this_thread(), &name);
}

#[cfg(test)]
mod tests {
    use super::*;

    use rtsan_core::ViolationAction;
    use rtsan_core::config::set_violation_action;

    #[test]
    fn enter_exit_track_depth() {
        std::thread::spawn(|| {
            __rtsan_realtime_enter();
            __rtsan_realtime_enter();
            let ctx = get_context_for_this_thread();
            assert_eq!(ctx.realtime_depth(), 2);
            __rtsan_realtime_exit();
            assert!(ctx.in_realtime_context());
            __rtsan_realtime_exit();
            assert!(!ctx.in_realtime_context());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn unbalanced_exit_is_clamped() {
        std::thread::spawn(|| {
            __rtsan_realtime_exit();
            __rtsan_enable();
            let ctx = get_context_for_this_thread();
            assert_eq!(ctx.realtime_depth(), 0);
            assert_eq!(ctx.bypass_depth(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn null_name_is_tolerated() {
        __rtsan_init();
        set_violation_action(ViolationAction::Continue);
        std::thread::spawn(|| {
            __rtsan_realtime_enter();
            // SAFETY: null is explicitly accepted.
            unsafe { __rtsan_expect_not_realtime(std::ptr::null()) };
            __rtsan_realtime_exit();
        })
        .join()
        .unwrap();
    }
}
