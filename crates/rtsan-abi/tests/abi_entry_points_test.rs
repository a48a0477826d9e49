use std::ffi::CString;
use std::thread;

use rtsan_abi::{
    __rtsan_disable, __rtsan_enable, __rtsan_expect_not_realtime, __rtsan_init,
    __rtsan_is_initialized, __rtsan_realtime_enter, __rtsan_realtime_exit,
};
use rtsan_core::config::set_violation_action;
use rtsan_core::{ViolationAction, get_context_for_this_thread, global_metrics};

fn init_continue() {
    __rtsan_init();
    set_violation_action(ViolationAction::Continue);
}

#[test]
fn init_is_idempotent_and_observable() {
    __rtsan_init();
    __rtsan_init();
    assert!(__rtsan_is_initialized());
}

#[test]
fn violation_through_c_entry_is_counted() {
    init_continue();
    thread::spawn(|| {
        let name = CString::new("pthread_mutex_lock").unwrap();
        let before = global_metrics().snapshot().violations;
        __rtsan_realtime_enter();
        // SAFETY: name is a valid C string.
        unsafe { __rtsan_expect_not_realtime(name.as_ptr()) };
        __rtsan_realtime_exit();
        assert!(global_metrics().snapshot().violations > before);
    })
    .join()
    .unwrap();
}

#[test]
fn disable_suppresses_and_enable_restores() {
    init_continue();
    thread::spawn(|| {
        let name = CString::new("malloc").unwrap();
        __rtsan_realtime_enter();
        __rtsan_disable();
        let before = global_metrics().snapshot().bypassed_checks;
        // SAFETY: name is a valid C string.
        unsafe { __rtsan_expect_not_realtime(name.as_ptr()) };
        assert!(global_metrics().snapshot().bypassed_checks > before);
        __rtsan_enable();

        let ctx = get_context_for_this_thread();
        assert!(!ctx.is_bypassed());
        assert!(ctx.in_realtime_context());
        __rtsan_realtime_exit();
        assert!(!ctx.in_realtime_context());
    })
    .join()
    .unwrap();
}

#[test]
fn unbalanced_calls_bump_the_metric() {
    thread::spawn(|| {
        let before = global_metrics().snapshot().unbalanced_pops;
        __rtsan_realtime_exit();
        __rtsan_enable();
        assert!(global_metrics().snapshot().unbalanced_pops >= before + 2);
    })
    .join()
    .unwrap();
}

// Interceptors bind x86_64 glibc symbol versions; elsewhere the module is
// absent and the crate still builds with the feature on.
#[cfg(all(
    feature = "interpose",
    target_arch = "x86_64",
    target_os = "linux",
    target_env = "gnu"
))]
#[test]
fn interceptors_are_exported_on_x86_64_glibc() {
    let usleep: unsafe extern "C" fn(libc::useconds_t) -> std::ffi::c_int =
        rtsan_abi::interceptors::usleep;
    assert!(!(usleep as *const ()).is_null());
}
