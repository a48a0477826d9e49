//! RAII scopes over a [`RegionContext`].
//!
//! Guards push on creation and pop on drop, so the push/pop discipline holds
//! on every exit path including unwinding.

use crate::context::RegionContext;
use crate::storage::get_context_for_this_thread;

/// Open real-time region; closed on drop.
#[must_use = "the region closes as soon as the guard is dropped"]
pub struct ScopedRealtime<'a> {
    ctx: &'a RegionContext,
}

impl<'a> ScopedRealtime<'a> {
    pub fn enter(ctx: &'a RegionContext) -> Self {
        ctx.realtime_push();
        Self { ctx }
    }
}

impl ScopedRealtime<'static> {
    /// Open a region on the calling thread's context.
    pub fn for_this_thread() -> Self {
        Self::enter(get_context_for_this_thread())
    }
}

impl Drop for ScopedRealtime<'_> {
    fn drop(&mut self) {
        // Balanced by construction.
        let _ = self.ctx.realtime_pop();
    }
}

/// Suspended detection; resumed on drop.
#[must_use = "detection resumes as soon as the guard is dropped"]
pub struct ScopedBypass<'a> {
    ctx: &'a RegionContext,
}

impl<'a> ScopedBypass<'a> {
    pub fn enter(ctx: &'a RegionContext) -> Self {
        ctx.bypass_push();
        Self { ctx }
    }
}

impl ScopedBypass<'static> {
    /// Suspend detection on the calling thread's context.
    pub fn for_this_thread() -> Self {
        Self::enter(get_context_for_this_thread())
    }
}

impl Drop for ScopedBypass<'_> {
    fn drop(&mut self) {
        let _ = self.ctx.bypass_pop();
    }
}

/// Run `f` inside a real-time region on the calling thread.
pub fn with_realtime<R>(f: impl FnOnce() -> R) -> R {
    let _region = ScopedRealtime::for_this_thread();
    f()
}

/// Run `f` with detection suspended on the calling thread.
pub fn without_detection<R>(f: impl FnOnce() -> R) -> R {
    let _bypass = ScopedBypass::for_this_thread();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_guard_pops_on_drop() {
        let ctx = RegionContext::new();
        {
            let _outer = ScopedRealtime::enter(&ctx);
            {
                let _inner = ScopedRealtime::enter(&ctx);
                assert_eq!(ctx.realtime_depth(), 2);
            }
            assert!(ctx.in_realtime_context());
        }
        assert!(!ctx.in_realtime_context());
    }

    #[test]
    fn bypass_guard_pops_on_drop() {
        let ctx = RegionContext::new();
        {
            let _bypass = ScopedBypass::enter(&ctx);
            assert!(ctx.is_bypassed());
        }
        assert!(!ctx.is_bypassed());
    }

    #[test]
    fn guards_pop_during_unwind() {
        let result = std::thread::spawn(|| {
            let caught = std::panic::catch_unwind(|| {
                with_realtime(|| {
                    without_detection(|| panic!("boom"));
                })
            });
            assert!(caught.is_err());
            let ctx = get_context_for_this_thread();
            (ctx.realtime_depth(), ctx.bypass_depth())
        })
        .join()
        .unwrap();
        assert_eq!(result, (0, 0));
    }

    #[test]
    fn closures_return_values() {
        std::thread::spawn(|| {
            let depth = with_realtime(|| get_context_for_this_thread().realtime_depth());
            assert_eq!(depth, 1);
            let bypassed = without_detection(|| get_context_for_this_thread().is_bypassed());
            assert!(bypassed);
        })
        .join()
        .unwrap();
    }
}
