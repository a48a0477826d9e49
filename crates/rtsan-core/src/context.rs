//! Per-thread nesting state.
//!
//! A [`RegionContext`] tracks two independent bracketed scopes for one
//! thread: real-time regions and detection bypasses. Both nest. The counters
//! are plain `Cell`s because a context is only ever touched by its own thread.

use std::cell::Cell;
use std::fmt;

use crate::error::ContextError;
use crate::metrics::global_metrics;

/// The kind of bracketed scope a counter tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Real-time critical region.
    Realtime,
    /// Detection bypass.
    Bypass,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Realtime => f.write_str("realtime"),
            Self::Bypass => f.write_str("bypass"),
        }
    }
}

/// Nesting counters for one thread.
///
/// `RegionContext` is `!Sync`: a shared reference cannot leave the thread
/// that owns the context.
#[derive(Debug, Default)]
pub struct RegionContext {
    realtime_depth: Cell<u32>,
    bypass_depth: Cell<u32>,
}

impl RegionContext {
    /// Create a context with both counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            realtime_depth: Cell::new(0),
            bypass_depth: Cell::new(0),
        }
    }

    /// Enter a real-time region.
    #[inline]
    pub fn realtime_push(&self) {
        push(&self.realtime_depth);
    }

    /// Leave a real-time region.
    ///
    /// A pop at depth zero leaves the counter at zero and returns
    /// [`ContextError::Underflow`].
    #[inline]
    pub fn realtime_pop(&self) -> Result<(), ContextError> {
        pop(&self.realtime_depth, ScopeKind::Realtime)
    }

    /// Suspend detection.
    #[inline]
    pub fn bypass_push(&self) {
        push(&self.bypass_depth);
    }

    /// Resume detection.
    ///
    /// Same underflow behavior as [`realtime_pop`](Self::realtime_pop).
    #[inline]
    pub fn bypass_pop(&self) -> Result<(), ContextError> {
        pop(&self.bypass_depth, ScopeKind::Bypass)
    }

    /// True while at least one real-time region is open.
    #[inline]
    #[must_use]
    pub fn in_realtime_context(&self) -> bool {
        self.realtime_depth.get() > 0
    }

    /// True while at least one bypass scope is open.
    #[inline]
    #[must_use]
    pub fn is_bypassed(&self) -> bool {
        self.bypass_depth.get() > 0
    }

    #[must_use]
    pub fn realtime_depth(&self) -> u32 {
        self.realtime_depth.get()
    }

    #[must_use]
    pub fn bypass_depth(&self) -> u32 {
        self.bypass_depth.get()
    }
}

#[inline]
fn push(depth: &Cell<u32>) {
    // Saturating: u32::MAX nested scopes is a caller bug, not something to wrap.
    depth.set(depth.get().saturating_add(1));
}

#[inline]
fn pop(depth: &Cell<u32>, scope: ScopeKind) -> Result<(), ContextError> {
    match depth.get() {
        0 => {
            let metrics = global_metrics();
            metrics.inc_unbalanced_pops();
            Err(ContextError::Underflow { scope })
        }
        current => {
            depth.set(current - 1);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_is_idle() {
        let ctx = RegionContext::new();
        assert!(!ctx.in_realtime_context());
        assert!(!ctx.is_bypassed());
        assert_eq!(ctx.realtime_depth(), 0);
        assert_eq!(ctx.bypass_depth(), 0);
    }

    #[test]
    fn nested_realtime_regions_stay_realtime_until_outermost_pop() {
        let ctx = RegionContext::new();
        ctx.realtime_push();
        ctx.realtime_push();
        ctx.realtime_pop().unwrap();
        assert!(ctx.in_realtime_context());
        assert_eq!(ctx.realtime_depth(), 1);
        ctx.realtime_pop().unwrap();
        assert!(!ctx.in_realtime_context());
    }

    #[test]
    fn bypass_is_independent_of_realtime() {
        let ctx = RegionContext::new();
        ctx.bypass_push();
        assert!(ctx.is_bypassed());
        assert!(!ctx.in_realtime_context());

        ctx.realtime_push();
        ctx.bypass_pop().unwrap();
        assert!(!ctx.is_bypassed());
        assert!(ctx.in_realtime_context());
    }

    #[test]
    fn realtime_pop_at_zero_clamps_and_errors() {
        let ctx = RegionContext::new();
        let err = ctx.realtime_pop().unwrap_err();
        assert_eq!(
            err,
            ContextError::Underflow {
                scope: ScopeKind::Realtime
            }
        );
        assert_eq!(ctx.realtime_depth(), 0);

        // A subsequent push still opens exactly one region.
        ctx.realtime_push();
        assert_eq!(ctx.realtime_depth(), 1);
    }

    #[test]
    fn bypass_pop_at_zero_clamps_and_errors() {
        let ctx = RegionContext::new();
        assert_eq!(
            ctx.bypass_pop(),
            Err(ContextError::Underflow {
                scope: ScopeKind::Bypass
            })
        );
        assert!(!ctx.is_bypassed());
    }

    #[test]
    fn underflow_is_counted() {
        let before = global_metrics().snapshot().unbalanced_pops;
        let ctx = RegionContext::new();
        let _ = ctx.bypass_pop();
        let _ = ctx.realtime_pop();
        assert!(global_metrics().snapshot().unbalanced_pops >= before + 2);
    }

    #[test]
    fn scope_kind_display() {
        assert_eq!(ScopeKind::Realtime.to_string(), "realtime");
        assert_eq!(ScopeKind::Bypass.to_string(), "bypass");
    }
}
