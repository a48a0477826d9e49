//! Internal assertion macros.

/// Abort the process with a `CHECK failed` line when `$cond` is false.
///
/// Reserved for internal invariants (runtime not initialized, pthread key
/// failures). Never used for conditions user code can trigger.
macro_rules! check {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::report::check_failed(file!(), line!(), stringify!($cond));
        }
    };
}
