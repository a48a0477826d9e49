//! Helper macros for interceptor generation.
//!
//! Provides `interceptor!`, which generates a `#[unsafe(no_mangle)] pub unsafe
//! extern "C" fn` that runs the real-time check before the forwarding body.

/// Generate an exported interceptor.
///
/// # Usage
///
/// ```ignore
/// interceptor! {
///     /// Doc comment for the function.
///     fn usleep(usec: libc::useconds_t) -> c_int {
///         real_usleep(usec)
///     }
/// }
/// ```
///
/// Expands to an exported function named after the libc symbol. The check
/// uses the function name as the reported symbol and is skipped until the
/// runtime is initialized. The body forwards to the real implementation.
#[allow(unused_macros)]
macro_rules! interceptor {
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? ) -> $ret:ty
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) -> $ret {
            $crate::interceptors::check_call(stringify!($name));
            unsafe { $body }
        }
    };

    // Variant without return type (returns ())
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? )
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) {
            $crate::interceptors::check_call(stringify!($name));
            unsafe { $body }
        }
    };
}

#[allow(unused_imports)]
pub(crate) use interceptor;
