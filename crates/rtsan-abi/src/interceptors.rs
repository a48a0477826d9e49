//! libc interceptors for calls that are not real-time safe.
//!
//! Each export checks the calling thread's context, then forwards to the real
//! function. Allocator entry points forward to glibc's internal `__libc_*`
//! symbols directly, since resolving them through `dlsym` can itself allocate.
//! Everything else is looked up once with `dlsym(RTLD_NEXT, ..)` and cached.
//!
//! Before the runtime is initialized every interceptor is a plain passthrough.
//! The library initializes itself from `.init_array` when it is loaded.

use std::ffi::{CStr, c_int, c_uint, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};

use rtsan_core::storage::try_get_context_for_this_thread;
use rtsan_core::{expect_not_realtime, is_initialized, report};

unsafe extern "C" {
    #[link_name = "__libc_malloc@GLIBC_2.2.5"]
    fn native_libc_malloc(size: usize) -> *mut c_void;
    #[link_name = "__libc_calloc@GLIBC_2.2.5"]
    fn native_libc_calloc(nmemb: usize, size: usize) -> *mut c_void;
    #[link_name = "__libc_realloc@GLIBC_2.2.5"]
    fn native_libc_realloc(ptr: *mut c_void, size: usize) -> *mut c_void;
    #[link_name = "__libc_free@GLIBC_2.2.5"]
    fn native_libc_free(ptr: *mut c_void);
    #[link_name = "__libc_memalign@GLIBC_2.2.5"]
    fn native_libc_memalign(alignment: usize, size: usize) -> *mut c_void;
}

/// Run the real-time check for `name` on the calling thread.
///
/// A thread that never created a context has never entered a region, so it is
/// skipped without touching the allocator. Inlined so the exported
/// interceptor is the frame a report starts above.
#[inline(always)]
pub(crate) fn check_call(name: &str) {
    if !is_initialized() {
        return;
    }
    if let Some(ctx) = try_get_context_for_this_thread() {
        expect_not_realtime(ctx, name);
    }
}

/// Lazily resolved next definition of a libc symbol.
struct RealFn {
    name: &'static CStr,
    ptr: AtomicPtr<c_void>,
}

impl RealFn {
    const fn new(name: &'static CStr) -> Self {
        Self {
            name,
            ptr: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    fn resolve(&self) -> *mut c_void {
        let cached = self.ptr.load(Ordering::Acquire);
        if !cached.is_null() {
            return cached;
        }
        // SAFETY: name is a static NUL-terminated symbol name.
        let sym = unsafe { libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr()) };
        if sym.is_null() {
            report::check_failed(file!(), line!(), "dlsym(RTLD_NEXT, name) != NULL");
        }
        // Racing resolvers store the same address.
        self.ptr.store(sym, Ordering::Release);
        sym
    }
}

static REAL_SLEEP: RealFn = RealFn::new(c"sleep");
static REAL_USLEEP: RealFn = RealFn::new(c"usleep");
static REAL_NANOSLEEP: RealFn = RealFn::new(c"nanosleep");
static REAL_PTHREAD_MUTEX_LOCK: RealFn = RealFn::new(c"pthread_mutex_lock");
static REAL_PTHREAD_MUTEX_UNLOCK: RealFn = RealFn::new(c"pthread_mutex_unlock");

type SleepFn = unsafe extern "C" fn(c_uint) -> c_uint;
type UsleepFn = unsafe extern "C" fn(libc::useconds_t) -> c_int;
type NanosleepFn = unsafe extern "C" fn(*const libc::timespec, *mut libc::timespec) -> c_int;
type MutexFn = unsafe extern "C" fn(*mut libc::pthread_mutex_t) -> c_int;

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

interceptor! {
    fn malloc(size: usize) -> *mut c_void {
        native_libc_malloc(size)
    }
}

interceptor! {
    fn calloc(nmemb: usize, size: usize) -> *mut c_void {
        native_libc_calloc(nmemb, size)
    }
}

interceptor! {
    fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
        native_libc_realloc(ptr, size)
    }
}

interceptor! {
    fn free(ptr: *mut c_void) {
        native_libc_free(ptr)
    }
}

interceptor! {
    fn posix_memalign(memptr: *mut *mut c_void, alignment: usize, size: usize) -> c_int {
        if memptr.is_null() {
            return libc::EINVAL;
        }
        let pointer_size = std::mem::size_of::<*mut c_void>();
        if !alignment.is_power_of_two() || alignment % pointer_size != 0 {
            return libc::EINVAL;
        }
        let out = native_libc_memalign(alignment, size);
        if out.is_null() && size != 0 {
            return libc::ENOMEM;
        }
        *memptr = out;
        0
    }
}

// ---------------------------------------------------------------------------
// Sleeping
// ---------------------------------------------------------------------------

interceptor! {
    fn sleep(seconds: c_uint) -> c_uint {
        let real: SleepFn = std::mem::transmute(REAL_SLEEP.resolve());
        real(seconds)
    }
}

interceptor! {
    fn usleep(usec: libc::useconds_t) -> c_int {
        let real: UsleepFn = std::mem::transmute(REAL_USLEEP.resolve());
        real(usec)
    }
}

interceptor! {
    fn nanosleep(req: *const libc::timespec, rem: *mut libc::timespec) -> c_int {
        let real: NanosleepFn = std::mem::transmute(REAL_NANOSLEEP.resolve());
        real(req, rem)
    }
}

// ---------------------------------------------------------------------------
// Locking
// ---------------------------------------------------------------------------

interceptor! {
    fn pthread_mutex_lock(mutex: *mut libc::pthread_mutex_t) -> c_int {
        let real: MutexFn = std::mem::transmute(REAL_PTHREAD_MUTEX_LOCK.resolve());
        real(mutex)
    }
}

interceptor! {
    fn pthread_mutex_unlock(mutex: *mut libc::pthread_mutex_t) -> c_int {
        let real: MutexFn = std::mem::transmute(REAL_PTHREAD_MUTEX_UNLOCK.resolve());
        real(mutex)
    }
}

// ---------------------------------------------------------------------------
// Load-time initialization
// ---------------------------------------------------------------------------

extern "C" fn rtsan_preinit() {
    rtsan_core::init();
}

#[used]
#[unsafe(link_section = ".init_array")]
static RTSAN_PREINIT: extern "C" fn() = rtsan_preinit;
