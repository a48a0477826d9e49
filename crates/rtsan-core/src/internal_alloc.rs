//! Internal allocator for runtime-owned memory.
//!
//! Memory for runtime state must never come from `malloc`: with interceptors
//! installed, `malloc` is itself a real-time-unsafe function and routing the
//! runtime's own allocations through it would recurse into the detector.
//! Blocks here are anonymous mappings obtained with raw syscalls, which no
//! interceptor can see.
//!
//! Each block carries a 16-byte header holding the mapping length so that
//! [`internal_free`] only needs the pointer.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Header size in front of every block. Also the payload alignment.
pub const INTERNAL_ALIGN: usize = 16;

const FALLBACK_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    // SAFETY: sysconf has no memory-safety preconditions.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let size = if raw > 0 && (raw as usize).is_power_of_two() {
        raw as usize
    } else {
        FALLBACK_PAGE_SIZE
    };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// Length of the mapping that backs a request of `size` payload bytes.
fn mapping_len(size: usize) -> Option<usize> {
    let page = page_size();
    let total = size.checked_add(INTERNAL_ALIGN)?;
    Some(total.checked_add(page - 1)? & !(page - 1))
}

#[cfg(all(target_os = "linux", target_pointer_width = "64"))]
unsafe fn raw_map(len: usize) -> Option<NonNull<u8>> {
    // SAFETY: anonymous private mapping, no file descriptor involved.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_mmap,
            0 as libc::c_long,
            len as libc::c_long,
            (libc::PROT_READ | libc::PROT_WRITE) as libc::c_long,
            (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS) as libc::c_long,
            -1 as libc::c_long,
            0 as libc::c_long,
        )
    };
    if ret == -1 {
        return None;
    }
    NonNull::new(ret as usize as *mut u8)
}

#[cfg(all(target_os = "linux", target_pointer_width = "64"))]
unsafe fn raw_unmap(base: *mut u8, len: usize) {
    // SAFETY: caller passes a mapping previously returned by raw_map.
    unsafe {
        libc::syscall(
            libc::SYS_munmap,
            base as usize as libc::c_long,
            len as libc::c_long,
        );
    }
}

#[cfg(not(all(target_os = "linux", target_pointer_width = "64")))]
unsafe fn raw_map(len: usize) -> Option<NonNull<u8>> {
    // SAFETY: anonymous private mapping, no file descriptor involved.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return None;
    }
    NonNull::new(ptr.cast::<u8>())
}

#[cfg(not(all(target_os = "linux", target_pointer_width = "64")))]
unsafe fn raw_unmap(base: *mut u8, len: usize) {
    // SAFETY: caller passes a mapping previously returned by raw_map.
    unsafe {
        libc::munmap(base.cast::<c_void>(), len);
    }
}

/// Allocate `size` bytes aligned to [`INTERNAL_ALIGN`].
///
/// Returns `None` if the kernel refuses the mapping or the size overflows.
/// The memory is zero-filled.
#[must_use]
pub fn internal_alloc(size: usize) -> Option<NonNull<u8>> {
    let len = mapping_len(size)?;
    // SAFETY: len is non-zero and page-rounded.
    let base = unsafe { raw_map(len) }?;
    // SAFETY: the mapping is at least one page, larger than the header, and
    // page-aligned so the usize write is aligned.
    unsafe {
        base.as_ptr().cast::<usize>().write(len);
        NonNull::new(base.as_ptr().add(INTERNAL_ALIGN))
    }
}

/// Release a block returned by [`internal_alloc`]. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by [`internal_alloc`] that has
/// not been freed yet.
pub unsafe fn internal_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: caller contract: ptr sits INTERNAL_ALIGN bytes past a mapping
    // base whose first word holds the mapping length.
    unsafe {
        let base = ptr.cast::<u8>().sub(INTERNAL_ALIGN);
        let len = base.cast::<usize>().read();
        raw_unmap(base, len);
    }
}

/// Move `value` into internal memory.
#[must_use]
pub fn internal_new<T>(value: T) -> Option<NonNull<T>> {
    const { assert!(std::mem::align_of::<T>() <= INTERNAL_ALIGN) };
    let ptr = internal_alloc(std::mem::size_of::<T>())?.cast::<T>();
    // SAFETY: fresh allocation, large enough and aligned for T.
    unsafe { ptr.as_ptr().write(value) };
    Some(ptr)
}

/// Drop and release a value created by [`internal_new`].
///
/// # Safety
///
/// `ptr` must come from [`internal_new::<T>`] and must not be used afterwards.
pub unsafe fn internal_delete<T>(ptr: NonNull<T>) {
    // SAFETY: caller contract.
    unsafe {
        std::ptr::drop_in_place(ptr.as_ptr());
        internal_free(ptr.as_ptr().cast::<c_void>());
    }
}
