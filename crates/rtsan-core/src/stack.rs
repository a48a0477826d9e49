//! Caller location capture and stack trace printing.
//!
//! Frames come from glibc's `backtrace(3)`, which unwinds through `.eh_frame`
//! and works without frame pointers. Each frame is resolved with `dladdr`;
//! symbols missing from the dynamic table print as `(object+offset)` so the
//! trace can be symbolized offline.

#![allow(unsafe_code)]

use std::ffi::{CStr, c_void};
use std::io::{self, Write};

/// Upper bound on the frames kept per trace.
const MAX_FRAMES: usize = 64;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
unsafe extern "C" {
    fn backtrace(buffer: *mut *mut c_void, size: std::ffi::c_int) -> std::ffi::c_int;
}

/// Return addresses of the calling thread, innermost first.
#[derive(Debug, Clone, Copy)]
struct StackTrace {
    frames: [usize; MAX_FRAMES],
    len: usize,
}

impl StackTrace {
    /// Capture the calling thread's stack. Frame 0 lies in the function that
    /// contains this call.
    ///
    /// Empty on targets without `backtrace(3)`.
    #[inline(always)]
    #[must_use]
    fn capture() -> Self {
        let mut trace = Self {
            frames: [0; MAX_FRAMES],
            len: 0,
        };
        #[cfg(all(target_os = "linux", target_env = "gnu"))]
        {
            // SAFETY: the buffer holds MAX_FRAMES pointer-sized slots and
            // backtrace writes at most `size` of them.
            let n = unsafe {
                backtrace(
                    trace.frames.as_mut_ptr().cast::<*mut c_void>(),
                    MAX_FRAMES as std::ffi::c_int,
                )
            };
            trace.len = usize::try_from(n).unwrap_or(0).min(MAX_FRAMES);
        }
        trace
    }

    #[must_use]
    fn frames(&self) -> &[usize] {
        &self.frames[..self.len]
    }

    /// Index of the first frame whose return address is `pc`.
    #[must_use]
    fn position(&self, pc: usize) -> Option<usize> {
        self.frames().iter().position(|&f| f == pc)
    }
}

/// Where a violation was detected: the return address into the code that
/// called the interception point, and the interception point's frame
/// register.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallerLocation {
    pub pc: usize,
    pub bp: usize,
}

impl CallerLocation {
    /// Location of the code that called the calling function.
    ///
    /// The caller's frame must still be live when this returns, so the call
    /// must not be in tail position. `bp` is recorded as given; read it with
    /// [`current_frame`] in the same function.
    #[inline(never)]
    #[must_use]
    pub fn capture_caller(bp: usize) -> Self {
        let trace = StackTrace::capture();
        // Frame 0 is this function, frame 1 the one that called it.
        let pc = trace.frames().get(2).copied().unwrap_or(0);
        Self { pc, bp }
    }

    /// True if no return address could be read.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        self.pc == 0
    }
}

/// Frame register of the function this is inlined into. Zero where unsupported.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
#[must_use]
pub fn current_frame() -> usize {
    let bp: usize;
    // SAFETY: copies rbp into a register; touches no memory.
    unsafe {
        core::arch::asm!(
            "mov {bp}, rbp",
            bp = out(reg) bp,
            options(nomem, nostack, preserves_flags),
        );
    }
    bp
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
#[must_use]
pub fn current_frame() -> usize {
    let bp: usize;
    // SAFETY: copies x29 into a register; touches no memory.
    unsafe {
        core::arch::asm!(
            "mov {bp}, x29",
            bp = out(reg) bp,
            options(nomem, nostack, preserves_flags),
        );
    }
    bp
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
#[must_use]
pub fn current_frame() -> usize {
    0
}

/// Write the stack of the calling thread starting at `location`.
///
/// Frames above the location (this runtime's own reporting path) are left
/// out. If the location is not on the current stack only the location line
/// is written.
pub fn print_stack_trace(out: &mut dyn Write, location: CallerLocation) -> io::Result<()> {
    if location.is_unknown() {
        return write_location(out, location);
    }
    let trace = StackTrace::capture();
    match trace.position(location.pc) {
        Some(start) => {
            for (index, &pc) in trace.frames()[start..].iter().enumerate() {
                write_frame(out, index, pc)?;
            }
            Ok(())
        }
        None => write_location(out, location),
    }
}

pub(crate) fn write_location(out: &mut dyn Write, location: CallerLocation) -> io::Result<()> {
    if location.is_unknown() {
        writeln!(out, "    #0 <unknown location>")
    } else {
        writeln!(
            out,
            "    #0 pc {:#018x} bp {:#018x}",
            location.pc, location.bp
        )
    }
}

fn write_frame(out: &mut dyn Write, index: usize, pc: usize) -> io::Result<()> {
    match resolve(pc) {
        Some(Symbolized {
            object,
            object_base,
            symbol: Some((name, addr)),
        }) => writeln!(
            out,
            "    #{index} {pc:#x} in {}+{:#x} ({}+{:#x})",
            name.to_string_lossy(),
            pc.wrapping_sub(addr),
            object.to_string_lossy(),
            pc.wrapping_sub(object_base)
        ),
        Some(Symbolized {
            object,
            object_base,
            symbol: None,
        }) => writeln!(
            out,
            "    #{index} {pc:#x} ({}+{:#x})",
            object.to_string_lossy(),
            pc.wrapping_sub(object_base)
        ),
        None => writeln!(out, "    #{index} {pc:#x}"),
    }
}

struct Symbolized {
    object: &'static CStr,
    object_base: usize,
    symbol: Option<(&'static CStr, usize)>,
}

#[cfg(unix)]
fn resolve(pc: usize) -> Option<Symbolized> {
    // SAFETY: Dl_info is plain data; all-zero is a valid value.
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    // A return address can sit one past the end of a noreturn call's
    // function, so look up the call instruction instead.
    let addr = pc.saturating_sub(1) as *const c_void;
    // SAFETY: dladdr only reads loader tables and fills `info`.
    if unsafe { libc::dladdr(addr, &mut info) } == 0 || info.dli_fname.is_null() {
        return None;
    }
    // SAFETY: dladdr returns NUL-terminated strings owned by the loader,
    // valid while the object stays mapped. Objects on a live stack stay
    // mapped.
    let object = unsafe { CStr::from_ptr(info.dli_fname) };
    let symbol = if info.dli_sname.is_null() {
        None
    } else {
        // SAFETY: as above.
        Some((unsafe { CStr::from_ptr(info.dli_sname) }, info.dli_saddr as usize))
    };
    Some(Symbolized {
        object,
        object_base: info.dli_fbase as usize,
        symbol,
    })
}

#[cfg(not(unix))]
fn resolve(_pc: usize) -> Option<Symbolized> {
    None
}
