//! Diagnostic output.
//!
//! Every line the runtime prints goes through here, under the process-wide
//! report lock, prefixed with `==<pid>==` like other sanitizer runtimes.
//! Reports are written to stderr.

#![allow(unsafe_code)]

use std::fmt;
use std::io::{self, Write};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, const_reentrant_mutex};

use crate::config::{ColorMode, options};
use crate::stack::{CallerLocation, print_stack_trace};

const TOOL_NAME: &str = "RealtimeSanitizer";

static REPORT_LOCK: ReentrantMutex<()> = const_reentrant_mutex(());

/// Exclusive access to the diagnostic stream for the duration of one report.
///
/// Reentrant: a thread already holding the lock (for example a warning issued
/// while a report is in progress) does not deadlock.
pub struct ScopedErrorReportLock {
    _guard: ReentrantMutexGuard<'static, ()>,
}

impl ScopedErrorReportLock {
    #[must_use]
    pub fn acquire() -> Self {
        Self {
            _guard: REPORT_LOCK.lock(),
        }
    }
}

/// ANSI markup for report text. Every method returns `""` when disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decorator {
    enabled: bool,
}

impl Decorator {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Decorator for stderr under the given color mode.
    #[must_use]
    pub fn for_stderr(color: ColorMode) -> Self {
        // SAFETY: isatty has no memory-safety preconditions.
        let is_tty = unsafe { libc::isatty(libc::STDERR_FILENO) } == 1;
        Self::new(color.enabled(is_tty))
    }

    fn pick(&self, code: &'static str) -> &'static str {
        if self.enabled { code } else { "" }
    }

    pub fn error(&self) -> &'static str {
        self.pick("\x1b[1m\x1b[31m")
    }

    pub fn warning(&self) -> &'static str {
        self.pick("\x1b[1m\x1b[35m")
    }

    pub fn reason(&self) -> &'static str {
        self.pick("\x1b[1m\x1b[34m")
    }

    pub fn function_name(&self) -> &'static str {
        self.pick("\x1b[1m\x1b[32m")
    }

    /// Clears every attribute set by the other methods.
    pub fn reset(&self) -> &'static str {
        self.pick("\x1b[0m")
    }
}

/// Render the violation header for `function_name`.
pub fn render_violation(
    out: &mut dyn Write,
    pid: u32,
    function_name: &str,
    d: &Decorator,
) -> io::Result<()> {
    write!(out, "{}", d.error())?;
    writeln!(out, "=={pid}==ERROR: {TOOL_NAME}: unsafe-library-call")?;
    write!(out, "{}", d.reason())?;
    writeln!(
        out,
        "Intercepted call to real-time unsafe function `{}{}{}` in real-time context!",
        d.function_name(),
        function_name,
        d.reason()
    )?;
    write!(out, "{}", d.reset())
}

/// Print a full violation report (header and stack trace) to stderr.
pub fn print_diagnostics(function_name: &str, location: CallerLocation) {
    let _lock = ScopedErrorReportLock::acquire();
    let d = Decorator::for_stderr(options().color);
    let mut err = io::stderr().lock();
    // A failed write to stderr leaves nothing better to do than carry on
    // with the configured action.
    let _ = render_violation(&mut err, std::process::id(), function_name, &d)
        .and_then(|()| print_stack_trace(&mut err, location))
        .and_then(|()| err.flush());
}

/// Fixed-capacity line buffer. Text past the capacity is dropped.
struct LineBuf {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
}

const LINE_CAPACITY: usize = 512;

impl LineBuf {
    const fn new() -> Self {
        Self {
            bytes: [0; LINE_CAPACITY],
            len: 0,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl Write for LineBuf {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = data.len().min(LINE_CAPACITY - self.len);
        self.bytes[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Write all of `bytes` to fd 2 without going through `std::io::stderr`.
fn write_fd2(mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: the pointer and length describe a live slice.
        let n = unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len()) };
        if n > 0 {
            bytes = &bytes[n.unsigned_abs().min(bytes.len())..];
        } else if n < 0 && io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
            continue;
        } else {
            return;
        }
    }
}

// Formats on the stack and writes with write(2): these lines are also
// printed from thread-exit destructors, where std's stderr may be gone.
fn print_line(level: &str, args: fmt::Arguments<'_>) {
    let _lock = ScopedErrorReportLock::acquire();
    let d = Decorator::for_stderr(options().color);
    let color = if level == "WARNING" { d.warning() } else { "" };
    let reset = if color.is_empty() { "" } else { d.reset() };
    let mut line = LineBuf::new();
    let _ = write!(
        line,
        "{color}=={}=={level}: {TOOL_NAME}: {args}{reset}",
        std::process::id()
    );
    if line.len == LINE_CAPACITY {
        line.len -= 1;
    }
    let _ = line.write(b"\n");
    write_fd2(line.as_bytes());
}

/// Print a `WARNING` line.
pub fn warn(args: fmt::Arguments<'_>) {
    print_line("WARNING", args);
}

/// Print an `INFO` line when `verbosity >= level`.
pub fn info(level: u8, args: fmt::Arguments<'_>) {
    if options().verbosity >= level {
        print_line("INFO", args);
    }
}

/// Print text verbatim.
pub fn print_raw(text: &str) {
    let _lock = ScopedErrorReportLock::acquire();
    let mut err = io::stderr().lock();
    let _ = err.write_all(text.as_bytes()).and_then(|()| err.flush());
}

/// Report a broken internal invariant and abort.
#[cold]
pub fn check_failed(file: &str, line: u32, condition: &str) -> ! {
    {
        let _lock = ScopedErrorReportLock::acquire();
        let _ = writeln!(
            io::stderr().lock(),
            "=={}==CHECK failed: {file}:{line} \"({condition})\"",
            std::process::id()
        );
    }
    // SAFETY: abort has no preconditions.
    unsafe { libc::abort() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_report_text() {
        let mut out = Vec::new();
        render_violation(&mut out, 42, "malloc", &Decorator::new(false)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "==42==ERROR: RealtimeSanitizer: unsafe-library-call\n\
             Intercepted call to real-time unsafe function `malloc` in real-time context!\n"
        );
    }

    #[test]
    fn colored_report_wraps_function_name() {
        let mut out = Vec::new();
        let d = Decorator::new(true);
        render_violation(&mut out, 7, "pthread_mutex_lock", &d).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(d.error()));
        assert!(text.contains(&format!(
            "`{}pthread_mutex_lock{}`",
            d.function_name(),
            d.reason()
        )));
        assert!(text.ends_with(d.reset()));
    }

    #[test]
    fn disabled_decorator_is_empty() {
        let d = Decorator::new(false);
        assert_eq!(d.error(), "");
        assert_eq!(d.warning(), "");
        assert_eq!(d.reason(), "");
        assert_eq!(d.function_name(), "");
        assert_eq!(d.reset(), "");
    }

    #[test]
    fn reset_is_a_bare_sgr_reset() {
        assert_eq!(Decorator::new(true).reset(), "\x1b[0m");
    }

    #[test]
    fn line_buffer_truncates_at_capacity() {
        let mut line = LineBuf::new();
        let long = "x".repeat(LINE_CAPACITY + 10);
        assert_eq!(line.write(long.as_bytes()).unwrap(), long.len());
        assert_eq!(line.as_bytes().len(), LINE_CAPACITY);

        let mut short = LineBuf::new();
        write!(short, "=={}==INFO: {}", 1, "ok").unwrap();
        assert_eq!(short.as_bytes(), b"==1==INFO: ok");
    }

    #[test]
    fn report_lock_is_reentrant() {
        let _outer = ScopedErrorReportLock::acquire();
        let _inner = ScopedErrorReportLock::acquire();
    }

    #[test]
    fn report_lock_serializes_threads() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let inside = Arc::clone(&inside);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let _lock = ScopedErrorReportLock::acquire();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
