//! Response to a reported violation.
//!
//! The detector decides *whether* a violation happened; the action decides
//! what happens next. The set of actions is closed and selected through the
//! `violation_action` option.

#![allow(unsafe_code)]

use crate::config::Options;
use crate::report;

/// What the runtime does after reporting a violation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationAction {
    /// Terminate the process immediately.
    #[default]
    Exit,
    /// Return to the caller and let the unsafe call proceed.
    Continue,
    /// Block until a line is read from stdin, then continue.
    WaitForInput,
}

impl ViolationAction {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exit" | "die" => Some(Self::Exit),
            "continue" | "cont" => Some(Self::Continue),
            "wait" | "wait_for_input" => Some(Self::WaitForInput),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exit => "exit",
            Self::Continue => "continue",
            Self::WaitForInput => "wait",
        }
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::Exit => 0,
            Self::Continue => 1,
            Self::WaitForInput => 2,
        }
    }

    pub(crate) const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Continue,
            2 => Self::WaitForInput,
            _ => Self::Exit,
        }
    }

    /// Run the action. Returns only for non-terminating actions.
    pub fn invoke(self, opts: &Options) {
        match self {
            Self::Exit => die(opts),
            Self::Continue => {}
            Self::WaitForInput => {
                report::print_raw("Press enter to continue...\n");
                wait_for_newline();
            }
        }
    }
}

/// Terminate the process without running atexit handlers or destructors.
pub fn die(opts: &Options) -> ! {
    if opts.abort_on_error {
        // SAFETY: abort has no preconditions.
        unsafe { libc::abort() }
    }
    // SAFETY: _exit has no preconditions; skipping atexit handlers keeps the
    // termination path free of user code.
    unsafe { libc::_exit(opts.exitcode) }
}

fn wait_for_newline() {
    let mut byte = 0_u8;
    loop {
        // SAFETY: reading one byte into a valid stack location.
        let n = unsafe { libc::read(libc::STDIN_FILENO, (&raw mut byte).cast(), 1) };
        if n <= 0 || byte == b'\n' {
            return;
        }
    }
}
