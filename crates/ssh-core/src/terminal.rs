use std::{env, io};

use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size as term_size};
use russh::Pty;
use tracing::warn;

/// Terminal type requested when `TERM` is unset or empty.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Line speed advertised for the remote PTY.
pub const PTY_SPEED: u32 = 14400;

/// Fallback window size when the local terminal cannot be queried.
pub const DEFAULT_SIZE: (u16, u16) = (80, 24);

/// Terminal type to request for the remote PTY, taken from `TERM`.
pub fn term_type_from_env() -> String {
    term_type(env::var("TERM").ok())
}

pub fn term_type(value: Option<String>) -> String {
    value.filter(|v| !v.trim().is_empty()).unwrap_or_else(|| DEFAULT_TERM.to_string())
}

/// Line discipline for the remote PTY: echo on, fixed line speed.
pub fn session_pty_modes() -> Vec<(Pty, u32)> {
    vec![
        (Pty::ECHO, 1),
        (Pty::TTY_OP_ISPEED, PTY_SPEED),
        (Pty::TTY_OP_OSPEED, PTY_SPEED),
    ]
}

/// The local terminal whose mode is switched for the duration of a session.
pub trait RawTerminal: Send + Sync {
    fn enable_raw(&self) -> io::Result<()>;
    fn restore(&self) -> io::Result<()>;
    /// Current `(cols, rows)`.
    fn size(&self) -> io::Result<(u16, u16)>;
}

/// The controlling terminal of this process.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessTerminal;

impl RawTerminal for ProcessTerminal {
    fn enable_raw(&self) -> io::Result<()> {
        enable_raw_mode()
    }

    fn restore(&self) -> io::Result<()> {
        disable_raw_mode()
    }

    fn size(&self) -> io::Result<(u16, u16)> {
        term_size()
    }
}

/// Keeps the terminal in raw mode until dropped.
///
/// Restoration runs in `Drop`, so it also happens on early returns, errors,
/// panic unwinding and when the owning future is dropped on cancellation.
pub struct RawModeGuard<'a> {
    terminal: &'a dyn RawTerminal,
}

impl<'a> RawModeGuard<'a> {
    pub fn activate(terminal: &'a dyn RawTerminal) -> io::Result<Self> {
        terminal.enable_raw()?;
        Ok(Self { terminal })
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.terminal.restore() {
            warn!(?err, "failed to restore terminal mode");
        }
    }
}
