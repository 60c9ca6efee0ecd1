//! Local terminal mode control.
//!
//! While a session is running, the local terminal is put into raw mode so
//! every keystroke (including the detach byte) reaches the container
//! unprocessed. [`TerminalController`] owns that mode switch and restores it
//! exactly once, whether the session finished normally, failed midway, or
//! unwound through a panic.

use crate::container::{Result, SandboxError};
use std::io::IsTerminal;
use tracing::{debug, warn};

/// Low-level terminal operations.
pub trait TerminalControl: Send {
    /// Whether local input is a real interactive terminal.
    fn is_interactive(&self) -> bool;

    /// Capture the current mode and switch to raw mode.
    fn enter_raw(&mut self) -> std::io::Result<()>;

    /// Restore the mode captured by [`enter_raw`](Self::enter_raw).
    fn restore(&mut self) -> std::io::Result<()>;
}

/// The process's standard input terminal.
///
/// crossterm keeps the original termios captured on entry and puts it back on
/// restore.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinTerminal;

impl TerminalControl for StdinTerminal {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    fn enter_raw(&mut self) -> std::io::Result<()> {
        crossterm::terminal::enable_raw_mode()
    }

    fn restore(&mut self) -> std::io::Result<()> {
        crossterm::terminal::disable_raw_mode()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Untouched,
    Raw,
    Restored,
}

/// Scoped owner of the terminal mode for one session.
pub struct TerminalController {
    terminal: Box<dyn TerminalControl>,
    mode: Mode,
}

impl TerminalController {
    /// Wrap a terminal. Nothing is changed until [`activate`](Self::activate).
    pub fn new(terminal: Box<dyn TerminalControl>) -> Self {
        Self {
            terminal,
            mode: Mode::Untouched,
        }
    }

    /// Whether local input is interactive.
    pub fn is_interactive(&self) -> bool {
        self.terminal.is_interactive()
    }

    /// Whether a previous mode is held and still needs restoring.
    pub fn is_raw(&self) -> bool {
        self.mode == Mode::Raw
    }

    /// Switch to raw mode if input is a terminal.
    ///
    /// Returns whether the mode was changed. Non-interactive input is left
    /// alone and later restores are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::TerminalModeFailed`] if raw mode cannot be set.
    pub fn activate(&mut self) -> Result<bool> {
        if self.mode != Mode::Untouched {
            return Ok(self.mode == Mode::Raw);
        }
        if !self.terminal.is_interactive() {
            debug!("Input is not a terminal, leaving mode unchanged");
            return Ok(false);
        }

        self.terminal
            .enter_raw()
            .map_err(|e| SandboxError::TerminalModeFailed(format!("enable raw mode: {}", e)))?;
        self.mode = Mode::Raw;
        debug!("Terminal switched to raw mode");
        Ok(true)
    }

    /// Restore the captured mode. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::TerminalModeFailed`] if the restore itself fails;
    /// it is not retried.
    pub fn restore(&mut self) -> Result<()> {
        if self.mode != Mode::Raw {
            return Ok(());
        }
        self.mode = Mode::Restored;
        self.terminal
            .restore()
            .map_err(|e| SandboxError::TerminalModeFailed(format!("restore mode: {}", e)))?;
        debug!("Terminal mode restored");
        Ok(())
    }
}

impl Drop for TerminalController {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("{}", e);
        }
    }
}
