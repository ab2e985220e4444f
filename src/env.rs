//! Session-scoped shell state and process-environment accessors.

use std::path::PathBuf;

/// Mutable shell-session state threaded through builtin and pipeline
/// execution.
///
/// Configuration (`HOME`, `PATH`, `HISTFILE`) is read from the process
/// environment on demand rather than copied, since this shell performs no
/// variable expansion of its own.
#[derive(Debug, Default)]
pub struct Environment {
    /// Exit status of the most recently executed command line.
    pub last_status: i32,
    /// Set when `exit` has been requested, carrying the exit code.
    pub pending_exit: Option<i32>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn home(&self) -> Option<String> {
        std::env::var("HOME").ok()
    }

    pub fn histfile(&self) -> Option<PathBuf> {
        std::env::var("HISTFILE").ok().map(PathBuf::from)
    }
}
