//! The command history list and its file persistence.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// Ordered list of submitted command lines, oldest first.
///
/// `appended` marks how many leading entries have already been written by an
/// append operation, so `history -a` only emits what accumulated since the
/// last one.
pub struct History {
    entries: Vec<String>,
    appended: usize,
}

impl History {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            appended: 0,
        }
    }

    /// Record a submitted line. Trailing whitespace is trimmed; empty lines
    /// and exact duplicates of the immediately previous entry are skipped.
    pub fn push(&mut self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }
        if self.entries.last().map(String::as_str) == Some(line) {
            return;
        }
        self.entries.push(line.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Merge entries from a file into the list. A missing file is not an
    /// error; blank lines are ignored. Loaded entries count as already
    /// appended.
    pub fn load(&mut self, path: &Path) -> io::Result<()> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        let mut added = 0usize;
        for line in text.split('\n') {
            if line.is_empty() {
                continue;
            }
            self.entries.push(line.to_string());
            added += 1;
        }
        self.appended = self.entries.len();
        tracing::debug!(path = %path.display(), added, "loaded history file");
        Ok(())
    }

    /// Rewrite the file with the full list, one entry per line.
    pub fn write(&mut self, path: &Path) -> io::Result<()> {
        let mut file = File::create(path)?;
        for entry in &self.entries {
            writeln!(file, "{entry}")?;
        }
        self.appended = self.entries.len();
        tracing::debug!(path = %path.display(), count = self.entries.len(), "wrote history file");
        Ok(())
    }

    /// Append the entries accumulated since the previous append.
    pub fn append(&mut self, path: &Path) -> io::Result<()> {
        let fresh = &self.entries[self.appended.min(self.entries.len())..];
        if !fresh.is_empty() {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            for entry in fresh {
                writeln!(file, "{entry}")?;
            }
        }
        self.appended = self.entries.len();
        Ok(())
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}
