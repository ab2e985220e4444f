//! Command lookup over `PATH`: name resolution and completion enumeration.

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Resolves command names against a fixed list of search directories.
///
/// The directory list is captured once; both the executor (for launching
/// external commands) and the line editor (for TAB completion) consult the
/// same resolver.
pub struct PathResolver {
    dirs: Vec<PathBuf>,
}

impl PathResolver {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Split `PATH` on `:`, skipping empty entries.
    pub fn from_env() -> Self {
        let dirs = std::env::var("PATH")
            .unwrap_or_default()
            .split(':')
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();
        Self::new(dirs)
    }

    /// Resolve a command name to an executable path.
    ///
    /// A name containing `/` is taken as a direct path and returned iff it
    /// names an executable regular file. A bare name is searched for in the
    /// `PATH` directories in order; the first executable regular file wins.
    pub fn resolve(&self, cmd: &str) -> Option<PathBuf> {
        if cmd.is_empty() {
            return None;
        }
        if cmd.contains('/') {
            let path = Path::new(cmd);
            return is_executable_file(path).then(|| path.to_path_buf());
        }
        for dir in &self.dirs {
            let candidate = dir.join(cmd);
            if is_executable_file(&candidate) {
                tracing::debug!(cmd, path = %candidate.display(), "resolved command");
                return Some(candidate);
            }
        }
        None
    }

    /// Executable names starting with `prefix`, across all `PATH`
    /// directories, deduplicated with the first occurrence winning. The
    /// order is unspecified; callers sort for display.
    pub fn completions(&self, prefix: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for dir in &self.dirs {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(_) => continue,
                };
                if !name.starts_with(prefix) || seen.contains(&name) {
                    continue;
                }
                let file_type = match entry.file_type() {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                if !file_type.is_file() && !file_type.is_symlink() {
                    continue;
                }
                if !is_executable_file(&entry.path()) {
                    continue;
                }
                seen.insert(name.clone());
                names.push(name);
            }
        }
        names
    }
}

/// A regular file with any execute bit set. Symlinks are followed.
fn is_executable_file(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
