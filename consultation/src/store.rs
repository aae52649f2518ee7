//! Flat per-session state files.
//!
//! One directory holds every session's counter and approval marker. Writes go
//! to a sibling temp file and are renamed over the target, so a concurrent
//! reader sees either the old or the new record (last writer wins).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Root directory of per-session state.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the state file `<session>.<kind>`.
    pub fn file(&self, session_id: &str, kind: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", session_file_stem(session_id), kind))
    }

    /// Read a state file. Missing or unreadable files read as `None`.
    pub fn read(&self, path: &Path) -> Option<String> {
        match fs::read_to_string(path) {
            Ok(s) => Some(s),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %path.display(), error = %e, "state file unreadable");
                }
                None
            }
        }
    }

    /// Replace a state file's contents via temp file + rename.
    pub fn write(&self, path: &Path, contents: &str) -> StoreResult<()> {
        let write_err = |source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.root).map_err(write_err)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".tmp.{}", std::process::id()));
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, contents).map_err(write_err)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        Ok(())
    }

    /// Delete a state file. Deleting a missing file is not an error.
    pub fn remove(&self, path: &Path) -> StoreResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Remove {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Map a caller-supplied session id onto a file stem.
///
/// `[A-Za-z0-9_-]` pass through and every other byte is written as `%XX`.
/// The mapping is injective, so distinct ids never share state files, and
/// ids like `../x` stay inside the state directory.
pub fn session_file_stem(session_id: &str) -> String {
    let mut stem = String::with_capacity(session_id.len());
    for b in session_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            stem.push(char::from(b));
        } else {
            stem.push_str(&format!("%{b:02X}"));
        }
    }
    stem
}
