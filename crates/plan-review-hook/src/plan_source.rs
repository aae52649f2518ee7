//! Plan text resolution: the event's own plan, else the newest plan file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

/// Most recently modified `*.md` file directly under `dir`.
pub fn latest_plan_file(dir: &Path) -> Option<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "plans directory unreadable");
            return None;
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "md"))
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, entry.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

/// Text of the newest plan file, if it is non-blank.
pub fn fallback_plan(dir: &Path) -> Option<String> {
    let path = latest_plan_file(dir)?;
    match fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => {
            debug!(path = %path.display(), "using fallback plan file");
            Some(text)
        }
        Ok(_) => None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "fallback plan unreadable");
            None
        }
    }
}
