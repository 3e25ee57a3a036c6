//! Read-before-write bookkeeping shared by the file tools.
//!
//! `read_file` stamps a file with its size and modification time. `write_file`
//! refuses to overwrite a file whose stamp changed since then; `edit_file` also
//! refuses files that were never read. Both re-stamp after a successful write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

/// How strictly a write is checked against earlier reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRequirement {
    /// Unread files may be overwritten; changed files may not
    IfRead,
    /// The file must have been read, and not changed since
    Always,
}

#[derive(Debug, Default)]
pub struct FileTracker {
    stamps: Mutex<HashMap<PathBuf, Stamp>>,
}

impl FileTracker {
    /// Remember the current state of `path`.
    pub async fn record(&self, path: &Path) {
        let Some(stamp) = stamp(path).await else {
            return;
        };
        if let Ok(mut stamps) = self.stamps.lock() {
            stamps.insert(path.to_path_buf(), stamp);
        }
    }

    /// An error message if writing `path` now would clobber changes the agent
    /// has not seen. Missing files always pass.
    pub async fn check(&self, path: &Path, requirement: ReadRequirement) -> Option<String> {
        let current = stamp(path).await?;
        let recorded = self
            .stamps
            .lock()
            .ok()
            .and_then(|stamps| stamps.get(path).copied());

        match recorded {
            None if requirement == ReadRequirement::Always => Some(format!(
                "Error: You must read '{}' with read_file before editing it.",
                path.display()
            )),
            None => None,
            Some(recorded) if recorded != current => {
                debug!(path = %path.display(), "File changed since last read");
                Some(format!(
                    "Error: File '{}' has been modified since it was last read. \
                     Read the entire file again with read_file before changing it.",
                    path.display()
                ))
            }
            Some(_) => None,
        }
    }
}

async fn stamp(path: &Path) -> Option<Stamp> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.is_file().then(|| Stamp {
        modified: metadata.modified().ok(),
        len: metadata.len(),
    })
}
