use std::path::Path;

use super::{newest_first, Destination, DestinationError, StoredFile};
use crate::remote::{CommandError, RemoteSession};
use crate::util::shell::{parent_dir, quote};

/// Stores artifacts in a directory of a storage server.
///
/// "Local" is meant from the storage server's perspective: every operation
/// goes through an SSH session to it.
pub struct LocalDestination {
    session: Box<dyn RemoteSession>,
    root: String,
    scope: Option<String>,
}

impl LocalDestination {
    pub fn new(session: Box<dyn RemoteSession>, root: &str, scope: Option<&str>) -> Self {
        Self {
            session,
            root: root.to_string(),
            scope: scope.map(str::to_string),
        }
    }

    fn directory(&self) -> String {
        normalize(&[self.root.as_str(), self.scope.as_deref().unwrap_or_default()])
    }

    /// Creates `dir` with `mkdir -p`. Losing a creation race against another
    /// run still counts as success.
    fn ensure_directory_exists(&self, dir: &str) -> Result<(), DestinationError> {
        let command = format!("mkdir -p {}", quote(dir));
        let output = self.session.execute(&command)?;
        if output.success() {
            return Ok(());
        }

        let name = dir.trim_end_matches('/').rsplit('/').next().unwrap_or(dir);
        let exists = self
            .session
            .list_dir(parent_dir(dir))
            .is_ok_and(|entries| entries.iter().any(|e| e.is_dir && e.file_name() == name));
        if exists {
            log::debug!(target: "destinations::local", "{dir} appeared concurrently");
            return Ok(());
        }

        Err(CommandError::Failed {
            command,
            status: output.exit_status,
            stderr: output.stderr.trim().to_string(),
        }
        .into())
    }
}

impl Destination for LocalDestination {
    fn list_files(&self, pattern: &str) -> Result<Vec<StoredFile>, DestinationError> {
        let dir = self.directory();
        let files = self
            .session
            .list_dir(&dir)?
            .into_iter()
            .filter(|entry| !entry.is_dir && entry.file_name().contains(pattern))
            .map(|entry| StoredFile {
                path: entry.path,
                modified: entry.modified,
            })
            .collect();
        log::trace!(target: "destinations::local", "Listed {dir} for {pattern}");

        Ok(newest_first(files))
    }

    fn delete_file(&self, path: &str) {
        if self.session.delete(path) {
            log::info!(target: "destinations::local", "Deleted {path}");
        } else {
            log::warn!(target: "destinations::local", "Failed to delete {path}");
        }
    }

    fn full_path(&self, file_name: &str, dest_sub_path: Option<&str>) -> String {
        normalize(&[self.root.as_str(), dest_sub_path.unwrap_or_default(), file_name])
    }

    fn store(&self, local_path: &Path, target: &str) -> Result<(), DestinationError> {
        self.ensure_directory_exists(parent_dir(target))?;

        if !self.session.upload(local_path, target) {
            return Err(DestinationError::Upload {
                target: target.to_string(),
            });
        }
        log::info!(target: "destinations::local", "Stored {target}");

        Ok(())
    }
}

/// Joins `parts` into an absolute path, collapsing `.`, `..` and repeated
/// separators. `..` never climbs above the root.
fn normalize(parts: &[&str]) -> String {
    let mut segments: Vec<&str> = vec![];
    for segment in parts.iter().flat_map(|part| part.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}
