//! Rolling retention of artifacts at a destination.

use crate::backends::{rotation_pattern, ArtifactKind};
use crate::destinations::{Destination, DestinationError};
use crate::model::TaskId;

/// Configure retention of a task's artifacts.
#[derive(Copy, Clone, Debug)]
pub struct RetentionConfig<'a> {
    pub task_id: TaskId,
    /// Number of newest artifacts to keep.
    pub keep: usize,
    pub kind: ArtifactKind,
    pub filename_prefix: Option<&'a str>,
}

/// Deletes every artifact of the task beyond the `keep` newest ones.
///
/// Only files named like the task's artifacts are considered, so a task
/// without prefix never rotates the artifacts of a prefixed one. Having
/// fewer than `keep` artifacts is not an error. Returns the number of
/// deleted artifacts.
pub fn rotate(destination: &dyn Destination, cfg: &RetentionConfig) -> Result<usize, DestinationError> {
    let pattern = rotation_pattern(cfg.task_id, cfg.filename_prefix);
    let extension = format!(".{}", cfg.kind.extension());

    // listings are newest first
    let outdated: Vec<_> = destination
        .list_files(&pattern)?
        .into_iter()
        .filter(|file| {
            let name = file.path.rsplit('/').next().unwrap_or(&file.path);
            name.starts_with(&pattern) && name.ends_with(&extension)
        })
        .skip(cfg.keep)
        .collect();

    for file in &outdated {
        log::debug!(target: "util::retention", "Rotating out {}", file.path);
        destination.delete_file(&file.path);
    }
    log::info!(target: "util::retention", "Removed {} old backup(s) of task {}", outdated.len(), cfg.task_id);

    Ok(outdated.len())
}
