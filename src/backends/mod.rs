//! Backends producing the artifact of a run on the remote server.
//!
//! Currently the following backends are implemented:
//!
//! - [FilesBackup]: Zip archive of a remote directory.
//! - [DatabaseBackup]: SQL dump of a MySQL or PostgreSQL database.

pub mod archive;
pub mod database;

pub use archive::{ArchiveError, Archiver, FilesBackup};
pub use database::{DatabaseBackup, DumpCommand, DumpError};

use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};

use crate::destinations::DestinationError;
use crate::model::TaskId;
use crate::remote::{ConnectionError, DiagnosticsError, RemoteSession};
use crate::store::StoreError;
use crate::util::secret::UnresolvedSecret;

/// Receives user visible progress lines of a run.
pub trait Progress {
    fn step(&mut self, message: &str);
}

/// Generic backup backend.
pub trait Backup {
    /// Kind of artifact the backend produces.
    fn kind(&self) -> ArtifactKind;

    /// Produces the artifact at `artifact_path` on the remote server.
    ///
    /// On error the artifact may partially exist and is left in place for
    /// inspection.
    fn backup(
        &self,
        session: &dyn RemoteSession,
        artifact_path: &str,
        progress: &mut dyn Progress,
    ) -> Result<(), BackupError>;
}

#[derive(Debug, Display, Error, From)]
/// Errors ending a run.
pub enum BackupError {
    /// The source server could not be reached or rejected the credentials.
    #[from]
    Connection(ConnectionError),
    #[display("The source path {_0} does not exist on the remote server.")]
    SourcePathMissing(#[error(ignore)] String),
    #[display("Please provide a database password for the remote server.")]
    MissingDatabasePassword,
    #[from]
    Diagnostics(DiagnosticsError),
    #[from]
    Archive(ArchiveError),
    #[from]
    Dump(DumpError),
    /// Every upload attempt failed.
    #[display("Failed to upload {file_name} to the backup destination.")]
    UploadFailed { file_name: String },
    #[from]
    Destination(DestinationError),
    #[from]
    Store(StoreError),
    #[from]
    Secret(UnresolvedSecret),
    /// A panic caught at the runner boundary.
    #[display("Unexpected error: {_0}")]
    Unexpected(#[error(ignore)] String),
}

/// Kind of artifact, determines the file extension.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum ArtifactKind {
    #[display("files")]
    Files,
    #[display("database")]
    Database,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Files => "zip",
            Self::Database => "sql",
        }
    }
}

/// Name of an artifact: `[prefix_]backup_{task}_{YYYYMMDDHHMMSS}.{ext}`.
pub fn artifact_name(
    task_id: TaskId,
    prefix: Option<&str>,
    kind: ArtifactKind,
    at: DateTime<Utc>,
) -> String {
    format!(
        "{}{}.{}",
        rotation_pattern(task_id, prefix),
        at.format("%Y%m%d%H%M%S"),
        kind.extension()
    )
}

/// Common leading part of every artifact name of a task.
pub fn rotation_pattern(task_id: TaskId, prefix: Option<&str>) -> String {
    match prefix.map(str::trim).filter(|prefix| !prefix.is_empty()) {
        Some(prefix) => format!("{prefix}_backup_{task_id}_"),
        None => format!("backup_{task_id}_"),
    }
}
