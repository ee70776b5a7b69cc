//! Implements backup of a remote directory using [FilesBackup].

use derive_more::{Display, Error, From};

use super::{ArtifactKind, Backup, BackupError, Progress};
use crate::remote::{CommandError, Diagnostics, DiagnosticsError, RemoteSession};
use crate::remote::diagnostics::HEAVY_SUBDIRECTORIES;
use crate::util::shell::{parent_dir, quote};

/// Largest directory that is archived: 50 GiB.
pub const DEFAULT_SIZE_LIMIT: u64 = 50 * 1024 * 1024 * 1024;

#[derive(Debug, Display, Error, From)]
/// Errors on archiving a remote directory.
pub enum ArchiveError {
    #[display("Directory size of {size} bytes exceeds the limit of {limit} bytes.")]
    SizeLimitExceeded { size: u64, limit: u64 },
    #[display("Not enough free space in {dir}: {required} bytes required, {available} bytes available.")]
    InsufficientSpace {
        dir: String,
        required: u64,
        available: u64,
    },
    /// The archive is missing or empty after the compress command ran.
    #[display("Failed to create the archive. Output: {output}")]
    ProductionFailed { output: String },
    #[from]
    Diagnostics(DiagnosticsError),
    #[from]
    Command(CommandError),
}

/// Builds zip archives of remote directories.
#[derive(Debug, Clone, Copy)]
pub struct Archiver {
    size_limit: u64,
}

impl Default for Archiver {
    fn default() -> Self {
        Self::with_size_limit(DEFAULT_SIZE_LIMIT)
    }
}

impl Archiver {
    pub fn with_size_limit(size_limit: u64) -> Self {
        Self { size_limit }
    }

    /// Checks that `source` is below the size limit and fits into the
    /// directory `archive_path` will be written to. Returns the source size.
    pub fn preflight(
        &self,
        session: &dyn RemoteSession,
        source: &str,
        archive_path: &str,
    ) -> Result<u64, ArchiveError> {
        let diagnostics = Diagnostics::new(session);

        let size = diagnostics.directory_size(source)?;
        if size > self.size_limit {
            return Err(ArchiveError::SizeLimitExceeded {
                size,
                limit: self.size_limit,
            });
        }

        // the archive can't be larger than its uncompressed input
        let dir = parent_dir(archive_path);
        let available = diagnostics.free_space(dir)?;
        if size > available {
            return Err(ArchiveError::InsufficientSpace {
                dir: dir.to_string(),
                required: size,
                available,
            });
        }

        Ok(size)
    }

    /// Zips the content of `source` into `archive_path`, leaving out the
    /// `exclude` subdirectories.
    ///
    /// The command output is only logged. Success is decided by the archive
    /// existing with a nonzero size afterwards.
    pub fn archive(
        &self,
        session: &dyn RemoteSession,
        source: &str,
        archive_path: &str,
        exclude: &[&str],
    ) -> Result<u64, ArchiveError> {
        let command = Self::zip_command(source, archive_path, exclude);
        log::debug!(target: "backends::archive", "Running: {command}");

        let output = session.execute(&command)?;
        let output = output.combined();
        for line in output.lines() {
            log::trace!(target: "backends::archive", "zip: {line}");
        }

        match session.stat(archive_path) {
            Some(info) if info.size > 0 => {
                log::info!(target: "backends::archive", "Created archive {archive_path} ({} bytes)", info.size);
                Ok(info.size)
            }
            _ => Err(ArchiveError::ProductionFailed { output }),
        }
    }

    fn zip_command(source: &str, archive_path: &str, exclude: &[&str]) -> String {
        let mut command = format!(
            "cd {} && zip -r -q {} .",
            quote(source),
            quote(archive_path)
        );
        for dir in exclude {
            let dir = dir.trim_matches('/');
            command.push_str(&format!(" -x {} {}", quote(&format!("{dir}/*")), quote(dir)));
        }

        command
    }
}

/// The [FilesBackup] backend archives a directory of the remote server.
#[derive(Debug, Clone)]
pub struct FilesBackup {
    pub source_path: String,
    pub archiver: Archiver,
}

impl Backup for FilesBackup {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Files
    }

    fn backup(
        &self,
        session: &dyn RemoteSession,
        artifact_path: &str,
        progress: &mut dyn Progress,
    ) -> Result<(), BackupError> {
        let diagnostics = Diagnostics::new(session);
        let source = self.source_path.as_str();

        if !diagnostics.path_exists(source) {
            return Err(BackupError::SourcePathMissing(source.to_string()));
        }
        progress.step(&format!("Source path {source} exists."));

        let size = self.archiver.preflight(session, source, artifact_path)?;
        progress.step(&format!("Directory size: {}.", human_size(size)));

        let exclude: &[&str] = if diagnostics.is_conventional_project_layout(source) {
            progress.step(&format!(
                "Detected a Laravel project, excluding {}.",
                HEAVY_SUBDIRECTORIES.join(" and ")
            ));
            &HEAVY_SUBDIRECTORIES
        } else {
            &[]
        };

        progress.step("Creating the archive on the remote server.");
        let archive_size = self
            .archiver
            .archive(session, source, artifact_path, exclude)?;
        progress.step(&format!("Archive created ({}).", human_size(archive_size)));

        Ok(())
    }
}

/// Formats a byte count with binary units.
pub(crate) fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
