//! Hand-off of finished runs to notification channels.

use derive_more::{Display, Error};

use crate::model::{BackupTask, BackupTaskLog};

/// A channel failed to deliver.
#[derive(Debug, Display, Error)]
#[display("Notification dispatch failed: {_0}")]
pub struct NotifyError(#[error(ignore)] pub String);

/// Informs interested channels about a finished run.
///
/// Whether the run succeeded is decided by [`BackupTaskLog::successful_at`],
/// never by the log text.
pub trait Notifier: Sync {
    fn notify(&self, task: &BackupTask, log: &BackupTaskLog) -> Result<(), NotifyError>;
}

/// Reports finished runs to the diagnostic log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, task: &BackupTask, log: &BackupTaskLog) -> Result<(), NotifyError> {
        match log.successful_at {
            Some(at) => log::info!(target: "notify", "Backup task {} succeeded at {at}", task.id),
            None => {
                let reason = log.output.lines().last().unwrap_or_default();
                log::warn!(target: "notify", "Backup task {} failed: {reason}", task.id)
            }
        }

        Ok(())
    }
}
