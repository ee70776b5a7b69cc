//! Persistence of tasks, servers, destinations and run logs.

mod json;

pub use json::{JsonStore, StoreState};

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};

use crate::model::{
    BackupTaskData, BackupTaskLog, Connectivity, LogId, RemoteServer, ServerId, TaskContext,
    TaskId, TaskStatus,
};

#[derive(Debug, Display, Error, From)]
/// Errors of a [TaskStore].
pub enum StoreError {
    #[display("Backup task {_0} not found")]
    TaskNotFound(#[error(ignore)] TaskId),
    #[display("Remote server {_0} not found")]
    ServerNotFound(#[error(ignore)] ServerId),
    #[display("Backup destination {_0} not found")]
    DestinationNotFound(#[error(ignore)] u64),
    #[display("User {_0} not found")]
    UserNotFound(#[error(ignore)] u64),
    #[display("Backup task log {_0} not found")]
    LogNotFound(#[error(ignore)] LogId),
    /// Reading or writing the state file failed.
    #[display("Accessing {} failed: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    /// The state file is not valid.
    #[from]
    Serde(serde_json::Error),
}

/// Storage the engine reads its tasks from and records runs in.
pub trait TaskStore: Sync {
    /// The task with its server, destination and owner.
    fn load_task(&self, id: TaskId) -> Result<TaskContext, StoreError>;

    fn load_server(&self, id: ServerId) -> Result<RemoteServer, StoreError>;

    /// Creates the log record of a new run.
    fn create_log(&self, task_id: TaskId, at: DateTime<Utc>) -> Result<BackupTaskLog, StoreError>;

    /// Replaces the stored log record.
    fn update_log(&self, log: &BackupTaskLog) -> Result<(), StoreError>;

    /// Sets the status and stamps the time of the change.
    fn set_task_status(&self, id: TaskId, status: TaskStatus, at: DateTime<Utc>) -> Result<(), StoreError>;

    fn touch_last_run(&self, id: TaskId, at: DateTime<Utc>) -> Result<(), StoreError>;

    fn record_connectivity(
        &self,
        server_id: ServerId,
        status: Connectivity,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    fn record_metrics(&self, data: BackupTaskData) -> Result<(), StoreError>;
}
