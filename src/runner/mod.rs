//! Runs one backup task end to end.
//!
//! A run moves through `Initializing -> Running -> {Succeeded, Failed} ->
//! Finalized`. Finalization always happens: the log is closed, the task is
//! set back to `ready`, notification channels are informed and metrics are
//! recorded. Errors never escape [`TaskRunner::handle`], they end up in the
//! run's log.

mod task_log;

pub use task_log::{format_line, TaskLog};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use chrono::Utc;
use derive_more::Display;

use crate::backends::{
    artifact_name, Archiver, Backup, BackupError, DatabaseBackup, FilesBackup,
};
use crate::config::EngineConfig;
use crate::destinations::DestinationFactory;
use crate::model::{BackupSource, BackupTaskData, Connectivity, TaskContext, TaskId, TaskStatus};
use crate::notify::Notifier;
use crate::remote::{ConnectionTarget, RemoteSession, SessionFactory};
use crate::store::TaskStore;
use crate::util::retention::{self, RetentionConfig};

/// Collaborators of a run.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub store: &'a dyn TaskStore,
    pub sessions: &'a dyn SessionFactory,
    pub destinations: &'a dyn DestinationFactory,
    pub notifier: &'a dyn Notifier,
    pub config: &'a EngineConfig,
}

/// Phase of a run.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Running,
    Succeeded,
    Failed,
    Finalized,
}

/// Executes a single run of a task. Construct one per run: the recorded
/// duration starts at construction.
pub struct TaskRunner<'a> {
    services: Services<'a>,
    started: Instant,
    state: RunState,
}

impl<'a> TaskRunner<'a> {
    pub fn new(services: Services<'a>) -> Self {
        Self {
            services,
            started: Instant::now(),
            state: RunState::Initializing,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, state: RunState) {
        log::debug!(target: "runner", "{} -> {state}", self.state);
        self.state = state;
    }

    /// Runs the task `task_id`. Never fails: the outcome is recorded in the
    /// run's log and `successful_at`.
    pub fn handle(mut self, task_id: TaskId) -> RunState {
        let store = self.services.store;

        let ctx = match store.load_task(task_id) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::error!(target: "runner", "Loading backup task {task_id} failed: {e}");
                return self.state;
            }
        };
        let mut log = match TaskLog::start(store, task_id, &ctx.owner.timezone) {
            Ok(log) => log,
            Err(e) => {
                log::error!(target: "runner", "Creating the log of backup task {task_id} failed: {e}");
                return self.state;
            }
        };
        if let Err(e) = store.set_task_status(task_id, TaskStatus::Running, Utc::now()) {
            log::warn!(target: "runner", "Marking backup task {task_id} as running failed: {e}");
        }
        log.append("Backup task started.");
        self.transition(RunState::Running);

        let mut artifact_size = None;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run(&ctx, &mut log, &mut artifact_size)
        }))
        .unwrap_or_else(|payload| Err(BackupError::Unexpected(panic_message(payload))));

        match result {
            Ok(()) => {
                self.transition(RunState::Succeeded);
                log.append("Backup task finished successfully.");
                log.mark_successful(Utc::now());
            }
            Err(e) => {
                self.transition(RunState::Failed);
                log::error!(target: "runner", "Backup task {task_id} failed: {e}");
                log.append(&format!("Error in backup process: {e}"));
            }
        }

        self.finalize(&ctx, log, artifact_size);
        self.state
    }

    fn run(
        &self,
        ctx: &TaskContext,
        log: &mut TaskLog,
        artifact_size: &mut Option<u64>,
    ) -> Result<(), BackupError> {
        let Services { config, .. } = self.services;
        let task = &ctx.task;

        let backup: Box<dyn Backup> = match &task.source {
            BackupSource::Files { source_path } => Box::new(FilesBackup {
                source_path: source_path.clone(),
                archiver: Archiver::with_size_limit(config.size_limit_bytes),
            }),
            BackupSource::Database {
                database_name,
                excluded_tables,
            } => {
                // checked before paying for a connection
                let password = ctx
                    .server
                    .database_password
                    .clone()
                    .filter(|password| !password.is_empty())
                    .ok_or(BackupError::MissingDatabasePassword)?;

                Box::new(DatabaseBackup {
                    database_name: database_name.clone(),
                    excluded_tables: excluded_tables.clone(),
                    user: ctx.server.database_user().to_string(),
                    password,
                })
            }
        };

        let session = self.connect(ctx, log)?;
        let destination = self
            .services
            .destinations
            .open(&ctx.destination, task.store_path.as_deref())?;

        let file_name = artifact_name(
            task.id,
            task.filename_prefix.as_deref(),
            backup.kind(),
            Utc::now(),
        );
        let remote_path = format!("{}/{file_name}", config.remote_temp_dir.trim_end_matches('/'));

        backup.backup(session.as_ref(), &remote_path, log)?;
        *artifact_size = session.stat(&remote_path).map(|info| info.size);

        log.append("Uploading the backup to the destination.");
        let uploaded = destination.stream_files(
            session.as_ref(),
            &remote_path,
            &file_name,
            task.store_path.as_deref(),
            &config.retry,
        );
        if !uploaded {
            remove_remote_artifact(session.as_ref(), &remote_path, log);
            return Err(BackupError::UploadFailed { file_name });
        }
        log.append(&format!("Backup uploaded as {file_name}."));

        if let Some(keep) = task.rotation() {
            let cfg = RetentionConfig {
                task_id: task.id,
                keep,
                kind: backup.kind(),
                filename_prefix: task.filename_prefix.as_deref(),
            };
            match retention::rotate(destination.as_ref(), &cfg) {
                Ok(0) => {}
                Ok(deleted) => log.append(&format!("Removed {deleted} old backup(s).")),
                Err(e) => log.append(&format!("Rotating old backups failed: {e}")),
            }
        }

        remove_remote_artifact(session.as_ref(), &remote_path, log);
        Ok(())
    }

    fn connect(
        &self,
        ctx: &TaskContext,
        log: &mut TaskLog,
    ) -> Result<Box<dyn RemoteSession>, BackupError> {
        let Services {
            store,
            sessions,
            config,
            ..
        } = self.services;
        let server = &ctx.server;

        log.append(&format!("Connecting to {}.", server.host));
        let target = ConnectionTarget::resolve(
            server,
            ctx.task.ssh_auth.as_ref(),
            config.ssh.auth().as_ref(),
            config.connect_timeout(),
        )?;

        let (result, connectivity) = match sessions.connect(&target) {
            Ok(session) => (Ok(session), Connectivity::Online),
            Err(e) => (Err(e.into()), Connectivity::Offline),
        };
        if let Err(e) = store.record_connectivity(server.id, connectivity, Utc::now()) {
            log::warn!(target: "runner", "Recording connectivity of {} failed: {e}", server.host);
        }
        if result.is_ok() {
            log.append("Connection established.");
        }

        result
    }

    fn finalize(&mut self, ctx: &TaskContext, log: TaskLog, artifact_size: Option<u64>) {
        let Services {
            store, notifier, ..
        } = self.services;
        let task_id = ctx.task.id;
        let now = Utc::now();

        let record = log.finish(now);
        if let Err(e) = store.set_task_status(task_id, TaskStatus::Ready, now) {
            log::error!(target: "runner", "Resetting backup task {task_id} to ready failed: {e}");
        }
        self.transition(RunState::Finalized);

        if let Err(e) = notifier.notify(&ctx.task, &record) {
            log::warn!(target: "runner", "{e}");
        }
        if let Err(e) = store.touch_last_run(task_id, now) {
            log::warn!(target: "runner", "Updating last run of backup task {task_id} failed: {e}");
        }

        let data = BackupTaskData {
            task_id,
            duration_seconds: self.started.elapsed().as_secs_f64(),
            size_bytes: artifact_size,
            recorded_at: Utc::now(),
        };
        log::info!(
            target: "runner",
            "Backup task {task_id} finalized after {:.1}s",
            data.duration_seconds
        );
        if let Err(e) = store.record_metrics(data) {
            log::warn!(target: "runner", "Recording metrics of backup task {task_id} failed: {e}");
        }
    }
}

/// Best effort removal of the artifact from the source server.
fn remove_remote_artifact(session: &dyn RemoteSession, remote_path: &str, log: &mut TaskLog) {
    if session.delete(remote_path) {
        log.append("Removed the temporary backup file from the remote server.");
    } else {
        log.append(&format!("Could not remove the temporary backup file {remote_path}."));
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic without message".to_string())
}
