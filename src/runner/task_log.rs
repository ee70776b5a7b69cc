use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::backends::Progress;
use crate::model::{BackupTaskLog, TaskId};
use crate::store::{StoreError, TaskStore};

/// Append-only output of a run, persisted after every line.
pub struct TaskLog<'a> {
    record: BackupTaskLog,
    store: &'a dyn TaskStore,
    timezone: Tz,
}

impl<'a> TaskLog<'a> {
    /// Creates the log record of a new run of `task_id`.
    ///
    /// Lines are timestamped in `timezone`, unknown names fall back to UTC.
    pub fn start(store: &'a dyn TaskStore, task_id: TaskId, timezone: &str) -> Result<Self, StoreError> {
        let timezone = timezone.parse().unwrap_or_else(|_| {
            log::warn!(target: "runner", "Unknown timezone {timezone:?}, using UTC");
            Tz::UTC
        });
        let record = store.create_log(task_id, Utc::now())?;

        Ok(Self {
            record,
            store,
            timezone,
        })
    }

    pub fn append(&mut self, message: &str) {
        let line = format_line(Utc::now(), self.timezone, message);
        if !self.record.output.is_empty() {
            self.record.output.push('\n');
        }
        self.record.output.push_str(&line);
        self.flush();
    }

    pub fn mark_successful(&mut self, at: DateTime<Utc>) {
        self.record.successful_at = Some(at);
    }

    /// Stamps `finished_at`, persists and returns the final record.
    pub fn finish(mut self, at: DateTime<Utc>) -> BackupTaskLog {
        self.record.finished_at = Some(at);
        self.flush();
        self.record
    }

    fn flush(&self) {
        if let Err(e) = self.store.update_log(&self.record) {
            log::warn!(target: "runner", "Persisting log {} failed: {e}", self.record.id);
        }
    }
}

impl Progress for TaskLog<'_> {
    fn step(&mut self, message: &str) {
        self.append(message);
    }
}

/// `[DD-MM-YYYY HH:MM:SS] message` with the time rendered in `timezone`.
pub fn format_line(at: DateTime<Utc>, timezone: Tz, message: &str) -> String {
    format!(
        "[{}] {message}",
        at.with_timezone(&timezone).format("%d-%m-%Y %H:%M:%S")
    )
}
