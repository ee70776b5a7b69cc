use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{StoreError, TaskStore};
use crate::model::{
    BackupDestination, BackupTask, BackupTaskData, BackupTaskLog, Connectivity, LogId,
    RemoteServer, ServerId, TaskContext, TaskId, TaskStatus, User,
};

/// Everything a [JsonStore] holds.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub servers: Vec<RemoteServer>,
    #[serde(default)]
    pub destinations: Vec<BackupDestination>,
    #[serde(default)]
    pub tasks: Vec<BackupTask>,
    #[serde(default)]
    pub logs: Vec<BackupTaskLog>,
    #[serde(default)]
    pub metrics: Vec<BackupTaskData>,
}

/// A [TaskStore] keeping its state in a JSON document.
///
/// A file backed store writes the document after every change, so a
/// running backup's log can be followed from the outside.
#[derive(Debug)]
pub struct JsonStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl JsonStore {
    pub fn in_memory(state: StoreState) -> Self {
        Self {
            path: None,
            state: Mutex::new(state),
        }
    }

    /// Opens the state file at `path`. A missing file starts out empty.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let state = match fs::read(path) {
            Ok(content) => serde_json::from_slice(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!(target: "store", "{} doesn't exist yet, starting empty", path.display());
                StoreState::default()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> StoreState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // state stays consistent even if a writer panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `change` and persists the result. The held state only changes
    /// once the new document is on disk.
    fn write<T>(
        &self,
        change: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.lock();
        let mut next = state.clone();
        let result = change(&mut next)?;

        if let Some(path) = &self.path {
            let content = serde_json::to_vec_pretty(&next)?;
            // replace atomically, readers never see a partial document
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, content)
                .and_then(|()| fs::rename(&tmp, path))
                .map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
        }
        *state = next;

        Ok(result)
    }
}

fn task_mut(state: &mut StoreState, id: TaskId) -> Result<&mut BackupTask, StoreError> {
    state
        .tasks
        .iter_mut()
        .find(|task| task.id == id)
        .ok_or(StoreError::TaskNotFound(id))
}

impl TaskStore for JsonStore {
    fn load_task(&self, id: TaskId) -> Result<TaskContext, StoreError> {
        let state = self.lock();
        let task = state
            .tasks
            .iter()
            .find(|task| task.id == id)
            .ok_or(StoreError::TaskNotFound(id))?;
        let server = state
            .servers
            .iter()
            .find(|server| server.id == task.remote_server_id)
            .ok_or(StoreError::ServerNotFound(task.remote_server_id))?;
        let destination = state
            .destinations
            .iter()
            .find(|dest| dest.id == task.destination_id)
            .ok_or(StoreError::DestinationNotFound(task.destination_id))?;
        let owner = state
            .users
            .iter()
            .find(|user| user.id == task.user_id)
            .ok_or(StoreError::UserNotFound(task.user_id))?;

        Ok(TaskContext {
            task: task.clone(),
            server: server.clone(),
            destination: destination.clone(),
            owner: owner.clone(),
        })
    }

    fn load_server(&self, id: ServerId) -> Result<RemoteServer, StoreError> {
        self.lock()
            .servers
            .iter()
            .find(|server| server.id == id)
            .cloned()
            .ok_or(StoreError::ServerNotFound(id))
    }

    fn create_log(&self, task_id: TaskId, at: DateTime<Utc>) -> Result<BackupTaskLog, StoreError> {
        self.write(|state| {
            let id: LogId = state.logs.iter().map(|log| log.id).max().unwrap_or(0) + 1;
            let log = BackupTaskLog {
                id,
                task_id,
                output: String::new(),
                successful_at: None,
                finished_at: None,
                created_at: at,
            };
            state.logs.push(log.clone());
            Ok(log)
        })
    }

    fn update_log(&self, log: &BackupTaskLog) -> Result<(), StoreError> {
        self.write(|state| {
            let stored = state
                .logs
                .iter_mut()
                .find(|stored| stored.id == log.id)
                .ok_or(StoreError::LogNotFound(log.id))?;
            *stored = log.clone();
            Ok(())
        })
    }

    fn set_task_status(&self, id: TaskId, status: TaskStatus, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.write(|state| {
            let task = task_mut(state, id)?;
            task.status = status;
            task.status_changed_at = Some(at);
            Ok(())
        })
    }

    fn touch_last_run(&self, id: TaskId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.write(|state| {
            task_mut(state, id)?.last_run_at = Some(at);
            Ok(())
        })
    }

    fn record_connectivity(
        &self,
        server_id: ServerId,
        status: Connectivity,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.write(|state| {
            let server = state
                .servers
                .iter_mut()
                .find(|server| server.id == server_id)
                .ok_or(StoreError::ServerNotFound(server_id))?;
            server.connectivity_status = status;
            if status == Connectivity::Online {
                server.last_connected_at = Some(at);
            }
            Ok(())
        })
    }

    fn record_metrics(&self, data: BackupTaskData) -> Result<(), StoreError> {
        self.write(|state| {
            state.metrics.push(data);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackupSource;

    const STATE: &str = r#"{
        "users": [{ "id": 1, "timezone": "Europe/Berlin" }],
        "servers": [{ "id": 1, "host": "web.example.org", "username": "deploy" }],
        "destinations": [{ "id": 1, "user_id": 1, "type": "local", "server_id": 1, "root_path": "/backups" }],
        "tasks": [{
            "id": 5, "user_id": 1, "type": "files", "source_path": "/srv/app",
            "remote_server_id": 1, "destination_id": 1
        }]
    }"#;

    #[test]
    fn file_store_persists_every_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, STATE).unwrap();

        let store = JsonStore::open(&path).unwrap();
        let ctx = store.load_task(5).unwrap();
        assert_eq!(
            ctx.task.source,
            BackupSource::Files {
                source_path: "/srv/app".into()
            }
        );
        assert_eq!(ctx.server.port, 22);
        assert_eq!(ctx.owner.timezone, "Europe/Berlin");

        let now = Utc::now();
        store.set_task_status(5, TaskStatus::Running, now).unwrap();
        let mut log = store.create_log(5, now).unwrap();
        log.output.push_str("[01-06-2024 03:04:05] Backup task started.");
        store.update_log(&log).unwrap();

        let reopened = JsonStore::open(&path).unwrap().snapshot();
        assert_eq!(reopened.tasks[0].status, TaskStatus::Running);
        assert_eq!(reopened.tasks[0].status_changed_at, Some(now));
        assert_eq!(reopened.logs, vec![log]);
    }

    #[test]
    fn missing_records() {
        let store = JsonStore::in_memory(serde_json::from_str(STATE).unwrap());
        assert!(matches!(store.load_task(9), Err(StoreError::TaskNotFound(9))));
        assert!(matches!(store.load_server(9), Err(StoreError::ServerNotFound(9))));
        assert!(store.set_task_status(9, TaskStatus::Ready, Utc::now()).is_err());
    }

    #[test]
    fn failed_persist_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, STATE).unwrap();
        let store = JsonStore::open(&path).unwrap();

        // a directory in the way of the temp file makes the write fail
        fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let err = store.set_task_status(5, TaskStatus::Running, Utc::now());
        assert!(matches!(err, Err(StoreError::Io { .. })));
        assert!(store.create_log(5, Utc::now()).is_err());

        let state = store.snapshot();
        assert_eq!(state.tasks[0].status, TaskStatus::Ready);
        assert!(state.tasks[0].status_changed_at.is_none());
        assert!(state.logs.is_empty());
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(&dir.path().join("absent.json")).unwrap();
        assert!(store.snapshot().tasks.is_empty());
    }
}
