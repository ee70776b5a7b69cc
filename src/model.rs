//! Records the engine reads and writes through a [`TaskStore`](crate::store::TaskStore).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use derive_more::Display;

use crate::util::secret::Secret;

pub type TaskId = u64;
pub type ServerId = u64;
pub type DestinationId = u64;
pub type UserId = u64;
pub type LogId = u64;

/// Owner of tasks. Only the timezone matters to the engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    /// IANA timezone name used to render log timestamps.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Copy, Clone, Debug, Display, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    #[display("ready")]
    Ready,
    #[display("running")]
    Running,
}

/// What a task backs up.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackupSource {
    /// A directory tree on the remote server.
    Files { source_path: String },
    /// A database on the remote server.
    Database {
        database_name: String,
        /// Comma separated table names to leave out of the dump.
        #[serde(default)]
        excluded_tables: Option<String>,
    },
}

/// Authentication material for an SSH connection.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SshAuth {
    Password(Secret),
    PrivateKey {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<Secret>,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BackupTask {
    pub id: TaskId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub source: BackupSource,
    pub remote_server_id: ServerId,
    pub destination_id: DestinationId,
    /// Sub path inside the destination the artifacts are stored at.
    #[serde(default)]
    pub store_path: Option<String>,
    /// Cron expression, evaluated by the scheduler.
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub maximum_backups_to_keep: Option<u32>,
    #[serde(default)]
    pub filename_prefix: Option<String>,
    /// Overrides the server's authentication material.
    #[serde(default)]
    pub ssh_auth: Option<SshAuth>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Stamped on every status change so a reaper can spot stuck runs.
    #[serde(default)]
    pub status_changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl BackupTask {
    /// Retention count if rotation is configured for this task.
    pub fn rotation(&self) -> Option<usize> {
        self.maximum_backups_to_keep
            .filter(|&keep| keep > 0)
            .map(|keep| keep as usize)
    }
}

#[derive(Copy, Clone, Debug, Display, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    #[default]
    #[display("unknown")]
    Unknown,
    #[display("online")]
    Online,
    #[display("offline")]
    Offline,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemoteServer {
    pub id: ServerId,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub ssh_auth: Option<SshAuth>,
    /// Database user, defaults to the SSH username.
    #[serde(default)]
    pub database_username: Option<String>,
    #[serde(default)]
    pub database_password: Option<Secret>,
    #[serde(default)]
    pub connectivity_status: Connectivity,
    #[serde(default)]
    pub last_connected_at: Option<DateTime<Utc>>,
}

fn default_ssh_port() -> u16 {
    22
}

impl RemoteServer {
    pub fn database_user(&self) -> &str {
        self.database_username.as_deref().unwrap_or(&self.username)
    }
}

/// Connection details of an S3 compatible bucket.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ObjectStorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for non-AWS providers.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub access_key: Secret,
    pub secret_key: Secret,
    #[serde(default)]
    pub path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestinationKind {
    /// A directory on another server, reached over SSH.
    Local { server_id: ServerId, root_path: String },
    #[serde(rename = "s3", alias = "custom_s3", alias = "digitalocean_spaces")]
    ObjectStorage(ObjectStorageConfig),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BackupDestination {
    pub id: DestinationId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub kind: DestinationKind,
}

/// One record per execution of a task.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BackupTaskLog {
    pub id: LogId,
    pub task_id: TaskId,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub successful_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Duration and size of a finished run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BackupTaskData {
    pub task_id: TaskId,
    pub duration_seconds: f64,
    pub size_bytes: Option<u64>,
    pub recorded_at: DateTime<Utc>,
}

/// A task together with everything a run needs to know about it.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: BackupTask,
    pub server: RemoteServer,
    pub destination: BackupDestination,
    pub owner: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_deserializes_with_flattened_source() {
        let json = r#"{
            "id": 7,
            "user_id": 1,
            "type": "database",
            "database_name": "shop",
            "excluded_tables": "sessions,cache",
            "remote_server_id": 2,
            "destination_id": 3,
            "maximum_backups_to_keep": 5
        }"#;
        let task: BackupTask = serde_json::from_str(json).unwrap();
        assert_eq!(
            task.source,
            BackupSource::Database {
                database_name: "shop".into(),
                excluded_tables: Some("sessions,cache".into()),
            }
        );
        assert_eq!(task.status, TaskStatus::Ready);
        assert_eq!(task.rotation(), Some(5));
    }

    #[test]
    fn zero_retention_disables_rotation() {
        let json = r#"{"id":1,"user_id":1,"type":"files","source_path":"/srv",
            "remote_server_id":1,"destination_id":1,"maximum_backups_to_keep":0}"#;
        let task: BackupTask = serde_json::from_str(json).unwrap();
        assert_eq!(task.rotation(), None);
    }

    #[test]
    fn destination_type_aliases() {
        for ty in ["s3", "custom_s3", "digitalocean_spaces"] {
            let json = format!(
                r#"{{"id":1,"user_id":1,"type":"{ty}","bucket":"b","access_key":"a","secret_key":"s"}}"#
            );
            let dest: BackupDestination = serde_json::from_str(&json).unwrap();
            assert!(matches!(dest.kind, DestinationKind::ObjectStorage(_)));
        }

        let json = r#"{"id":1,"user_id":1,"type":"local","server_id":4,"root_path":"/backups"}"#;
        let dest: BackupDestination = serde_json::from_str(json).unwrap();
        assert_eq!(
            dest.kind,
            DestinationKind::Local {
                server_id: 4,
                root_path: "/backups".into()
            }
        );
    }
}
