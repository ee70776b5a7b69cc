//! Implements backup of a remote database using [DatabaseBackup].

use derive_more::{Display, Error, From};

use super::{ArtifactKind, Backup, BackupError, Progress};
use crate::remote::{CommandError, DatabaseEngine, Diagnostics, RemoteSession};
use crate::util::secret::Secret;
use crate::util::shell::quote;

const REDACTED: &str = "'********'";

#[derive(Debug, Display, Error, From)]
/// Errors on dumping a remote database.
pub enum DumpError {
    /// The dump file is missing or empty after the dump command ran.
    #[display("Failed to dump the database. Output: {output}")]
    Empty { output: String },
    #[from]
    Command(CommandError),
}

/// An engine specific dump command line.
///
/// The password is passed through the environment of the dump tool, never
/// as an argument, and [`DumpCommand::redacted`] is the only rendering that
/// may be logged.
pub struct DumpCommand {
    env: &'static str,
    password: String,
    tail: String,
}

impl DumpCommand {
    pub fn build(
        engine: DatabaseEngine,
        dump_path: &str,
        user: &str,
        password: String,
        database: &str,
        excluded_tables: &[&str],
    ) -> Self {
        let (env, tail) = match engine {
            DatabaseEngine::MySql => {
                let mut tail = format!(
                    "mysqldump --single-transaction --user={} {}",
                    quote(user),
                    quote(database)
                );
                for table in excluded_tables {
                    tail.push_str(&format!(
                        " --ignore-table={}",
                        quote(&format!("{database}.{table}"))
                    ));
                }
                tail.push_str(&format!(" > {}", quote(dump_path)));

                ("MYSQL_PWD", tail)
            }
            DatabaseEngine::PostgreSql => {
                let mut tail = format!("pg_dump --host=127.0.0.1 --username={}", quote(user));
                for table in excluded_tables {
                    tail.push_str(&format!(" --exclude-table={}", quote(table)));
                }
                tail.push_str(&format!(" --file={} {}", quote(dump_path), quote(database)));

                ("PGPASSWORD", tail)
            }
        };

        Self {
            env,
            password,
            tail,
        }
    }

    /// Command line to execute.
    pub fn command(&self) -> String {
        format!("{}={} {}", self.env, quote(&self.password), self.tail)
    }

    /// Command line with the password masked.
    pub fn redacted(&self) -> String {
        format!("{}={REDACTED} {}", self.env, self.tail)
    }

    /// `text` with every occurrence of the password masked.
    fn mask(&self, text: &str) -> String {
        if self.password.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.password, "********")
        }
    }

    /// `error` of running this command, carrying the redacted command line.
    fn redact_error(&self, error: CommandError) -> CommandError {
        match error {
            CommandError::Channel { source, .. } => CommandError::Channel {
                command: self.redacted(),
                source,
            },
            CommandError::Failed { status, stderr, .. } => CommandError::Failed {
                command: self.redacted(),
                status,
                stderr: self.mask(&stderr),
            },
            CommandError::Unparsable { output, .. } => CommandError::Unparsable {
                command: self.redacted(),
                output: self.mask(&output),
            },
            CommandError::Io(e) => CommandError::Io(e),
        }
    }
}

/// Splits the comma separated table list, dropping blanks.
pub fn split_tables(tables: Option<&str>) -> Vec<&str> {
    tables
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|table| !table.is_empty())
        .collect()
}

/// Runs `command` and verifies with `test -s` that it left a non-empty file
/// at `dump_path`. A zero exit status alone is not trusted.
pub fn dump(
    session: &dyn RemoteSession,
    command: &DumpCommand,
    dump_path: &str,
) -> Result<(), DumpError> {
    log::debug!(target: "backends::database", "Running: {}", command.redacted());
    let output = session
        .execute(&command.command())
        .map_err(|e| command.redact_error(e))?;
    log::trace!(target: "backends::database", "Dump exited with status {}", output.exit_status);

    let verification = session.execute(&format!("test -s {}", quote(dump_path)))?;
    if !verification.success() {
        return Err(DumpError::Empty {
            output: command.mask(&output.combined()),
        });
    }

    log::info!(target: "backends::database", "Created database dump {dump_path}");
    Ok(())
}

/// The [DatabaseBackup] backend dumps a database of the remote server.
#[derive(Debug, Clone)]
pub struct DatabaseBackup {
    pub database_name: String,
    pub excluded_tables: Option<String>,
    pub user: String,
    pub password: Secret,
}

impl Backup for DatabaseBackup {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Database
    }

    fn backup(
        &self,
        session: &dyn RemoteSession,
        artifact_path: &str,
        progress: &mut dyn Progress,
    ) -> Result<(), BackupError> {
        let engine = Diagnostics::new(session).detect_database_engine()?;
        progress.step(&format!("Detected database engine: {engine}."));

        let tables = split_tables(self.excluded_tables.as_deref());
        if !tables.is_empty() {
            progress.step(&format!("Excluding tables: {}.", tables.join(", ")));
        }

        let command = DumpCommand::build(
            engine,
            artifact_path,
            &self.user,
            self.password.reveal()?,
            &self.database_name,
            &tables,
        );

        progress.step(&format!("Dumping database {}.", self.database_name));
        dump(session, &command, artifact_path)?;
        progress.step("Database dump created.");

        Ok(())
    }
}
