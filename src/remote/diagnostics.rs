//! Probing a remote server before producing an artifact.

use std::sync::LazyLock;

use derive_more::{Display, Error, From};
use regex::Regex;

use super::{CommandError, RemoteSession};
use crate::util::shell::quote;

/// Files that all have to exist for a directory to count as a conventional
/// (Laravel style) project.
pub const PROJECT_MARKERS: [&str; 3] = ["artisan", "composer.json", "package.json"];

/// Dependency directories left out of archives of conventional projects.
pub const HEAVY_SUBDIRECTORIES: [&str; 2] = ["node_modules", "vendor"];

static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)").expect("regex should be valid"));

/// Database engines a dump can be produced for.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum DatabaseEngine {
    #[display("MySQL")]
    MySql,
    #[display("PostgreSQL")]
    PostgreSql,
}

impl DatabaseEngine {
    /// Commands [`Diagnostics::detect_database_engine`] tries, in order.
    const DETECTION_COMMANDS: [(DatabaseEngine, &'static str); 2] = [
        (DatabaseEngine::MySql, "mysql --version"),
        (DatabaseEngine::PostgreSql, "psql --version"),
    ];
}

#[derive(Debug, Display, Error, From)]
pub enum DiagnosticsError {
    #[from]
    Command(CommandError),
    /// Neither MySQL nor PostgreSQL client tools responded.
    #[display("Unable to detect a supported database engine on the remote server")]
    UnsupportedDatabaseEngine,
}

/// Remote checks built on a [RemoteSession].
pub struct Diagnostics<'a> {
    session: &'a dyn RemoteSession,
}

impl<'a> Diagnostics<'a> {
    pub fn new(session: &'a dyn RemoteSession) -> Self {
        Self { session }
    }

    /// Whether `path` exists. A failing stat counts as non-existence.
    pub fn path_exists(&self, path: &str) -> bool {
        self.session.stat(path).is_some()
    }

    /// Apparent size in bytes of everything below `path`.
    ///
    /// GNU `du` answers in one shot. Other variants (BusyBox, BSD) lack
    /// `-b`, so regular files are summed up from a `find` listing instead.
    /// Symlinks are not followed there and contribute nothing. Unreadable
    /// entries are skipped: a total is accepted whatever the exit status.
    pub fn directory_size(&self, path: &str) -> Result<u64, DiagnosticsError> {
        let command = if self.has_gnu_du() {
            format!("du -sb {}", quote(path))
        } else {
            log::debug!(target: "remote::diagnostics", "Non-GNU du detected, summing file sizes");
            format!(
                "find -P {} -type f -exec ls -ln {{}} + | awk '{{ s += $5 }} END {{ print s + 0 }}'",
                quote(path)
            )
        };

        let output = self.session.execute(&command)?;
        if !output.success() {
            log::warn!(
                target: "remote::diagnostics",
                "`{command}` exited with status {}: {}",
                output.exit_status,
                output.stderr.trim()
            );
        }
        let size = parse_leading_number(&output.stdout).ok_or(CommandError::Unparsable {
            command,
            output: output.combined(),
        })?;
        log::debug!(target: "remote::diagnostics", "Size of {path}: {size} bytes");

        Ok(size)
    }

    fn has_gnu_du(&self) -> bool {
        self.session
            .execute("du --version")
            .is_ok_and(|output| output.success() && output.stdout.contains("GNU"))
    }

    /// Available bytes on the filesystem containing `path`.
    pub fn free_space(&self, path: &str) -> Result<u64, DiagnosticsError> {
        let command = format!("df -Pk {}", quote(path));
        let stdout = self.session.run(&command)?;

        let available_kib = parse_df_available(&stdout).ok_or(CommandError::Unparsable {
            command,
            output: stdout.trim().to_string(),
        })?;
        log::debug!(target: "remote::diagnostics", "Free space at {path}: {available_kib} KiB");

        Ok(available_kib.saturating_mul(1024))
    }

    /// Detects the database engine from the installed client tools, MySQL first.
    pub fn detect_database_engine(&self) -> Result<DatabaseEngine, DiagnosticsError> {
        for (engine, check) in DatabaseEngine::DETECTION_COMMANDS {
            match self.session.execute(check) {
                Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                    log::debug!(target: "remote::diagnostics", "Detected {engine}: {}", output.stdout.trim());
                    return Ok(engine);
                }
                Ok(_) => {}
                Err(e) => {
                    log::debug!(target: "remote::diagnostics", "Check `{check}` failed: {e}");
                }
            }
        }

        Err(DiagnosticsError::UnsupportedDatabaseEngine)
    }

    /// True only if every one of [PROJECT_MARKERS] exists in `path`.
    pub fn is_conventional_project_layout(&self, path: &str) -> bool {
        let dir = path.trim_end_matches('/');
        PROJECT_MARKERS
            .iter()
            .all(|marker| self.path_exists(&format!("{dir}/{marker}")))
    }
}

fn parse_leading_number(output: &str) -> Option<u64> {
    LEADING_NUMBER
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
}

/// Column `Available` of the POSIX `df -P` output.
fn parse_df_available(output: &str) -> Option<u64> {
    output
        .lines()
        .skip(1)
        .find(|line| !line.trim().is_empty())?
        .split_whitespace()
        .nth(3)?
        .parse()
        .ok()
}
