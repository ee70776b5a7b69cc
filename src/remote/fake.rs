//! Scripted sessions for tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    CommandError, CommandOutput, ConnectionError, ConnectionTarget, FileInfo, RemoteSession,
    SessionFactory,
};

type Hook = Arc<dyn Fn(&str, &mut FakeFs) -> CommandOutput + Send + Sync>;

/// Remote filesystem of a [FakeSession]: path to (size, mtime, is_dir).
pub(crate) type FakeFs = BTreeMap<String, (u64, i64, bool)>;

#[derive(Default)]
struct FakeState {
    rules: Vec<(String, Hook)>,
    broken: Vec<String>,
    fs: FakeFs,
    executed: Vec<String>,
    downloads: usize,
}

/// A session answering commands from registered rules.
///
/// Rules match by command prefix, later rules win. Unmatched commands exit
/// with status 127 like a missing binary would.
#[derive(Clone, Default)]
pub(crate) struct FakeSession {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake session lock poisoned")
    }

    pub(crate) fn respond(self, prefix: &str, stdout: &str) -> Self {
        self.respond_with(prefix, 0, stdout, "")
    }

    pub(crate) fn respond_with(self, prefix: &str, status: i32, stdout: &str, stderr: &str) -> Self {
        let output = CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_status: status,
        };
        self.on(prefix, move |_, _| output.clone())
    }

    /// Register a rule that may also alter the remote filesystem.
    pub(crate) fn on(
        self,
        prefix: &str,
        hook: impl Fn(&str, &mut FakeFs) -> CommandOutput + Send + Sync + 'static,
    ) -> Self {
        self.lock().rules.push((prefix.to_string(), Arc::new(hook)));
        self
    }

    /// Commands starting with `prefix` fail before they run, like on a
    /// dropped exec channel.
    pub(crate) fn fail_channel(self, prefix: &str) -> Self {
        self.lock().broken.push(prefix.to_string());
        self
    }

    pub(crate) fn with_file(self, path: &str, size: u64) -> Self {
        self.with_entry(path, size, 0, false)
    }

    pub(crate) fn with_entry(self, path: &str, size: u64, modified: i64, is_dir: bool) -> Self {
        self.lock().fs.insert(path.to_string(), (size, modified, is_dir));
        self
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub(crate) fn has_file(&self, path: &str) -> bool {
        self.lock().fs.contains_key(path)
    }

    pub(crate) fn downloads(&self) -> usize {
        self.lock().downloads
    }
}

impl RemoteSession for FakeSession {
    fn execute(&self, command: &str) -> Result<CommandOutput, CommandError> {
        let mut state = self.lock();
        state.executed.push(command.to_string());

        if state.broken.iter().any(|prefix| command.starts_with(prefix.as_str())) {
            return Err(CommandError::Channel {
                command: command.to_string(),
                source: ssh2::Error::new(ssh2::ErrorCode::Session(-7), "Unable to send data on channel"),
            });
        }

        let hook = state
            .rules
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, hook)| Arc::clone(hook));

        Ok(match hook {
            Some(hook) => hook(command, &mut state.fs),
            None => CommandOutput {
                stdout: String::new(),
                stderr: "command not found".to_string(),
                exit_status: 127,
            },
        })
    }

    fn stat(&self, path: &str) -> Option<FileInfo> {
        let path = path.trim_end_matches('/');
        self.lock()
            .fs
            .get(path)
            .map(|&(size, modified, is_dir)| FileInfo {
                path: path.to_string(),
                size,
                modified,
                is_dir,
            })
    }

    fn list_dir(&self, path: &str) -> Result<Vec<FileInfo>, CommandError> {
        let dir = format!("{}/", path.trim_end_matches('/'));
        Ok(self
            .lock()
            .fs
            .iter()
            .filter(|(entry, _)| {
                entry
                    .strip_prefix(&dir)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|(entry, &(size, modified, is_dir))| FileInfo {
                path: entry.clone(),
                size,
                modified,
                is_dir,
            })
            .collect())
    }

    fn delete(&self, path: &str) -> bool {
        self.lock().fs.remove(path).is_some()
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> bool {
        let Ok(meta) = std::fs::metadata(local_path) else {
            return false;
        };
        let mut state = self.lock();
        let modified = state.fs.values().map(|&(_, mtime, _)| mtime).max().unwrap_or(0) + 1;
        state
            .fs
            .insert(remote_path.to_string(), (meta.len(), modified, false));
        true
    }

    fn download(&self, remote_path: &str, local_path: &Path) -> bool {
        let mut state = self.lock();
        state.downloads += 1;
        let Some(&(size, _, false)) = state.fs.get(remote_path) else {
            return false;
        };
        std::fs::write(local_path, vec![0u8; size as usize]).is_ok()
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn is_authenticated(&self) -> bool {
        true
    }
}

/// Hands out clones of one [FakeSession] per host.
#[derive(Default)]
pub(crate) struct FakeSessionFactory {
    sessions: BTreeMap<String, FakeSession>,
    connects: AtomicUsize,
}

impl FakeSessionFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_host(mut self, host: &str, session: FakeSession) -> Self {
        self.sessions.insert(host.to_string(), session);
        self
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl SessionFactory for FakeSessionFactory {
    fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn RemoteSession>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.sessions.get(&target.host) {
            Some(session) => Ok(Box::new(session.clone())),
            None => Err(ConnectionError::AuthenticationRejected {
                username: target.username.clone(),
                host: target.host.clone(),
            }),
        }
    }
}
