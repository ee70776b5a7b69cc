//! In-memory destination for tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    newest_first, Destination, DestinationError, DestinationFactory, StoredFile,
};
use crate::model::BackupDestination;

#[derive(Default)]
struct State {
    files: Vec<StoredFile>,
    failing: bool,
    unlistable: bool,
    store_attempts: usize,
    stored_from: Vec<PathBuf>,
    deleted: Vec<String>,
}

/// Destination keeping file names only. Clones share their state.
#[derive(Clone, Default)]
pub(crate) struct FakeDestination {
    state: Arc<Mutex<State>>,
}

impl FakeDestination {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake destination lock poisoned")
    }

    /// Every store attempt fails.
    pub(crate) fn failing(self) -> Self {
        self.lock().failing = true;
        self
    }

    /// Every listing fails.
    pub(crate) fn unlistable(self) -> Self {
        self.lock().unlistable = true;
        self
    }

    pub(crate) fn with_file(self, path: &str, modified: i64) -> Self {
        self.lock().files.push(StoredFile {
            path: path.to_string(),
            modified,
        });
        self
    }

    pub(crate) fn store_attempts(&self) -> usize {
        self.lock().store_attempts
    }

    /// Local files handed to [`Destination::store`], one per attempt.
    pub(crate) fn stored_from(&self) -> Vec<PathBuf> {
        self.lock().stored_from.clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub(crate) fn file_names(&self) -> Vec<String> {
        newest_first(self.lock().files.clone())
            .into_iter()
            .map(|file| file.path)
            .collect()
    }
}

impl Destination for FakeDestination {
    fn list_files(&self, pattern: &str) -> Result<Vec<StoredFile>, DestinationError> {
        let state = self.lock();
        if state.unlistable {
            return Err(DestinationError::ObjectStorage("listing refused".to_string()));
        }

        Ok(newest_first(
            state
                .files
                .iter()
                .filter(|file| file.path.contains(pattern))
                .cloned()
                .collect(),
        ))
    }

    fn delete_file(&self, path: &str) {
        let mut state = self.lock();
        state.files.retain(|file| file.path != path);
        state.deleted.push(path.to_string());
    }

    fn full_path(&self, file_name: &str, dest_sub_path: Option<&str>) -> String {
        match dest_sub_path {
            Some(sub) => format!("{sub}/{file_name}"),
            None => file_name.to_string(),
        }
    }

    fn store(&self, local_path: &Path, target: &str) -> Result<(), DestinationError> {
        let mut state = self.lock();
        state.store_attempts += 1;
        state.stored_from.push(local_path.to_path_buf());
        if state.failing {
            return Err(DestinationError::Upload {
                target: target.to_string(),
            });
        }

        let modified = state.files.iter().map(|f| f.modified).max().unwrap_or(0) + 1;
        state.files.push(StoredFile {
            path: target.to_string(),
            modified,
        });
        Ok(())
    }
}

/// Opens the same [FakeDestination] for every stored destination.
#[derive(Default)]
pub(crate) struct FakeDestinationFactory {
    pub(crate) destination: FakeDestination,
    pub(crate) opened_scopes: Mutex<Vec<Option<String>>>,
}

impl DestinationFactory for FakeDestinationFactory {
    fn open(
        &self,
        _destination: &BackupDestination,
        scope: Option<&str>,
    ) -> Result<Box<dyn Destination>, DestinationError> {
        self.opened_scopes
            .lock()
            .expect("fake factory lock poisoned")
            .push(scope.map(str::to_string));
        Ok(Box::new(self.destination.clone()))
    }
}
