//! Per-request staging directories.
//!
//! Each request that runs a downloader gets its own directory `<prefix>_<id>` under the staging
//! root. The directory is owned by a [`CleanupGuard`] that deletes it (and anything else it was
//! told to track) when dropped, so every exit path of a handler, including a body stream that is
//! dropped mid-transfer, leaves the root clean.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_CREATE_ATTEMPTS: usize = 8;
const PARTIAL_SUFFIXES: [&str; 4] = [".part", ".ytdl", ".temp", ".tmp"];

/// Source of request identifiers used to name staging directories.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

#[derive(Clone)]
pub struct StagingRoot {
    root: PathBuf,
    ids: Arc<dyn IdGenerator>,
}

impl StagingRoot {
    pub fn new(root: impl Into<PathBuf>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            root: root.into(),
            ids,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh directory for one request. The directory is created without parents so
    /// an existing name is detected; on collision a new id is drawn.
    pub async fn create(&self, prefix: &str) -> std::io::Result<StagedDir> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let name = format!("{prefix}_{}", self.ids.next_id());
            let path = self.root.join(&name);

            match tokio::fs::create_dir(&path).await {
                Ok(()) => {
                    debug!("Staged {:?}", path);
                    return Ok(StagedDir {
                        guard: CleanupGuard::new(path.clone()),
                        path,
                        name,
                    });
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                    warn!("Staging directory {:?} already exists, drawing a new id", path);
                }
                Err(error) => return Err(error),
            }
        }

        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "could not find a free staging directory name",
        ))
    }
}

/// A request's staging directory.
pub struct StagedDir {
    path: PathBuf,
    name: String,
    guard: CleanupGuard,
}

impl StagedDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name, which doubles as the unique prefix for files produced inside it.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers an extra path (e.g. an archive written next to the directory) for removal.
    pub fn track(&mut self, path: PathBuf) {
        self.guard.paths.push(path);
    }

    pub fn into_guard(self) -> CleanupGuard {
        self.guard
    }
}

/// Removes its paths when dropped.
#[derive(Debug)]
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { paths: vec![path] }
    }
}

fn remove_paths(paths: Vec<PathBuf>) {
    for path in paths {
        let result = match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_dir() => std::fs::remove_dir_all(&path),
            Ok(_) => std::fs::remove_file(&path),
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => debug!("Removed staged {:?}", path),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Could not remove staged {:?}: {error}", path),
        }
    }
}

/// Removal finishes before `drop` returns. On a multi-threaded runtime the worker hands its
/// other tasks off while the filesystem calls block.
impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let paths = std::mem::take(&mut self.paths);
        let multi_threaded = Handle::try_current()
            .is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread);

        if multi_threaded {
            tokio::task::block_in_place(|| remove_paths(paths));
        } else {
            remove_paths(paths);
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LocateError {
    NotFound,
    Ambiguous(Vec<PathBuf>),
    Io(String),
}

fn is_partial(name: &str) -> bool {
    PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Finds the single finished file in `dir` whose name starts with `prefix`.
pub async fn locate_artifact(dir: &Path, prefix: &str) -> Result<PathBuf, LocateError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|error| LocateError::Io(error.to_string()))?;
    let mut candidates = Vec::new();

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|error| LocateError::Io(error.to_string()))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(prefix) || is_partial(&name) {
            continue;
        }
        let is_file = entry
            .file_type()
            .await
            .map(|file_type| file_type.is_file())
            .unwrap_or(false);
        if is_file {
            candidates.push(entry.path());
        }
    }

    match candidates.len() {
        0 => Err(LocateError::NotFound),
        1 => Ok(candidates.remove(0)),
        _ => {
            candidates.sort();
            Err(LocateError::Ambiguous(candidates))
        }
    }
}

/// Deletes entries of the staging root older than `older_than`. Run at startup to clear what a
/// crashed process left behind.
pub async fn sweep_stale(root: &Path, older_than: Duration) {
    if older_than.is_zero() {
        return;
    }

    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open staging root for sweeping: {error}");
            }
            return;
        }
    };

    let now = SystemTime::now();

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Could not iterate staging root: {error}");
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("Could not read metadata of {:?}: {error}", path);
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < older_than {
            continue;
        }

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(error) = result
            && error.kind() != ErrorKind::NotFound
        {
            warn!("Could not remove stale staging entry {:?}: {error}", path);
        }
    }
}
