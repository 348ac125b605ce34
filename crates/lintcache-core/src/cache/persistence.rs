use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{CacheError, Result, Snapshot, CACHE_DIR_NAME, STATE_FILE_EXTENSION};

/// Loads and stores the snapshot of a project.
///
/// `load` never fails: anything that cannot be turned into a snapshot of the
/// current schema version is reported as absent.
pub trait StatePersistence {
    fn load<R: DeserializeOwned>(&self, project: &Path) -> Option<Snapshot<R>>;

    fn save<R: Serialize>(&self, project: &Path, snapshot: &Snapshot<R>) -> Result<()>;
}

impl<P: StatePersistence + ?Sized> StatePersistence for &P {
    fn load<R: DeserializeOwned>(&self, project: &Path) -> Option<Snapshot<R>> {
        (**self).load(project)
    }

    fn save<R: Serialize>(&self, project: &Path, snapshot: &Snapshot<R>) -> Result<()> {
        (**self).save(project, snapshot)
    }
}

fn decode<R: DeserializeOwned>(bytes: &[u8], origin: &Path) -> Option<Snapshot<R>> {
    match Snapshot::from_bytes(bytes) {
        Ok(snapshot) => Some(snapshot),
        Err(CacheError::VersionMismatch { expected, found }) => {
            debug!(
                "discarding state {}: schema version {} (expected {})",
                origin.display(),
                found,
                expected
            );
            None
        }
        Err(e) => {
            debug!("discarding unreadable state {}: {}", origin.display(), e);
            None
        }
    }
}

/// Stores snapshots next to the project file:
/// `<project dir>/<cache dir>/<project file name>.state`
#[derive(Debug, Clone)]
pub struct FileStatePersistence {
    cache_dir: PathBuf,
}

impl Default for FileStatePersistence {
    fn default() -> Self {
        Self::new(CACHE_DIR_NAME)
    }
}

impl FileStatePersistence {
    /// `cache_dir` is resolved relative to the project file's directory unless absolute
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn state_path(&self, project: &Path) -> PathBuf {
        let root = project.parent().unwrap_or_else(|| Path::new(""));
        let name = project
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        root.join(&self.cache_dir)
            .join(format!("{}.{}", name, STATE_FILE_EXTENSION))
    }
}

impl StatePersistence for FileStatePersistence {
    fn load<R: DeserializeOwned>(&self, project: &Path) -> Option<Snapshot<R>> {
        let path = self.state_path(project);
        match fs::read(&path) {
            Ok(bytes) => decode(&bytes, &path),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no persisted state at {}", path.display());
                None
            }
            Err(e) => {
                debug!("cannot read state {}: {}", path.display(), e);
                None
            }
        }
    }

    fn save<R: Serialize>(&self, project: &Path, snapshot: &Snapshot<R>) -> Result<()> {
        let path = self.state_path(project);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;
        }
        let bytes = snapshot.to_bytes()?;
        // write then rename so a crashed run never leaves a torn state file
        let staging = path.with_extension(format!("{}.tmp", STATE_FILE_EXTENSION));
        fs::write(&staging, &bytes).map_err(|e| CacheError::io(&staging, e))?;
        fs::rename(&staging, &path).map_err(|e| CacheError::io(&path, e))?;
        debug!(
            "saved state {} ({} files, {} bytes)",
            path.display(),
            snapshot.files.len(),
            bytes.len()
        );
        Ok(())
    }
}

/// Keeps encoded snapshots in memory, keyed by project.
///
/// Snapshots still go through the binary encoding so that a save/load
/// round trip behaves exactly like the on-disk store.
#[derive(Debug, Default)]
pub struct MemoryStatePersistence {
    states: Mutex<FxHashMap<PathBuf, Vec<u8>>>,
}

impl MemoryStatePersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoded snapshot stored for `project`
    pub fn raw(&self, project: &Path) -> Option<Vec<u8>> {
        self.states.lock().get(project).cloned()
    }

    /// Store arbitrary bytes as the state of `project`
    pub fn insert_raw(&self, project: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.states.lock().insert(project.into(), bytes);
    }

    pub fn contains(&self, project: &Path) -> bool {
        self.states.lock().contains_key(project)
    }

    pub fn clear(&self) {
        self.states.lock().clear();
    }
}

impl StatePersistence for MemoryStatePersistence {
    fn load<R: DeserializeOwned>(&self, project: &Path) -> Option<Snapshot<R>> {
        let bytes = self.raw(project);
        match bytes {
            Some(bytes) => decode(&bytes, project),
            None => {
                debug!("no persisted state for {}", project.display());
                None
            }
        }
    }

    fn save<R: Serialize>(&self, project: &Path, snapshot: &Snapshot<R>) -> Result<()> {
        let bytes = snapshot.to_bytes()?;
        self.insert_raw(project, bytes);
        Ok(())
    }
}
