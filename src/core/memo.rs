/// Memoization contract for derived per-scene state: look up by key,
/// compute when absent, persist the result.
///
/// Every derived file is reconstructible from source text, so anything
/// unreadable or malformed on disk is reported as absent, never as an error.
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::core::naming::scene_id;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistent storage half of a compute-if-absent cache keyed by scene number.
pub trait MemoStore<V>: Send + Sync {
    /// The stored value, or `None` when missing or unusable.
    fn load(&self, scene_number: u32) -> Option<V>;

    /// Persist a freshly computed value.
    fn store(&self, scene_number: u32, value: &V) -> Result<(), StoreError>;
}

/// One pretty-printed JSON file per scene: `<dir>/scene-0005.json`.
#[derive(Debug, Clone)]
pub struct JsonDirStore<V> {
    dir: PathBuf,
    _value: PhantomData<fn() -> V>,
}

impl<V> JsonDirStore<V> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _value: PhantomData,
        }
    }

    pub fn path_for(&self, scene_number: u32) -> PathBuf {
        self.dir.join(format!("{}.json", scene_id(scene_number)))
    }
}

impl<V> MemoStore<V> for JsonDirStore<V>
where
    V: Serialize + DeserializeOwned,
{
    fn load(&self, scene_number: u32) -> Option<V> {
        read_json_or_absent(&self.path_for(scene_number))
    }

    fn store(&self, scene_number: u32, value: &V) -> Result<(), StoreError> {
        write_json_atomic(&self.path_for(scene_number), value)
    }
}

/// Process-local store, for tests and throwaway runs.
#[derive(Debug)]
pub struct InMemoryStore<V> {
    entries: DashMap<u32, V>,
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V> InMemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> MemoStore<V> for InMemoryStore<V>
where
    V: Clone + Send + Sync,
{
    fn load(&self, scene_number: u32) -> Option<V> {
        self.entries.get(&scene_number).map(|v| v.value().clone())
    }

    fn store(&self, scene_number: u32, value: &V) -> Result<(), StoreError> {
        self.entries.insert(scene_number, value.clone());
        Ok(())
    }
}

/// Write JSON through a temporary sibling file so readers never see a torn file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a JSON state file, treating missing, unreadable and malformed files alike.
pub fn read_json_or_absent<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable state file, rebuilding");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed state file, rebuilding");
            None
        }
    }
}
