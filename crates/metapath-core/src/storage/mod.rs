//! Persistence of propagation matrices and run results.
//!
//! # Architecture
//!
//! - [`MatrixCache`]: directory of JSON entries, one per inverted propagation
//!   matrix, named by the blake3 hex of `(repository digest, customization)`.
//! - [`write_json_result`]: pretty-printed JSON output for finished runs.
//!
//! Writes go to a temporary sibling file that is renamed into place, so a
//! crashed write never leaves a truncated entry behind. A corrupt or unreadable
//! entry is logged and treated as a cache miss.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::errors::EngineError;
use crate::engine::matrix::RawMatrix;

/// Serialized inverted propagation matrix with its node order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMatrix {
    /// Node ids in matrix index order.
    pub ids: Vec<String>,
    pub matrix: RawMatrix,
}

#[derive(Debug, Clone)]
pub struct MatrixCache {
    dir: PathBuf,
}

impl MatrixCache {
    /// Opens (and creates when missing) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            EngineError::Storage(format!("cannot create cache dir {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for a repository digest and a customization node list.
    ///
    /// The list is sorted first, so the key does not depend on its order.
    pub fn key(repository_digest: &str, customization: &[String]) -> String {
        let mut sorted: Vec<&str> = customization.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();
        let mut hasher = blake3::Hasher::new();
        hasher.update(repository_digest.as_bytes());
        hasher.update(&[0]);
        for id in sorted {
            hasher.update(id.as_bytes());
            hasher.update(&[1]);
        }
        hasher.finalize().to_hex().to_string()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry_path(key).is_file()
    }

    /// Loads an entry. Missing, unreadable and malformed entries are all misses.
    pub fn load(&self, key: &str) -> Option<CachedMatrix> {
        let path = self.entry_path(key);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(path = %path.display(), error = %_e, "matrix cache read failed");
                return None;
            }
        };
        match serde_json::from_str::<CachedMatrix>(&data) {
            Ok(entry)
                if entry.matrix.data.len() == entry.matrix.rows * entry.matrix.columns
                    && entry.ids.len() == entry.matrix.rows =>
            {
                Some(entry)
            }
            Ok(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(path = %path.display(), "matrix cache entry has inconsistent shape");
                None
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(path = %path.display(), error = %_e, "matrix cache entry is corrupt");
                None
            }
        }
    }

    pub fn store(&self, key: &str, entry: &CachedMatrix) -> Result<(), EngineError> {
        let path = self.entry_path(key);
        write_atomically(&path, &serde_json::to_vec(entry)?)
    }

    /// Removes an entry; removing a missing entry is not an error.
    pub fn remove(&self, key: &str) -> Result<(), EngineError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| {
        EngineError::Storage(format!("cannot write {}: {}", tmp.display(), e))
    })?;
    fs::rename(&tmp, path).map_err(|e| {
        EngineError::Storage(format!("cannot move {} into place: {}", path.display(), e))
    })
}

/// Writes a result value as pretty-printed JSON, creating parent directories.
pub fn write_json_result<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), EngineError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    write_atomically(path, &serde_json::to_vec_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CachedMatrix {
        CachedMatrix {
            ids: vec!["a".into(), "b".into()],
            matrix: RawMatrix::identity(2),
        }
    }

    #[test]
    fn key_ignores_customization_order() {
        let a = MatrixCache::key("repo", &["x".into(), "y".into()]);
        let b = MatrixCache::key("repo", &["y".into(), "x".into()]);
        assert_eq!(a, b);
        assert_ne!(a, MatrixCache::key("repo", &[]));
        assert_ne!(a, MatrixCache::key("other", &["x".into(), "y".into()]));
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MatrixCache::open(dir.path().join("cache")).unwrap();
        let key = MatrixCache::key("repo", &[]);
        assert!(cache.load(&key).is_none());
        cache.store(&key, &entry()).unwrap();
        assert!(cache.contains(&key));
        assert_eq!(cache.load(&key).unwrap(), entry());
        cache.remove(&key).unwrap();
        assert!(cache.load(&key).is_none());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MatrixCache::open(dir.path()).unwrap();
        fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        assert!(cache.load("bad").is_none());
    }

    #[test]
    fn json_result_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/run.json");
        write_json_result(&path, &entry()).unwrap();
        let back: CachedMatrix = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, entry());
    }
}
