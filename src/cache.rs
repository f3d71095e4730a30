use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{MigrateError, Result};

/// Write-through on-disk memo of expensive producers (page fetches, crawls).
///
/// Entries are JSON files named after the sanitized key; an existing entry is
/// returned without running the producer.
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Cache { dir })
    }

    pub fn cached_or_compute<T, F>(&self, key: &str, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let key = sanitize_key(key);
        let path = self.dir.join(&key);

        if path.exists() {
            info!("Got cache: {}", key);
            let raw = fs::read(&path)?;
            return serde_json::from_slice(&raw).map_err(|source| MigrateError::Cache { key, source });
        }

        let value = producer()?;
        let raw = serde_json::to_vec(&value).map_err(|source| MigrateError::Cache {
            key: key.clone(),
            source,
        })?;
        fs::write(&path, raw)?;
        Ok(value)
    }
}

/// Cache key for one note page.
pub fn note_key(url: &str) -> String {
    format!("note_{}", hex::encode(Sha256::digest(url.as_bytes())))
}

fn sanitize_key(key: &str) -> String {
    key.replace('/', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn producer_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let calls = Cell::new(0);

        for _ in 0..3 {
            let v: Vec<String> = cache
                .cached_or_compute("note_links", || {
                    calls.set(calls.get() + 1);
                    Ok(vec!["a".to_string(), "b".to_string()])
                })
                .unwrap();
            assert_eq!(v, ["a", "b"]);
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn failed_producer_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).unwrap();

        let err = cache.cached_or_compute::<String, _>("k", || Err(MigrateError::MissingField("x")));
        assert!(err.is_err());
        let ok: String = cache.cached_or_compute("k", || Ok("fresh".into())).unwrap();
        assert_eq!(ok, "fresh");
    }

    #[test]
    fn slashes_in_keys_stay_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let _: u32 = cache.cached_or_compute("a/b/c", || Ok(7)).unwrap();
        assert!(dir.path().join("a_b_c").exists());
    }

    #[test]
    fn note_keys_are_stable_hex() {
        let k = note_key("https://example.org/2017/09/23/x");
        assert!(k.starts_with("note_"));
        assert_eq!(k.len(), 5 + 64);
        assert_eq!(k, note_key("https://example.org/2017/09/23/x"));
    }
}
