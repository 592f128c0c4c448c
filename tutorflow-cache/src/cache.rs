//! File-backed result cache.

use std::{
    collections::HashMap,
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, RwLock},
};
use tracing::{debug, error, warn};

use crate::error::Result;

/// Exact-key memoization table for expensive calls.
///
/// Keys are used verbatim: a one-character difference is a miss. Entries are
/// never evicted or expire; callers that need a fresh answer pass
/// `use_cache = false` to [`ResultCache::get_or_compute`].
///
/// Reads share an in-memory copy. Stores are serialized and each one rewrites
/// the whole file through a temporary sibling and a rename, so a failed write
/// leaves the previous file intact.
#[derive(Debug)]
pub struct ResultCache {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<String, String>>,
    write_lock: Mutex<()>,
}

impl ResultCache {
    /// Open the cache stored at `path`.
    ///
    /// A missing, unreadable or corrupt file yields an empty cache; the file
    /// is (re)created on the first store.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match load(&path).await {
            Ok(entries) => {
                debug!(path = %path.display(), entries = entries.len(), "loaded result cache");
                entries
            }
            Err(error) => {
                warn!(
                    path = %path.display(),
                    %error,
                    "failed to load result cache, starting empty"
                );
                HashMap::new()
            }
        };

        Self {
            path: Some(path),
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        }
    }

    /// A cache that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up a stored value.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Store `value` under `key` and persist the table.
    ///
    /// Entries written by other processes since the last load are merged in
    /// before the file is replaced.
    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        let _guard = self.write_lock.lock().await;

        let Some(path) = &self.path else {
            self.entries.write().await.insert(key, value);
            return Ok(());
        };

        let mut merged = match load(path).await {
            Ok(on_disk) => on_disk,
            Err(error) => {
                warn!(path = %path.display(), %error, "cache file unreadable, overwriting");
                HashMap::new()
            }
        };
        {
            let entries = self.entries.read().await;
            merged.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged.insert(key.clone(), value.clone());

        let written = persist(path, &merged).await;
        // Memory keeps the new entry even if the file could not be replaced.
        let mut entries = self.entries.write().await;
        if written.is_ok() {
            *entries = merged;
        } else {
            entries.insert(key, value);
        }
        written
    }

    /// Return the stored value for `key`, or run `compute` and store its result.
    ///
    /// With `use_cache = false` the table is neither read nor written.
    /// Errors from `compute` are returned unchanged and nothing is stored.
    /// Failing to persist is logged and does not affect the returned value.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        use_cache: bool,
        compute: F,
    ) -> std::result::Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<String, E>>,
    {
        if use_cache {
            if let Some(hit) = self.get(key).await {
                debug!(key_len = key.len(), "result cache hit");
                return Ok(hit);
            }
            debug!(key_len = key.len(), "result cache miss");
        }

        let value = compute().await?;

        if use_cache {
            if let Err(error) = self.insert(key, value.clone()).await {
                error!(%error, "failed to save result cache");
            }
        }

        Ok(value)
    }
}

async fn load(path: &Path) -> Result<HashMap<String, String>> {
    match fs::read_to_string(path).await {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
        Err(error) => Err(error.into()),
    }
}

async fn persist(path: &Path, entries: &HashMap<String, String>) -> Result<()> {
    let body = serde_json::to_vec(entries)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cache".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(&body).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(error) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(error.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use pretty_assertions::assert_eq;

    use super::*;

    fn counted(
        calls: &AtomicUsize,
        value: &'static str,
    ) -> impl Future<Output = std::result::Result<String, Infallible>> {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(value.to_string()) }
    }

    #[tokio::test]
    async fn second_call_is_a_pure_hit() {
        let cache = ResultCache::in_memory();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute("q1", true, || counted(&calls, "A"))
            .await
            .unwrap();
        let second = cache
            .get_or_compute("q1", true, || counted(&calls, "B"))
            .await
            .unwrap();

        assert_eq!(first, "A");
        assert_eq!(second, "A");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keys_are_not_normalized() {
        let cache = ResultCache::in_memory();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_compute("prompt", true, || counted(&calls, "A"))
            .await
            .unwrap();
        cache
            .get_or_compute("prompt ", true, || counted(&calls, "A"))
            .await
            .unwrap();
        cache
            .get_or_compute("Prompt", true, || counted(&calls, "A"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bypass_neither_reads_nor_writes() {
        let cache = ResultCache::in_memory();
        cache.insert("q", "cached").await.unwrap();
        let calls = AtomicUsize::new(0);

        let fresh = cache
            .get_or_compute("q", false, || counted(&calls, "fresh"))
            .await
            .unwrap();
        let other = cache
            .get_or_compute("other", false, || counted(&calls, "x"))
            .await
            .unwrap();

        assert_eq!(fresh, "fresh");
        assert_eq!(other, "x");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get("q").await, Some("cached".to_string()));
        assert_eq!(cache.get("other").await, None);
    }

    #[tokio::test]
    async fn compute_errors_are_not_stored() {
        let cache = ResultCache::in_memory();

        let err = cache
            .get_or_compute("q", true, || async { Err::<String, _>("timeout") })
            .await
            .unwrap_err();

        assert_eq!(err, "timeout");
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm_cache.json");
        let calls = AtomicUsize::new(0);

        {
            let cache = ResultCache::open(&path).await;
            cache
                .get_or_compute("q1", true, || counted(&calls, "A"))
                .await
                .unwrap();
            cache
                .get_or_compute("q2", true, || counted(&calls, "B"))
                .await
                .unwrap();
        }

        let reopened = ResultCache::open(&path).await;
        let q1 = reopened
            .get_or_compute("q1", true, || counted(&calls, "changed"))
            .await
            .unwrap();
        let q2 = reopened
            .get_or_compute("q2", true, || counted(&calls, "changed"))
            .await
            .unwrap();

        assert_eq!(q1, "A");
        assert_eq!(q2, "B");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm_cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = ResultCache::open(&path).await;
        assert!(cache.is_empty().await);

        let calls = AtomicUsize::new(0);
        let value = cache
            .get_or_compute("q", true, || counted(&calls, "A"))
            .await
            .unwrap();
        assert_eq!(value, "A");

        // The rewrite produced a valid file again.
        let raw = std::fs::read_to_string(&path).unwrap();
        let stored: HashMap<String, String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.get("q"), Some(&"A".to_string()));
    }

    #[tokio::test]
    async fn writes_from_another_handle_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.json");

        let first = ResultCache::open(&path).await;
        let second = ResultCache::open(&path).await;
        first.insert("a", "1").await.unwrap();
        second.insert("b", "2").await.unwrap();

        let reopened = ResultCache::open(&path).await;
        assert_eq!(reopened.get("a").await, Some("1".to_string()));
        assert_eq!(reopened.get("b").await, Some("2".to_string()));
    }

    #[tokio::test]
    async fn concurrent_stores_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ResultCache::open(dir.path().join("c.json")).await);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compute(&format!("k{i}"), true, || async move {
                            Ok::<_, Infallible>(format!("v{i}"))
                        })
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let reopened = ResultCache::open(cache.path().unwrap()).await;
        assert_eq!(reopened.len().await, 16);
        assert_eq!(reopened.get("k7").await, Some("v7".to_string()));
    }

    #[tokio::test]
    async fn missing_parent_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/cache.json");

        let cache = ResultCache::open(&path).await;
        cache.insert("k", "v").await.unwrap();

        assert!(path.exists());
    }
}
