//! Run state on disk.
//!
//! A state directory holds `cache.json` (fingerprint to cached reply) and
//! `run.json` (the last [`PipelineRun`]). Both are written to a temp file
//! and renamed into place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use crate::cache::{CachedResponse, ResponseCache};
use crate::fingerprint::Fingerprint;
use crate::run::PipelineRun;

const CACHE_FILE: &str = "cache.json";
const RUN_FILE: &str = "run.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads and writes run state under one directory.
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory and drop temp files left by an interrupted write.
    pub async fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await.map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        if let Ok(mut entries) = fs::read_dir(&self.dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    tracing::debug!(path = %path.display(), "Removing interrupted write");
                    if let Err(error) = fs::remove_file(&path).await {
                        tracing::warn!(
                            path = %path.display(),
                            error = %error,
                            "Failed to remove interrupted write"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Load persisted replies into `cache`, dropping expired ones.
    ///
    /// Returns the number of entries kept; a missing file counts as empty.
    pub async fn load_cache(&self, cache: &ResponseCache) -> Result<usize, StoreError> {
        let entries: Option<BTreeMap<Fingerprint, CachedResponse>> =
            self.read_json(CACHE_FILE).await?;
        let Some(entries) = entries else {
            return Ok(0);
        };

        let total = entries.len();
        let kept = cache.restore(entries.into_iter().collect()).await;
        tracing::debug!(kept, expired = total - kept, "Response cache loaded");
        Ok(kept)
    }

    pub async fn save_cache(&self, cache: &ResponseCache) -> Result<(), StoreError> {
        let entries: BTreeMap<Fingerprint, CachedResponse> = cache.entries().into_iter().collect();
        self.write_json(CACHE_FILE, &entries).await
    }

    /// The last saved run, if any.
    pub async fn load_run(&self) -> Result<Option<PipelineRun>, StoreError> {
        self.read_json(RUN_FILE).await
    }

    pub async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        self.write_json(RUN_FILE, run).await
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, StoreError> {
        let path = self.dir.join(name);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Json { path, source })
    }

    async fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let path = self.dir.join(name);
        let content = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp_path.clone(),
                source,
            })?;

        let sync_path = tmp_path.clone();
        let synced = tokio::task::spawn_blocking(move || {
            std::fs::File::open(&sync_path).and_then(|file| file.sync_all())
        })
        .await;
        if !matches!(synced, Ok(Ok(()))) {
            tracing::warn!(path = %tmp_path.display(), "Failed to sync temp file to disk");
        }

        fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "State written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::StageId;
    use crate::providers::TokenUsage;
    use crate::run::StageStatus;
    use chrono::Utc;
    use std::time::Duration;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::compute("reasoning", &[], &serde_json::json!({ "k": s }))
    }

    fn reply(text: &str, cached_at: chrono::DateTime<Utc>) -> CachedResponse {
        CachedResponse {
            text: text.into(),
            provider: "scripted".into(),
            model: "scripted".into(),
            usage: TokenUsage::default(),
            cached_at,
        }
    }

    #[tokio::test]
    async fn test_missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("state"));
        store.init().await.unwrap();

        assert!(store.load_run().await.unwrap().is_none());
        assert_eq!(store.load_cache(&ResponseCache::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cache_round_trip_drops_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        store.init().await.unwrap();

        let cache = ResponseCache::new(100, Duration::from_secs(3600));
        cache.insert(fp("a"), reply("alpha", Utc::now())).await;
        cache.insert(fp("b"), reply("beta", Utc::now())).await;
        store.save_cache(&cache).await.unwrap();

        let restored = ResponseCache::new(100, Duration::from_secs(3600));
        assert_eq!(store.load_cache(&restored).await.unwrap(), 2);
        assert_eq!(restored.get(&fp("a")).await.unwrap().text, "alpha");

        // Same file read with a TTL the entries have outlived
        let short = ResponseCache::new(100, Duration::from_secs(60));
        let mut file: BTreeMap<Fingerprint, CachedResponse> = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(CACHE_FILE)).unwrap(),
        )
        .unwrap();
        for entry in file.values_mut() {
            entry.cached_at = Utc::now() - chrono::Duration::seconds(120);
        }
        std::fs::write(dir.path().join(CACHE_FILE), serde_json::to_string(&file).unwrap()).unwrap();
        assert_eq!(store.load_cache(&short).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        store.init().await.unwrap();

        let mut run = PipelineRun::new("abc");
        run.stage_status.insert(StageId::Collector, StageStatus::Completed);
        run.settle();
        store.save_run(&run).await.unwrap();

        let loaded = store.load_run().await.unwrap().unwrap();
        assert_eq!(loaded, run);
        assert!(!dir.path().join("run.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_init_removes_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.json.tmp"), "{").unwrap();

        RunStore::new(dir.path()).init().await.unwrap();
        assert!(!dir.path().join("run.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_init_survives_unremovable_temp_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("stuck.tmp")).unwrap();
        std::fs::write(dir.path().join("cache.json.tmp"), "{").unwrap();

        RunStore::new(dir.path()).init().await.unwrap();
        assert!(dir.path().join("stuck.tmp").is_dir());
        assert!(!dir.path().join("cache.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_run_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RUN_FILE), "not json").unwrap();

        let err = RunStore::new(dir.path()).load_run().await.unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }
}
