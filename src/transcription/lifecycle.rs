//! # Model Lifecycle
//!
//! Owns the download status of every tier and the single "current" model.
//!
//! ## Locks:
//! - `tiers`: a small `parking_lot::RwLock` map. Status reads (`/api/models`,
//!   polling) never wait behind inference.
//! - `current`: an `Arc<tokio::sync::Mutex>` held across load, unload and
//!   transcription, so a request never races a model swap. Load and
//!   transcribe move an owned guard into their blocking task: if the caller
//!   is dropped mid-call the lock stays held until the worker returns.
//! - `current_name`: a mirror of the current tier for `/health`.
//!
//! ## Transitions:
//! - download: `not_downloaded | failed → downloading → ready | failed`
//! - load: only a `ready` tier, and only when nothing else is current
//! - unload: always succeeds

use super::download::{ModelFetcher, ModelStore, ProgressFn};
use super::engine::{EngineError, ModelLoader, SpeechEngine, Transcript};
use super::model::{ModelDescriptor, ModelSize, ModelStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Model {0} is already downloading")]
    AlreadyDownloading(ModelSize),

    #[error("Model {model} is not ready (status: {status})")]
    NotReady { model: ModelSize, status: &'static str },

    #[error("Model {current} is loaded; unload it before loading {requested}")]
    AlreadyLoaded { current: ModelSize, requested: ModelSize },

    #[error("No speech model is loaded")]
    NotLoaded,

    #[error("Failed to load model: {0}")]
    LoadFailed(String),

    #[error("Worker task failed: {0}")]
    WorkerFailed(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result of asking for a download.
#[derive(Debug)]
pub enum DownloadTicket {
    /// The tier's files are already in the cache
    AlreadyPresent,
    /// A background task is fetching the files
    Started(JoinHandle<()>),
}

/// Result of a successful `load`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { size: ModelSize, elapsed: Duration },
    AlreadyCurrent(ModelSize),
}

struct LoadedModel {
    size: ModelSize,
    engine: Arc<dyn SpeechEngine>,
}

/// Download status of every tier plus the one loaded model.
///
/// Shared as `Arc<ModelManager>`: `download` and `bootstrap` spawn tasks that
/// keep their own handle to it.
pub struct ModelManager {
    store: ModelStore,
    fetcher: Arc<dyn ModelFetcher>,
    loader: Arc<dyn ModelLoader>,
    tiers: RwLock<HashMap<ModelSize, ModelStatus>>,
    current: Arc<tokio::sync::Mutex<Option<LoadedModel>>>,
    current_name: RwLock<Option<ModelSize>>,
}

impl ModelManager {
    /// Build the manager; tiers whose files are already cached start `ready`.
    pub fn new(
        store: ModelStore,
        fetcher: Arc<dyn ModelFetcher>,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        let tiers = ModelSize::ALL
            .into_iter()
            .map(|size| {
                let status = if store.is_present(size) {
                    ModelStatus::Ready
                } else {
                    ModelStatus::NotDownloaded
                };
                (size, status)
            })
            .collect();

        Self {
            store,
            fetcher,
            loader,
            tiers: RwLock::new(tiers),
            current: Arc::new(tokio::sync::Mutex::new(None)),
            current_name: RwLock::new(None),
        }
    }

    fn status_of(&self, size: ModelSize) -> ModelStatus {
        self.tiers
            .read()
            .get(&size)
            .cloned()
            .unwrap_or(ModelStatus::NotDownloaded)
    }

    fn set_status(&self, size: ModelSize, status: ModelStatus) {
        self.tiers.write().insert(size, status);
    }

    /// Every tier in table order, merged with its live status.
    pub fn list_models(&self) -> Vec<ModelDescriptor> {
        let current = self.current_model();
        let tiers = self.tiers.read();
        ModelSize::ALL
            .into_iter()
            .map(|size| {
                let status = tiers.get(&size).cloned().unwrap_or(ModelStatus::NotDownloaded);
                ModelDescriptor::new(size, &status, current == Some(size))
            })
            .collect()
    }

    pub fn downloaded_models(&self) -> Vec<ModelSize> {
        let tiers = self.tiers.read();
        ModelSize::ALL
            .into_iter()
            .filter(|size| tiers.get(size).is_some_and(ModelStatus::is_ready))
            .collect()
    }

    pub fn get_status(&self, id: &str) -> Result<ModelDescriptor, ModelError> {
        let size: ModelSize = id.parse()?;
        let status = self.status_of(size);
        Ok(ModelDescriptor::new(
            size,
            &status,
            self.current_model() == Some(size),
        ))
    }

    pub fn current_model(&self) -> Option<ModelSize> {
        *self.current_name.read()
    }

    /// Start downloading a tier in the background.
    ///
    /// Returns immediately; progress is visible through `get_status`.
    pub fn download(self: &Arc<Self>, id: &str) -> Result<DownloadTicket, ModelError> {
        let size: ModelSize = id.parse()?;

        {
            let mut tiers = self.tiers.write();
            match tiers.get(&size) {
                Some(ModelStatus::Downloading { .. }) => {
                    return Err(ModelError::AlreadyDownloading(size));
                }
                Some(ModelStatus::Ready) => return Ok(DownloadTicket::AlreadyPresent),
                _ => {
                    tiers.insert(size, ModelStatus::Downloading { progress: 0 });
                }
            }
        }

        info!(model = %size, "Model download started");
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager.run_download(size).await;
        });
        Ok(DownloadTicket::Started(handle))
    }

    async fn run_download(self: Arc<Self>, size: ModelSize) {
        let start = Instant::now();
        let dest = self.store.model_dir(size);

        let weak = Arc::downgrade(&self);
        let progress: ProgressFn = Arc::new(move |pct: u8| {
            let Some(manager) = weak.upgrade() else { return };
            let mut tiers = manager.tiers.write();
            // Only ever move forward, and never report completion early.
            if let Some(ModelStatus::Downloading { progress }) = tiers.get_mut(&size) {
                let pct = pct.min(99);
                if pct > *progress {
                    *progress = pct;
                }
            }
        });

        let result = match self.fetcher.fetch(size, &dest, progress).await {
            Ok(()) if !self.store.is_present(size) => Err(anyhow::anyhow!(
                "download finished but model files are missing in {}",
                dest.display()
            )),
            other => other,
        };

        match result {
            Ok(()) => {
                self.set_status(size, ModelStatus::Ready);
                info!(
                    model = %size,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Model download completed"
                );
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(model = %size, error = %message, "Model download failed");
                self.store.discard_partial(size).await;
                self.set_status(size, ModelStatus::Failed { message });
            }
        }
    }

    /// Make a downloaded tier the current model.
    ///
    /// There is no implicit swap: loading a different tier while one is
    /// current fails with `AlreadyLoaded`.
    pub async fn load(&self, id: &str) -> Result<LoadOutcome, ModelError> {
        let size: ModelSize = id.parse()?;

        let status = self.status_of(size);
        if !status.is_ready() {
            return Err(ModelError::NotReady {
                model: size,
                status: status.label(),
            });
        }

        let current = Arc::clone(&self.current).lock_owned().await;
        if let Some(loaded) = current.as_ref() {
            if loaded.size == size {
                return Ok(LoadOutcome::AlreadyCurrent(size));
            }
            return Err(ModelError::AlreadyLoaded {
                current: loaded.size,
                requested: size,
            });
        }

        let start = Instant::now();
        let loader = Arc::clone(&self.loader);
        let dir = self.store.model_dir(size);
        // The guard rides along with the worker and comes back with the engine.
        let (mut current, loaded) = tokio::task::spawn_blocking(move || {
            let loaded = loader.load(size, &dir);
            (current, loaded)
        })
        .await
        .map_err(|e| ModelError::WorkerFailed(e.to_string()))?;

        let engine = loaded.map_err(|e| {
            let message = format!("{:#}", e);
            error!(model = %size, error = %message, "Model load failed");
            ModelError::LoadFailed(message)
        })?;

        *current = Some(LoadedModel { size, engine });
        *self.current_name.write() = Some(size);

        let elapsed = start.elapsed();
        info!(model = %size, elapsed_ms = elapsed.as_millis() as u64, "Model loaded");
        Ok(LoadOutcome::Loaded { size, elapsed })
    }

    /// Release the current model, returning which tier was released.
    pub async fn unload(&self) -> Option<ModelSize> {
        let mut current = self.current.lock().await;
        let released = current.take().map(|loaded| loaded.size);
        *self.current_name.write() = None;

        if let Some(size) = released {
            info!(model = %size, "Model unloaded");
        }
        released
    }

    /// Run the current model over one upload.
    ///
    /// The model lock is owned by the blocking worker until inference
    /// returns, so `load`/`unload` wait for in-flight transcriptions even
    /// when the request that started one has gone away.
    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        filename_hint: Option<String>,
    ) -> Result<(ModelSize, Transcript), ModelError> {
        let current = Arc::clone(&self.current).lock_owned().await;
        let loaded = current.as_ref().ok_or(ModelError::NotLoaded)?;
        let size = loaded.size;
        let engine = Arc::clone(&loaded.engine);

        let transcript = tokio::task::spawn_blocking(move || {
            let _held = current;
            engine.transcribe(&audio, filename_hint.as_deref())
        })
        .await
        .map_err(|e| ModelError::WorkerFailed(e.to_string()))??;

        Ok((size, transcript))
    }

    /// Load the configured tier at startup, downloading it first when allowed.
    ///
    /// Never fails the process: problems are logged and the server keeps
    /// running without a model.
    pub fn bootstrap(self: &Arc<Self>, size: ModelSize, auto_download: bool) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if !manager.status_of(size).is_ready() {
                if !auto_download {
                    warn!(model = %size, "Startup model is not downloaded and auto_download is off");
                    return;
                }
                match manager.download(size.as_str()) {
                    Ok(DownloadTicket::Started(handle)) => {
                        if let Err(e) = handle.await {
                            error!(model = %size, error = %e, "Startup download task failed");
                            return;
                        }
                    }
                    Ok(DownloadTicket::AlreadyPresent) => {}
                    Err(e) => {
                        warn!(model = %size, error = %e, "Could not start startup download");
                        return;
                    }
                }
            }

            match manager.load(size.as_str()).await {
                Ok(_) => info!(model = %size, "Startup model ready"),
                Err(e) => warn!(model = %size, error = %e, "Startup model was not loaded"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFetcher, FakeLoader};

    fn manager_with(
        cache: &tempfile::TempDir,
        fetcher: FakeFetcher,
        loader: FakeLoader,
    ) -> Arc<ModelManager> {
        Arc::new(ModelManager::new(
            ModelStore::new(cache.path()),
            Arc::new(fetcher),
            Arc::new(loader),
        ))
    }

    async fn download_and_wait(manager: &Arc<ModelManager>, id: &str) {
        match manager.download(id).unwrap() {
            DownloadTicket::Started(handle) => handle.await.unwrap(),
            DownloadTicket::AlreadyPresent => {}
        }
    }

    #[tokio::test]
    async fn test_initial_status_reflects_cache() {
        let cache = tempfile::tempdir().unwrap();
        crate::testing::write_model_files(&ModelStore::new(cache.path()), ModelSize::Small);

        let manager = manager_with(&cache, FakeFetcher::new(), FakeLoader::new());
        let models = manager.list_models();

        assert_eq!(models.len(), 5);
        assert_eq!(models[0].id, ModelSize::Tiny);
        assert_eq!(models[0].status, "not_downloaded");
        assert_eq!(models[2].status, "ready");
        assert_eq!(manager.downloaded_models(), vec![ModelSize::Small]);
        assert_eq!(manager.current_model(), None);
    }

    #[tokio::test]
    async fn test_download_completes_to_ready() {
        let cache = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new();
        let manager = manager_with(&cache, fetcher.clone(), FakeLoader::new());

        download_and_wait(&manager, "tiny").await;

        let status = manager.get_status("tiny").unwrap();
        assert_eq!(status.status, "ready");
        assert_eq!(status.progress, None);
        assert_eq!(fetcher.calls(), 1);

        // A ready tier is not fetched again.
        assert!(matches!(
            manager.download("tiny").unwrap(),
            DownloadTicket::AlreadyPresent
        ));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_progress_is_observable_and_bounded() {
        let cache = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::gated();
        let manager = manager_with(&cache, fetcher.clone(), FakeLoader::new());

        let handle = match manager.download("base").unwrap() {
            DownloadTicket::Started(handle) => handle,
            other => panic!("unexpected ticket: {:?}", other),
        };

        fetcher.wait_until_started().await;
        let status = manager.get_status("base").unwrap();
        assert_eq!(status.status, "downloading");
        assert!(status.progress.unwrap() <= 100);

        assert!(matches!(
            manager.download("base"),
            Err(ModelError::AlreadyDownloading(ModelSize::Base))
        ));

        fetcher.release();
        handle.await.unwrap();
        assert_eq!(manager.get_status("base").unwrap().status, "ready");
    }

    #[tokio::test]
    async fn test_failed_download_cleans_up_and_allows_retry() {
        let cache = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::failing("connection reset");
        let manager = manager_with(&cache, fetcher.clone(), FakeLoader::new());

        download_and_wait(&manager, "small").await;

        let status = manager.get_status("small").unwrap();
        assert_eq!(status.status, "failed");
        assert!(status.error.unwrap().contains("connection reset"));
        assert!(!cache.path().join("small").exists());

        fetcher.set_failure(None);
        download_and_wait(&manager, "small").await;
        assert_eq!(manager.get_status("small").unwrap().status, "ready");
    }

    #[tokio::test]
    async fn test_unknown_tier() {
        let cache = tempfile::tempdir().unwrap();
        let manager = manager_with(&cache, FakeFetcher::new(), FakeLoader::new());

        assert!(matches!(manager.get_status("xl"), Err(ModelError::UnknownModel(_))));
        assert!(matches!(manager.download("xl"), Err(ModelError::UnknownModel(_))));
        assert!(matches!(manager.load("xl").await, Err(ModelError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn test_load_requires_ready() {
        let cache = tempfile::tempdir().unwrap();
        let loader = FakeLoader::new();
        let manager = manager_with(&cache, FakeFetcher::new(), loader.clone());

        let err = manager.load("medium").await.unwrap_err();
        assert!(matches!(
            err,
            ModelError::NotReady { model: ModelSize::Medium, status: "not_downloaded" }
        ));
        assert_eq!(manager.current_model(), None);
        assert_eq!(loader.loads(), 0);
    }

    #[tokio::test]
    async fn test_load_unload_transitions() {
        let cache = tempfile::tempdir().unwrap();
        let loader = FakeLoader::new();
        let manager = manager_with(&cache, FakeFetcher::new(), loader.clone());
        download_and_wait(&manager, "tiny").await;
        download_and_wait(&manager, "base").await;

        assert!(matches!(
            manager.load("tiny").await.unwrap(),
            LoadOutcome::Loaded { size: ModelSize::Tiny, .. }
        ));
        assert_eq!(manager.current_model(), Some(ModelSize::Tiny));
        assert!(manager.get_status("tiny").unwrap().loaded);

        assert_eq!(
            manager.load("TINY").await.unwrap(),
            LoadOutcome::AlreadyCurrent(ModelSize::Tiny)
        );
        assert_eq!(loader.loads(), 1);

        assert!(matches!(
            manager.load("base").await,
            Err(ModelError::AlreadyLoaded { current: ModelSize::Tiny, requested: ModelSize::Base })
        ));
        assert_eq!(manager.current_model(), Some(ModelSize::Tiny));

        assert_eq!(manager.unload().await, Some(ModelSize::Tiny));
        assert_eq!(manager.unload().await, None);
        assert_eq!(manager.current_model(), None);

        manager.load("base").await.unwrap();
        assert_eq!(manager.current_model(), Some(ModelSize::Base));
    }

    #[tokio::test]
    async fn test_loader_failure_leaves_nothing_loaded() {
        let cache = tempfile::tempdir().unwrap();
        let manager = manager_with(&cache, FakeFetcher::new(), FakeLoader::failing());
        download_and_wait(&manager, "tiny").await;

        assert!(matches!(manager.load("tiny").await, Err(ModelError::LoadFailed(_))));
        assert_eq!(manager.current_model(), None);
        assert!(matches!(
            manager.transcribe(vec![1, 2, 3], None).await,
            Err(ModelError::NotLoaded)
        ));
    }

    #[tokio::test]
    async fn test_transcribe_uses_current_model() {
        let cache = tempfile::tempdir().unwrap();
        let manager = manager_with(&cache, FakeFetcher::new(), FakeLoader::with_text("你好世界"));
        download_and_wait(&manager, "small").await;

        assert!(matches!(
            manager.transcribe(b"audio".to_vec(), None).await,
            Err(ModelError::NotLoaded)
        ));

        manager.load("small").await.unwrap();
        let (size, transcript) = manager
            .transcribe(b"audio".to_vec(), Some("clip.webm".to_string()))
            .await
            .unwrap();
        assert_eq!(size, ModelSize::Small);
        assert_eq!(transcript.text, "你好世界");
    }

    #[tokio::test]
    async fn test_unload_waits_for_running_transcription() {
        let cache = tempfile::tempdir().unwrap();
        let loader = FakeLoader::slow(Duration::from_millis(300));
        let log = loader.log();
        let manager = manager_with(&cache, FakeFetcher::new(), loader);
        download_and_wait(&manager, "tiny").await;
        manager.load("tiny").await.unwrap();

        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.transcribe(b"audio".to_vec(), None).await }
        });
        log.wait_until_started().await;

        assert_eq!(manager.unload().await, Some(ModelSize::Tiny));
        assert_eq!(log.running(), 0);
        assert_eq!(log.finished(), 1);

        let (size, transcript) = task.await.unwrap().unwrap();
        assert_eq!(size, ModelSize::Tiny);
        assert_eq!(transcript.text, "hello world");
    }

    #[tokio::test]
    async fn test_abandoned_transcription_still_blocks_model_swap() {
        let cache = tempfile::tempdir().unwrap();
        let loader = FakeLoader::slow(Duration::from_millis(300));
        let log = loader.log();
        let manager = manager_with(&cache, FakeFetcher::new(), loader.clone());
        download_and_wait(&manager, "tiny").await;
        download_and_wait(&manager, "base").await;
        manager.load("tiny").await.unwrap();

        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.transcribe(b"audio".to_vec(), None).await }
        });
        log.wait_until_started().await;
        // Dropping the request future must not release the model lock.
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(manager.unload().await, Some(ModelSize::Tiny));
        assert_eq!(log.running(), 0);
        assert_eq!(log.finished(), 1);

        manager.load("base").await.unwrap();
        assert_eq!(manager.current_model(), Some(ModelSize::Base));
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test]
    async fn test_bootstrap_downloads_then_loads() {
        let cache = tempfile::tempdir().unwrap();
        let manager = manager_with(&cache, FakeFetcher::new(), FakeLoader::new());

        manager.bootstrap(ModelSize::Base, true).await.unwrap();
        assert_eq!(manager.current_model(), Some(ModelSize::Base));
    }

    #[tokio::test]
    async fn test_bootstrap_without_auto_download_does_nothing() {
        let cache = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new();
        let manager = manager_with(&cache, fetcher.clone(), FakeLoader::new());

        manager.bootstrap(ModelSize::Base, false).await.unwrap();
        assert_eq!(manager.current_model(), None);
        assert_eq!(fetcher.calls(), 0);
    }
}
