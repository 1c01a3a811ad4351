//! Fakes for the model fetcher, loader and engine used across unit tests.

use crate::config::AppConfig;
use crate::llm::{LlmClient, LlmConfigRegistry};
use crate::state::AppState;
use crate::transcription::download::{ModelFetcher, ModelStore, ProgressFn, REQUIRED_FILES};
use crate::transcription::engine::{EngineError, ModelLoader, SpeechEngine, Transcript};
use crate::transcription::lifecycle::ModelManager;
use crate::transcription::model::ModelSize;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// App state over a temporary cache with fake fetcher and loader.
pub fn test_state(cache_dir: &Path) -> AppState {
    test_state_with(cache_dir, FakeFetcher::new(), FakeLoader::new())
}

pub fn test_state_with(cache_dir: &Path, fetcher: FakeFetcher, loader: FakeLoader) -> AppState {
    let mut config = AppConfig::default();
    config.model.cache_dir = cache_dir.join("models");
    config.llm.prompt_file = cache_dir.join("prompt.txt");
    config.audio.max_upload_mb = 1;

    let models = Arc::new(ModelManager::new(
        ModelStore::new(&config.model.cache_dir),
        Arc::new(fetcher),
        Arc::new(loader),
    ));
    let llm = Arc::new(LlmClient::new(
        config.llm.prompt_file.clone(),
        config.llm.request_timeout(),
        config.llm.test_timeout(),
    ));
    AppState::new(config, models, Arc::new(LlmConfigRegistry::in_memory()), llm)
}

/// Create the files that make a tier count as present.
pub fn write_model_files(store: &ModelStore, size: ModelSize) {
    let dir = store.model_dir(size);
    std::fs::create_dir_all(&dir).unwrap();
    for file in REQUIRED_FILES {
        std::fs::write(dir.join(file), b"{}").unwrap();
    }
}

#[derive(Clone, Default)]
pub struct FakeFetcher {
    calls: Arc<AtomicUsize>,
    failure: Arc<Mutex<Option<String>>>,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks inside `fetch` until `release` is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::default()
        }
    }

    /// Writes a partial file, then fails with `message`.
    pub fn failing(message: &str) -> Self {
        let fetcher = Self::default();
        fetcher.set_failure(Some(message));
        fetcher
    }

    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_string);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn wait_until_started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }
}

#[async_trait]
impl ModelFetcher for FakeFetcher {
    async fn fetch(&self, _size: ModelSize, dest: &Path, progress: ProgressFn) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(dest).await?;
        progress(10);
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let failure = self.failure.lock().clone();
        if let Some(message) = failure {
            tokio::fs::write(dest.join("model.safetensors.part"), b"partial").await?;
            anyhow::bail!("{}", message);
        }

        for (i, file) in REQUIRED_FILES.iter().enumerate() {
            tokio::fs::write(dest.join(file), b"{}").await?;
            progress(30 * (i as u8 + 1));
        }
        // Out-of-order and out-of-range reports must not move progress backwards or past 99.
        progress(5);
        progress(250);
        Ok(())
    }
}

/// Counters shared between a `FakeLoader` and every engine it builds.
#[derive(Default)]
pub struct InferenceLog {
    running: AtomicUsize,
    finished: AtomicUsize,
    started: Notify,
}

impl InferenceLog {
    /// Transcriptions currently inside the engine.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub async fn wait_until_started(&self) {
        self.started.notified().await;
    }
}

#[derive(Clone)]
pub struct FakeLoader {
    loads: Arc<AtomicUsize>,
    fail: bool,
    text: String,
    delay: Option<Duration>,
    log: Arc<InferenceLog>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::with_text("hello world")
    }

    pub fn with_text(text: &str) -> Self {
        Self {
            loads: Arc::new(AtomicUsize::new(0)),
            fail: false,
            text: text.to_string(),
            delay: None,
            log: Arc::new(InferenceLog::default()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Engines block the worker thread for `delay` on every transcription.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Arc<InferenceLog> {
        Arc::clone(&self.log)
    }
}

impl ModelLoader for FakeLoader {
    fn load(&self, size: ModelSize, model_dir: &Path) -> anyhow::Result<Arc<dyn SpeechEngine>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("corrupt weights in {}", model_dir.display());
        }
        Ok(Arc::new(FakeEngine {
            text: self.text.clone(),
            language: Some(format!("{}-lang", size)),
            delay: self.delay,
            log: Arc::clone(&self.log),
        }))
    }
}

/// Returns fixed text; rejects input that starts with `BAD`.
pub struct FakeEngine {
    text: String,
    language: Option<String>,
    delay: Option<Duration>,
    log: Arc<InferenceLog>,
}

impl SpeechEngine for FakeEngine {
    fn transcribe(&self, audio: &[u8], _filename_hint: Option<&str>) -> Result<Transcript, EngineError> {
        self.log.running.fetch_add(1, Ordering::SeqCst);
        self.log.started.notify_one();
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.log.running.fetch_sub(1, Ordering::SeqCst);
        self.log.finished.fetch_add(1, Ordering::SeqCst);

        if audio.starts_with(b"BAD") {
            return Err(EngineError::Decode("not audio".to_string()));
        }
        Ok(Transcript {
            text: self.text.clone(),
            language: self.language.clone(),
        })
    }
}

/// Build an actix test service over `configure_routes` with `$state` as app data.
macro_rules! test_app {
    ($state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($state.clone()))
                .configure($crate::handlers::configure_routes),
        )
        .await
    };
}

pub(crate) use test_app;
