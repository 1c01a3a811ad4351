//! # Model Downloads
//!
//! Fetches the files of one Whisper tier from a Hugging Face compatible hub
//! into the local model cache.
//!
//! ## Cache layout:
//! ```text
//! {cache_dir}/
//!   tiny/
//!     config.json
//!     tokenizer.json
//!     model.safetensors
//!   medium/
//!     ...
//! ```
//! Each file is streamed to `<name>.part` and renamed once complete, so a
//! tier only counts as present when every final file exists.

use super::model::ModelSize;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Files that make up a usable tier, weights last.
pub const REQUIRED_FILES: [&str; 3] = [CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE];

/// Progress callback, called with a percentage in `0..=99`; the caller marks
/// completion itself.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Where tiers live on disk.
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn model_dir(&self, size: ModelSize) -> PathBuf {
        self.root.join(size.as_str())
    }

    pub fn is_present(&self, size: ModelSize) -> bool {
        let dir = self.model_dir(size);
        REQUIRED_FILES.iter().all(|file| dir.join(file).is_file())
    }

    /// Remove whatever a failed download left behind.
    pub async fn discard_partial(&self, size: ModelSize) {
        let dir = self.model_dir(size);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(model = %size, error = %e, "Failed to remove partial download");
            }
        }
    }
}

/// Source of model files.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    /// Download every file in `REQUIRED_FILES` for `size` into `dest`.
    async fn fetch(&self, size: ModelSize, dest: &Path, progress: ProgressFn) -> Result<()>;
}

/// Downloads from `{endpoint}/{repo}/resolve/main/{file}`.
pub struct HubFetcher {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HubFetcher {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Uses `HF_TOKEN` when set, for gated or rate-limited hubs.
    pub fn from_env(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, std::env::var("HF_TOKEN").ok())
    }

    fn file_url(&self, size: ModelSize, file: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.endpoint, size.repo_name(), file)
    }

    async fn download_file(
        &self,
        url: &str,
        file_path: &Path,
        mut on_chunk: impl FnMut(u64, u64),
    ) -> Result<()> {
        let part_path = file_path.with_extension(format!(
            "{}.part",
            file_path.extension().and_then(|e| e.to_str()).unwrap_or("")
        ));

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        if !response.status().is_success() {
            return Err(anyhow!("{} returned HTTP {}", url, response.status()));
        }
        let total_size = response.content_length().unwrap_or(0);

        let mut file = File::create(&part_path).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Download of {} interrupted", url))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            on_chunk(downloaded, total_size);
        }

        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part_path, file_path).await?;
        debug!(url, bytes = downloaded, "Downloaded file");
        Ok(())
    }
}

#[async_trait]
impl ModelFetcher for HubFetcher {
    async fn fetch(&self, size: ModelSize, dest: &Path, progress: ProgressFn) -> Result<()> {
        tokio::fs::create_dir_all(dest).await?;
        info!(model = %size, repo = size.repo_name(), "Downloading model files");

        // config and tokenizer are tiny next to the weights
        for file in [CONFIG_FILE, TOKENIZER_FILE] {
            self.download_file(&self.file_url(size, file), &dest.join(file), |_, _| {})
                .await?;
        }
        progress(1);

        let report = progress.clone();
        self.download_file(
            &self.file_url(size, WEIGHTS_FILE),
            &dest.join(WEIGHTS_FILE),
            move |done, total| {
                if total > 0 {
                    let pct = 1 + (done.min(total) * 98 / total) as u8;
                    report(pct.min(99));
                }
            },
        )
        .await?;

        progress(99);
        Ok(())
    }
}
