//! # Configuration Management
//!
//! This module loads the process configuration from several layered sources:
//! - Default values (built into the code)
//! - The TOML configuration file (`config.toml`, required)
//! - Environment variables (with the `APP_` prefix)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` environment variables (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_MODEL__NAME`, etc.)
//! 3. Configuration file (`config.toml`, or the path in `APP_CONFIG_FILE`)
//! 4. Default values (defined in the Default impl)
//!
//! ## Runtime mutability:
//! The configuration is read once at startup and never changes afterwards.
//! Switching the listening port or the startup model requires a restart; the
//! model can still be swapped at runtime through the model management API.

use crate::transcription::model::ModelSize;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that points at an alternative configuration file.
pub const CONFIG_FILE_ENV: &str = "APP_CONFIG_FILE";

/// Configuration file used when `APP_CONFIG_FILE` is not set.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Main application configuration that contains all settings.
///
/// ## File layout:
/// ```toml
/// [server]
/// host = "0.0.0.0"
/// port = 8000
///
/// [model]
/// name = "medium"
/// ```
/// Every other section is optional and falls back to its defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub llm: LlmSettings,
    pub audio: AudioSettings,
}

/// HTTP listener settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost
/// - `host = "0.0.0.0"`: Accept connections from any interface (the default, so
///   phones on the same network can use the recording page)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech model settings.
///
/// ## Fields:
/// - `name`: Which Whisper tier to load at startup ("tiny", "base", "small", "medium", "large")
/// - `cache_dir`: Where downloaded model files are stored, one sub-directory per tier
/// - `hub_endpoint`: Base URL of the Hugging Face compatible hub used for downloads
/// - `auto_download`: Download the startup model in the background if it is missing
/// - `device`: Inference device preference ("auto", "cpu", "cuda", "metal")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub cache_dir: PathBuf,
    pub hub_endpoint: String,
    pub auto_download: bool,
    pub device: String,
}

/// Settings for the text optimization feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// JSON file holding the saved LLM endpoint configurations
    pub configs_file: PathBuf,
    /// Optional file overriding the built-in system prompt
    pub prompt_file: PathBuf,
    /// Deadline for optimization requests
    pub request_timeout_secs: u64,
    /// Deadline for connectivity probes
    pub test_timeout_secs: u64,
}

/// Settings for uploaded audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Language hint passed to the model ("zh", "en", ... or "auto")
    pub language: String,
    /// Largest accepted upload, in megabytes
    pub max_upload_mb: usize,
    /// ffmpeg executable used for everything that is not WAV
    pub ffmpeg_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            model: ModelConfig {
                name: "medium".to_string(),          // Good accuracy for Chinese speech
                cache_dir: PathBuf::from("models"),
                hub_endpoint: "https://huggingface.co".to_string(),
                auto_download: true,
                device: "auto".to_string(),
            },
            llm: LlmSettings {
                configs_file: PathBuf::from("llm_configs.json"),
                prompt_file: PathBuf::from("prompt.txt"),
                request_timeout_secs: 60,
                test_timeout_secs: 30,
            },
            audio: AudioSettings {
                language: "zh".to_string(),
                max_upload_mb: 50,
                ffmpeg_path: "ffmpeg".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file location.
    ///
    /// The file named by `APP_CONFIG_FILE` (or `config.toml`) must exist: a
    /// missing or unreadable configuration file is fatal at startup.
    pub fn load() -> Result<Self> {
        let path = env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load configuration from an explicit file path.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_MODEL__NAME=small`: Override the startup model
    /// - `APP_LLM__CONFIGS_FILE=/data/llm.json`: Move the LLM config store
    /// - `HOST=0.0.0.0`, `PORT=3000`: Special cases for deployment platforms
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }

        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The startup model names a known tier
    /// - The device preference is recognised
    /// - Upload limit and timeouts are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        self.startup_model()?;

        self.model
            .device
            .parse::<crate::device::DevicePreference>()
            .map_err(|e| anyhow::anyhow!(e))?;

        if self.model.hub_endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Model hub endpoint cannot be empty"));
        }

        if self.audio.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("Maximum upload size must be greater than 0"));
        }

        if self.llm.request_timeout_secs == 0 || self.llm.test_timeout_secs == 0 {
            return Err(anyhow::anyhow!("LLM timeouts must be greater than 0"));
        }

        Ok(())
    }

    /// The tier configured in `[model] name`.
    pub fn startup_model(&self) -> Result<ModelSize> {
        self.model
            .name
            .parse::<ModelSize>()
            .map_err(|e| anyhow::anyhow!("Invalid [model] name: {}", e))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.audio.max_upload_mb * 1024 * 1024
    }

    /// Language hint for the model; `"auto"` lets the model detect it.
    pub fn language_hint(&self) -> Option<String> {
        match self.audio.language.trim() {
            "" | "auto" => None,
            lang => Some(lang.to_lowercase()),
        }
    }
}

impl LlmSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
}
