//! # Whisper Model Tiers
//!
//! The fixed table of Whisper tiers this service knows how to fetch and load,
//! and the descriptor returned to clients when they ask about a tier.
//!
//! ## Tier trade-offs:
//! - **tiny / base**: fast, fine for testing and short English clips
//! - **small**: balanced speed and accuracy
//! - **medium**: good accuracy, handles Chinese and technical vocabulary
//! - **large**: best accuracy, slow on CPU

use super::lifecycle::ModelError;
use serde::{Deserialize, Serialize};

/// Available Whisper model sizes with their characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Every tier, in the order they are listed to clients.
    pub const ALL: [ModelSize; 5] = [
        ModelSize::Tiny,
        ModelSize::Base,
        ModelSize::Small,
        ModelSize::Medium,
        ModelSize::Large,
    ];

    /// Get the HuggingFace model repository name.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }

    /// Get the approximate model size in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }

    pub fn performance(&self) -> &'static str {
        match self {
            ModelSize::Tiny | ModelSize::Base => "fast",
            ModelSize::Small => "balanced",
            ModelSize::Medium | ModelSize::Large => "accurate",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "Fastest, basic accuracy",
            ModelSize::Base => "Fast, good for testing",
            ModelSize::Small => "Balanced speed and accuracy",
            ModelSize::Medium => "Good accuracy, recommended for Chinese speech",
            ModelSize::Large => "Best accuracy, slower processing",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ModelSize::ALL
            .into_iter()
            .find(|size| size.as_str() == wanted)
            .ok_or_else(|| ModelError::UnknownModel(s.to_string()))
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Download state of one tier.
///
/// ```text
/// NotDownloaded ──► Downloading ──► Ready
///                       │
///                       └──► Failed ──► Downloading (retry)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    NotDownloaded,
    Downloading { progress: u8 },
    Ready,
    Failed { message: String },
}

impl ModelStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ModelStatus::NotDownloaded => "not_downloaded",
            ModelStatus::Downloading { .. } => "downloading",
            ModelStatus::Ready => "ready",
            ModelStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ModelStatus::Ready)
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Public view of one tier: the static table merged with live status.
///
/// `progress` is only serialized while downloading and `error` only after a
/// failed download.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: ModelSize,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub loaded: bool,
    pub size_mb: u32,
    pub description: &'static str,
    pub performance: &'static str,
}

impl ModelDescriptor {
    pub fn new(size: ModelSize, status: &ModelStatus, loaded: bool) -> Self {
        let (progress, error) = match status {
            ModelStatus::Downloading { progress } => (Some((*progress).min(100)), None),
            ModelStatus::Failed { message } => (None, Some(message.clone())),
            _ => (None, None),
        };

        Self {
            id: size,
            status: status.label(),
            progress,
            error,
            loaded,
            size_mb: size.size_mb(),
            description: size.description(),
            performance: size.performance(),
        }
    }
}
