//! # Transcription Gateway
//!
//! The single path an uploaded file takes: validate it, run the current
//! model, and optionally pass the text through the default LLM config.
//!
//! ## Text post-processing:
//! - Whisper may emit Traditional characters for Mandarin audio; every
//!   transcript is converted to Simplified Chinese (`zh-cn`).
//! - A transcript with no text becomes the placeholder `未识别到内容`
//!   ("nothing recognised") and is never sent for optimization.
//!
//! Optimization is best-effort. When it can't run or fails, the plain text
//! is still returned, with `optimization_error` explaining why.

use super::lifecycle::ModelManager;
use crate::error::{AppError, AppResult};
use crate::llm::{LlmClient, LlmConfigRegistry};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use zhconv::{zhconv, Variant};

/// Returned as `text` when the model heard nothing.
pub const EMPTY_TRANSCRIPT_TEXT: &str = "未识别到内容";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognitionResult {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization_error: Option<String>,
}

/// Upload-to-text pipeline shared by `/recognize` and `/api/optimize-text`.
///
/// ## Steps:
/// 1. Reject empty or oversized uploads (`BadRequest`)
/// 2. Run the current model (`ModelNotLoaded` when there is none)
/// 3. Trim and convert to Simplified Chinese, or use the empty placeholder
/// 4. When asked, optimize through the default LLM config (best-effort)
pub struct TranscriptionGateway {
    models: Arc<ModelManager>,
    registry: Arc<LlmConfigRegistry>,
    llm: Arc<LlmClient>,
    max_upload_bytes: usize,
}

impl TranscriptionGateway {
    pub fn new(
        models: Arc<ModelManager>,
        registry: Arc<LlmConfigRegistry>,
        llm: Arc<LlmClient>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            models,
            registry,
            llm,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        filename_hint: Option<String>,
        optimize: bool,
    ) -> AppResult<RecognitionResult> {
        if audio.is_empty() {
            return Err(AppError::BadRequest("Uploaded audio file is empty".to_string()));
        }
        if audio.len() > self.max_upload_bytes {
            return Err(AppError::BadRequest(format!(
                "Audio file too large ({} bytes). Maximum size is {} bytes",
                audio.len(),
                self.max_upload_bytes
            )));
        }

        let bytes = audio.len();
        let (model, transcript) = self.models.transcribe(audio, filename_hint).await?;
        info!(model = %model, bytes, chars = transcript.text.chars().count(), "Recognition finished");

        let recognised = !transcript.text.trim().is_empty();
        let mut result = RecognitionResult {
            text: simplified_text(&transcript.text),
            language: transcript.language,
            optimized_text: None,
            optimization_error: None,
        };

        if optimize && recognised {
            match self.optimize(&result.text).await {
                Ok(optimized) => result.optimized_text = Some(optimized),
                Err(e) => {
                    warn!(error = %e, "Optimization skipped");
                    result.optimization_error = Some(e.to_string());
                }
            }
        }

        Ok(result)
    }

    /// Run text through the default LLM config.
    pub async fn optimize(&self, text: &str) -> AppResult<String> {
        let config = self.registry.get_default().ok_or_else(|| {
            AppError::OptimizationUnavailable("No default LLM config is set".to_string())
        })?;
        Ok(self.llm.optimize(&config, text).await?)
    }
}

/// Trimmed Simplified Chinese text, or the placeholder when nothing was heard.
fn simplified_text(raw: &str) -> String {
    let text = raw.trim();
    if text.is_empty() {
        EMPTY_TRANSCRIPT_TEXT.to_string()
    } else {
        zhconv(text, Variant::ZhCN)
    }
}
