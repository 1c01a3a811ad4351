//! LLM endpoint configuration records and their public (masked) form.

use serde::{Deserialize, Serialize};

/// One saved OpenAI-compatible endpoint.
///
/// This is the stored form and carries the real API key; everything that
/// leaves the process goes through [`LlmConfigView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Hide all but the first and last four characters of a key.
///
/// Keys of eight characters or fewer are masked completely.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}{}", head, "*".repeat(chars.len() - 8), tail)
    } else {
        "*".repeat(chars.len())
    }
}

/// A key coming back from a client that still contains the mask character
/// is the masked copy we sent out, not a new secret.
pub fn is_masked(key: &str) -> bool {
    key.contains('*')
}

/// Config as returned over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LlmConfigView {
    pub id: String,
    pub name: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub is_default: bool,
}

impl From<&LlmConfig> for LlmConfigView {
    fn from(config: &LlmConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            api_key: mask_api_key(&config.api_key),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            is_default: config.is_default,
        }
    }
}

/// Body of `POST /api/llm-configs`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewLlmConfig {
    pub name: String,
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Body of `PUT /api/llm-configs/{id}`; omitted fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmConfigPatch {
    pub name: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub is_default: Option<bool>,
}

/// Base URLs are stored without a trailing slash so `{base_url}/chat/completions`
/// never doubles it.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
