//! # LLM Config Registry
//!
//! CRUD store for saved LLM endpoints, persisted to `llm_configs.json`.
//!
//! ## Invariants:
//! - At most one config has `is_default == true`; making one default clears
//!   the others in the same write.
//! - API keys never leave the registry unmasked, except through
//!   `get_secret` / `get_default` which the LLM client uses.
//! - Every mutation is written to disk (temp file + rename) while the write
//!   lock is held. If the write fails the in-memory table is left untouched.
//!
//! ## File format:
//! A JSON array of configs. The older object form keyed by id,
//! `{ "<id>": { "name": ..., ... } }`, is still accepted on load and is
//! rewritten as an array on the next change.

use super::config::{
    is_masked, normalize_base_url, LlmConfig, LlmConfigPatch, LlmConfigView, NewLlmConfig,
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("LLM config not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidConfig(String),

    #[error("Failed to persist LLM configs: {0}")]
    Storage(String),
}

type Result<T> = std::result::Result<T, RegistryError>;

/// Entry of the legacy object-keyed file, where `id` may be missing.
#[derive(Deserialize)]
struct LegacyEntry {
    id: Option<String>,
    name: String,
    #[serde(default)]
    api_key: String,
    base_url: String,
    model: String,
    #[serde(default)]
    is_default: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredConfigs {
    List(Vec<LlmConfig>),
    Legacy(BTreeMap<String, LegacyEntry>),
}

impl StoredConfigs {
    fn into_configs(self) -> Vec<LlmConfig> {
        match self {
            StoredConfigs::List(configs) => configs,
            StoredConfigs::Legacy(map) => map
                .into_iter()
                .map(|(key, entry)| LlmConfig {
                    id: entry.id.unwrap_or(key),
                    name: entry.name,
                    api_key: entry.api_key,
                    base_url: entry.base_url,
                    model: entry.model,
                    is_default: entry.is_default,
                })
                .collect(),
        }
    }
}

/// Saved LLM endpoints, file-backed unless built with `in_memory`.
///
/// Reads clone out of a `RwLock`; writes go through `commit`, which
/// persists before swapping the new table in.
pub struct LlmConfigRegistry {
    path: Option<PathBuf>,
    configs: RwLock<Vec<LlmConfig>>,
}

impl LlmConfigRegistry {
    /// A registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            configs: RwLock::new(Vec::new()),
        }
    }

    /// Open the file-backed registry. A missing file is an empty registry; an
    /// unreadable or unparsable one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let configs = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| RegistryError::Storage(format!("{}: {}", path.display(), e)))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                let stored: StoredConfigs = serde_json::from_str(&raw).map_err(|e| {
                    RegistryError::Storage(format!("{} is not valid: {}", path.display(), e))
                })?;
                single_default(stored.into_configs())
            }
        } else {
            Vec::new()
        };

        info!(path = %path.display(), count = configs.len(), "Loaded LLM configs");
        Ok(Self {
            path: Some(path),
            configs: RwLock::new(configs),
        })
    }

    pub fn list(&self) -> Vec<LlmConfigView> {
        self.configs.read().iter().map(LlmConfigView::from).collect()
    }

    pub fn get(&self, id: &str) -> Result<LlmConfigView> {
        self.get_secret(id).map(|config| LlmConfigView::from(&config))
    }

    /// Full config including the real API key.
    pub fn get_secret(&self, id: &str) -> Result<LlmConfig> {
        self.configs
            .read()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// The config flagged default, if any. There is no fallback to another entry.
    pub fn get_default(&self) -> Option<LlmConfig> {
        self.configs.read().iter().find(|c| c.is_default).cloned()
    }

    pub fn create(&self, new: NewLlmConfig) -> Result<LlmConfigView> {
        let config = LlmConfig {
            id: Uuid::new_v4().to_string(),
            name: required("name", &new.name)?,
            api_key: new.api_key.trim().to_string(),
            base_url: normalize_base_url(&required("base_url", &new.base_url)?),
            model: required("model", &new.model)?,
            is_default: new.is_default,
        };

        let view = self.commit(|configs| {
            if config.is_default {
                clear_default(configs);
            }
            configs.push(config.clone());
            Ok(LlmConfigView::from(&config))
        })?;

        info!(config_id = %view.id, name = %view.name, is_default = view.is_default, "LLM config created");
        Ok(view)
    }

    pub fn update(&self, id: &str, patch: LlmConfigPatch) -> Result<LlmConfigView> {
        let name = patch.name.as_deref().map(|v| required("name", v)).transpose()?;
        let base_url = patch
            .base_url
            .as_deref()
            .map(|v| required("base_url", v).map(|v| normalize_base_url(&v)))
            .transpose()?;
        let model = patch.model.as_deref().map(|v| required("model", v)).transpose()?;
        let api_key = patch
            .api_key
            .filter(|key| !is_masked(key))
            .map(|key| key.trim().to_string());

        let view = self.commit(|configs| {
            let index = configs
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

            if patch.is_default == Some(true) {
                clear_default(configs);
            }

            let config = &mut configs[index];
            if let Some(name) = name {
                config.name = name;
            }
            if let Some(base_url) = base_url {
                config.base_url = base_url;
            }
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(api_key) = api_key {
                config.api_key = api_key;
            }
            if let Some(is_default) = patch.is_default {
                config.is_default = is_default;
            }
            Ok(LlmConfigView::from(&*config))
        })?;

        info!(config_id = %id, "LLM config updated");
        Ok(view)
    }

    /// Remove a config. Deleting the default leaves no default.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.commit(|configs| {
            let index = configs
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            configs.remove(index);
            Ok(())
        })?;

        info!(config_id = %id, "LLM config deleted");
        Ok(())
    }

    /// Apply `change` to a copy of the table, persist the copy, then swap it in.
    fn commit<T>(&self, change: impl FnOnce(&mut Vec<LlmConfig>) -> Result<T>) -> Result<T> {
        let mut guard = self.configs.write();
        let mut next = guard.clone();
        let out = change(&mut next)?;

        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        *guard = next;
        Ok(out)
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RegistryError::InvalidConfig(format!("{} must not be empty", field)));
    }
    Ok(value.to_string())
}

fn clear_default(configs: &mut [LlmConfig]) {
    for config in configs.iter_mut() {
        config.is_default = false;
    }
}

/// Hand-edited files can carry several defaults; keep the first.
fn single_default(mut configs: Vec<LlmConfig>) -> Vec<LlmConfig> {
    let mut seen = false;
    for config in configs.iter_mut().filter(|c| c.is_default) {
        if seen {
            warn!(config_id = %config.id, "Clearing extra default flag in LLM configs");
            config.is_default = false;
        }
        seen = true;
    }
    configs
}

fn persist(path: &Path, configs: &[LlmConfig]) -> Result<()> {
    let storage = |e: &dyn std::fmt::Display| RegistryError::Storage(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| storage(&e))?;
    }

    let json = serde_json::to_vec_pretty(configs).map_err(|e| storage(&e))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| storage(&e))?;
    std::fs::rename(&tmp, path).map_err(|e| storage(&e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_config(name: &str, key: &str, is_default: bool) -> NewLlmConfig {
        NewLlmConfig {
            name: name.to_string(),
            api_key: key.to_string(),
            base_url: "https://api.example.com/v1/".to_string(),
            model: "gpt-4o-mini".to_string(),
            is_default,
        }
    }

    fn default_count(registry: &LlmConfigRegistry) -> usize {
        registry.list().iter().filter(|c| c.is_default).count()
    }

    #[test]
    fn test_create_generates_id_and_masks() {
        let registry = LlmConfigRegistry::in_memory();
        let view = registry.create(new_config("main", "sk-abcdef123456", false)).unwrap();

        assert!(Uuid::parse_str(&view.id).is_ok());
        assert_eq!(view.api_key, "sk-a*******3456");
        assert_eq!(view.base_url, "https://api.example.com/v1");
        assert_eq!(registry.get_secret(&view.id).unwrap().api_key, "sk-abcdef123456");
    }

    #[test]
    fn test_create_rejects_empty_fields() {
        let registry = LlmConfigRegistry::in_memory();
        let mut bad = new_config("x", "k", false);
        bad.model = "  ".to_string();
        assert!(matches!(registry.create(bad), Err(RegistryError::InvalidConfig(_))));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_single_default_invariant() {
        let registry = LlmConfigRegistry::in_memory();
        let a = registry.create(new_config("a", "k1", true)).unwrap();
        let b = registry.create(new_config("b", "k2", true)).unwrap();
        assert_eq!(default_count(&registry), 1);
        assert_eq!(registry.get_default().unwrap().id, b.id);

        registry
            .update(&a.id, LlmConfigPatch { is_default: Some(true), ..Default::default() })
            .unwrap();
        assert_eq!(default_count(&registry), 1);
        assert_eq!(registry.get_default().unwrap().id, a.id);

        registry
            .update(&a.id, LlmConfigPatch { is_default: Some(false), ..Default::default() })
            .unwrap();
        assert_eq!(default_count(&registry), 0);
        assert!(registry.get_default().is_none());
    }

    #[test]
    fn test_update_preserves_secret_when_omitted_or_masked() {
        let registry = LlmConfigRegistry::in_memory();
        let view = registry.create(new_config("a", "sk-original-secret", false)).unwrap();

        registry
            .update(&view.id, LlmConfigPatch { name: Some("renamed".into()), ..Default::default() })
            .unwrap();
        registry
            .update(&view.id, LlmConfigPatch { api_key: Some(view.api_key.clone()), ..Default::default() })
            .unwrap();

        let stored = registry.get_secret(&view.id).unwrap();
        assert_eq!(stored.api_key, "sk-original-secret");
        assert_eq!(stored.name, "renamed");

        registry
            .update(&view.id, LlmConfigPatch { api_key: Some("sk-rotated".into()), ..Default::default() })
            .unwrap();
        assert_eq!(registry.get_secret(&view.id).unwrap().api_key, "sk-rotated");
    }

    #[test]
    fn test_update_validation_and_missing() {
        let registry = LlmConfigRegistry::in_memory();
        let view = registry.create(new_config("a", "k", false)).unwrap();

        let err = registry
            .update(&view.id, LlmConfigPatch { name: Some(String::new()), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidConfig(_)));

        let err = registry.update("missing", LlmConfigPatch::default()).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn test_delete_default_leaves_no_default() {
        let registry = LlmConfigRegistry::in_memory();
        let a = registry.create(new_config("a", "k1", true)).unwrap();
        registry.create(new_config("b", "k2", false)).unwrap();

        registry.delete(&a.id).unwrap();
        assert!(registry.get_default().is_none());
        assert_eq!(registry.list().len(), 1);
        assert!(matches!(registry.delete(&a.id), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm_configs.json");

        let id = {
            let registry = LlmConfigRegistry::open(&path).unwrap();
            registry.create(new_config("a", "sk-persisted-key", true)).unwrap().id
        };

        let reopened = LlmConfigRegistry::open(&path).unwrap();
        let default = reopened.get_default().unwrap();
        assert_eq!(default.id, id);
        assert_eq!(default.api_key, "sk-persisted-key");
        assert!(!dir.path().join("llm_configs.json.tmp").exists());
    }

    #[test]
    fn test_loads_legacy_object_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm_configs.json");
        std::fs::write(
            &path,
            r#"{
                "abc": {"name": "old", "api_key": "k", "base_url": "http://x", "model": "m", "is_default": true},
                "def": {"id": "def", "name": "other", "api_key": "k2", "base_url": "http://y", "model": "m", "is_default": true}
            }"#,
        )
        .unwrap();

        let registry = LlmConfigRegistry::open(&path).unwrap();
        assert_eq!(registry.list().len(), 2);
        assert_eq!(registry.get_secret("abc").unwrap().name, "old");
        assert_eq!(default_count(&registry), 1);
    }

    #[test]
    fn test_unparsable_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm_configs.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(LlmConfigRegistry::open(&path), Err(RegistryError::Storage(_))));
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let registry = LlmConfigRegistry::open(blocker.join("llm_configs.json")).unwrap();
        let err = registry.create(new_config("a", "k", true)).unwrap_err();
        assert!(matches!(err, RegistryError::Storage(_)));
        assert!(registry.list().is_empty());
    }
}
