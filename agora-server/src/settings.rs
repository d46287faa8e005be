//! Platform settings: API keys, base URLs, and model registries.
//!
//! Persisted as TOML next to the room data. Secrets layer in from the
//! environment at resolution time; the file value wins when present.

use agora_backend::{AgentBackend, BackendFactory, BackendResolver, PlatformConfig, ThinkError};
use agora_core::BackendBinding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::fs;

const MASKED_KEY: &str = "********";

/// Connection settings for one model platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    pub enabled_models: Vec<String>,
    pub default_model: String,
}

/// The whole settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_platform: String,
    pub platforms: BTreeMap<String, PlatformSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut platforms = BTreeMap::new();
        platforms.insert(
            "anthropic".to_string(),
            PlatformSettings {
                api_key: String::new(),
                api_base: None,
                enabled_models: vec![
                    "claude-sonnet-4-5".to_string(),
                    "claude-3-5-haiku-latest".to_string(),
                ],
                default_model: "claude-sonnet-4-5".to_string(),
            },
        );
        platforms.insert(
            "openai".to_string(),
            PlatformSettings {
                api_key: String::new(),
                api_base: Some("https://api.openai.com/v1".to_string()),
                enabled_models: vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
                default_model: "gpt-4o-mini".to_string(),
            },
        );
        Self {
            default_platform: "anthropic".to_string(),
            platforms,
        }
    }
}

impl Settings {
    /// Copy with API keys masked for readback.
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        for platform in masked.platforms.values_mut() {
            if !platform.api_key.is_empty() {
                platform.api_key = MASKED_KEY.to_string();
            }
        }
        masked
    }

    /// Merge an update, keeping stored keys where the client sent the mask
    /// back unchanged.
    pub fn apply_update(&mut self, update: Settings) {
        for (name, mut platform) in update.platforms {
            if platform.api_key == MASKED_KEY {
                if let Some(existing) = self.platforms.get(&name) {
                    platform.api_key = existing.api_key.clone();
                }
            }
            self.platforms.insert(name, platform);
        }
        if !update.default_platform.is_empty() {
            self.default_platform = update.default_platform;
        }
    }
}

/// Loads, persists, and shares the settings document.
pub struct SettingsManager {
    path: PathBuf,
    shared: Arc<RwLock<Settings>>,
    think_timeout: Duration,
}

impl SettingsManager {
    pub fn new(path: PathBuf, think_timeout: Duration) -> Self {
        Self {
            path,
            shared: Arc::new(RwLock::new(Settings::default())),
            think_timeout,
        }
    }

    /// Load from disk; a missing file keeps the defaults.
    pub async fn load(&self) -> Result<(), SettingsError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let settings: Settings = toml::from_str(&contents)?;
                *self.shared.write().expect("settings lock poisoned") = settings;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn current(&self) -> Settings {
        self.shared.read().expect("settings lock poisoned").clone()
    }

    /// Apply and persist an update.
    pub async fn update(&self, update: Settings) -> Result<Settings, SettingsError> {
        let merged = {
            let mut guard = self.shared.write().expect("settings lock poisoned");
            guard.apply_update(update);
            guard.clone()
        };
        let rendered = toml::to_string_pretty(&merged)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = self.path.with_extension("toml.tmp");
        fs::write(&temp, rendered).await?;
        fs::rename(&temp, &self.path).await?;
        Ok(merged)
    }

    /// Backend resolver view over the live settings.
    pub fn resolver(&self) -> Arc<dyn BackendResolver> {
        Arc::new(SettingsResolver {
            shared: Arc::clone(&self.shared),
            think_timeout: self.think_timeout,
        })
    }

    /// Probe connectivity for one platform/model pair.
    pub async fn probe(&self, platform: &str, model: &str) -> Result<Duration, ThinkError> {
        let resolver = self.resolver();
        let backend: Arc<dyn AgentBackend> = resolver.resolve(&BackendBinding {
            platform: platform.to_string(),
            model: model.to_string(),
        })?;
        let started = std::time::Instant::now();
        backend.health_check(model).await?;
        Ok(started.elapsed())
    }
}

/// [`BackendResolver`] that rebuilds its factory from the current settings
/// on every resolution, so settings updates apply to the next session
/// without a restart.
struct SettingsResolver {
    shared: Arc<RwLock<Settings>>,
    think_timeout: Duration,
}

impl BackendResolver for SettingsResolver {
    fn resolve(&self, binding: &BackendBinding) -> Result<Arc<dyn AgentBackend>, ThinkError> {
        let settings = self.shared.read().expect("settings lock poisoned").clone();
        let platforms = settings
            .platforms
            .into_iter()
            .map(|(name, platform)| {
                (
                    name,
                    PlatformConfig {
                        api_key: (!platform.api_key.is_empty()).then_some(platform.api_key),
                        api_base: platform.api_base,
                    },
                )
            })
            .collect();
        BackendFactory::new(platforms, self.think_timeout).resolve(binding)
    }
}

/// Settings persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("settings render error: {0}")]
    Render(#[from] toml::ser::Error),
}
