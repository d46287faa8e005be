//! Platform resolution: binding -> backend instance.

use crate::anthropic::AnthropicBackend;
use crate::error::ThinkError;
use crate::openai::{DEFAULT_OPENAI_BASE_URL, OpenAiCompatBackend};
use crate::scripted::ScriptedBackend;
use crate::types::AgentBackend;
use agora_core::BackendBinding;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Resolves a [`BackendBinding`] to a live backend.
///
/// Implemented by [`BackendFactory`] in production and by fixed maps in
/// tests, so controllers never construct provider clients themselves.
pub trait BackendResolver: Send + Sync {
    fn resolve(&self, binding: &BackendBinding) -> Result<Arc<dyn AgentBackend>, ThinkError>;
}

/// Per-platform connection settings from the settings registry.
#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

/// Production resolver backed by the platform registry and environment.
pub struct BackendFactory {
    platforms: HashMap<String, PlatformConfig>,
    request_timeout: Duration,
}

impl BackendFactory {
    pub fn new(platforms: HashMap<String, PlatformConfig>, request_timeout: Duration) -> Self {
        Self {
            platforms,
            request_timeout,
        }
    }

    /// Resolve the API key for a platform: registry value first, then the
    /// conventional environment variables.
    pub fn api_key_for(&self, platform: &str) -> Option<String> {
        self.api_key_for_with_env(platform, |key| std::env::var(key).ok())
    }

    /// Like [`Self::api_key_for`] with an explicit environment provider.
    ///
    /// This exists primarily to make tests deterministic without mutating
    /// the process-wide environment.
    #[doc(hidden)]
    pub fn api_key_for_with_env<F>(&self, platform: &str, mut env: F) -> Option<String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(config) = self.platforms.get(platform)
            && let Some(key) = config.api_key.as_ref().filter(|k| !k.is_empty())
        {
            return Some(key.clone());
        }
        let upper = platform.to_uppercase().replace('-', "_");
        env(&format!("AGORA_{upper}_API_KEY")).or_else(|| match platform {
            "anthropic" => env("ANTHROPIC_API_KEY"),
            "openai" => env("OPENAI_API_KEY"),
            _ => None,
        })
    }

    fn api_base_for(&self, platform: &str) -> Option<String> {
        self.platforms
            .get(platform)
            .and_then(|c| c.api_base.clone())
    }
}

impl BackendResolver for BackendFactory {
    fn resolve(&self, binding: &BackendBinding) -> Result<Arc<dyn AgentBackend>, ThinkError> {
        let platform = binding.platform.as_str();
        if platform == "scripted" {
            return Ok(Arc::new(ScriptedBackend::echoing()));
        }

        let api_key = self
            .api_key_for(platform)
            .ok_or_else(|| ThinkError::Permanent {
                message: format!("no API key configured for platform '{platform}'"),
            })?;

        match platform {
            "anthropic" => {
                let backend = match self.api_base_for(platform) {
                    Some(base) => {
                        AnthropicBackend::with_base_url(api_key, base, self.request_timeout)?
                    }
                    None => AnthropicBackend::new(api_key, self.request_timeout)?,
                };
                Ok(Arc::new(backend))
            }
            // Everything else is treated as an OpenAI-compatible gateway.
            _ => {
                let base = self
                    .api_base_for(platform)
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
                Ok(Arc::new(OpenAiCompatBackend::with_base_url(
                    api_key,
                    base,
                    self.request_timeout,
                )?))
            }
        }
    }
}
