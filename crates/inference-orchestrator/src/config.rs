//! Configuration types for the orchestration layer

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, recovery, remote, timeouts};
use crate::provider::ProviderError;

/// Per-session generation settings accepted by `create_session`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Sampling temperature, must lie in `[0, 1]`
    pub temperature: f32,
    /// Top-k sampling cutoff, must be positive
    pub top_k: u32,
    /// Upper bound on generated tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// System prompt prepended to the conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Model override for providers that host several models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            temperature: defaults::TEMPERATURE,
            top_k: defaults::TOP_K,
            max_tokens: None,
            system_prompt: None,
            model_id: None,
        }
    }
}

impl SessionConfig {
    /// Reject values outside the accepted ranges
    pub fn validate(&self) -> Result<(), ProviderError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ProviderError::Config(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        if self.top_k == 0 {
            return Err(ProviderError::Config("top_k must be positive".to_string()));
        }
        if self.max_tokens == Some(0) {
            return Err(ProviderError::Config(
                "max_tokens must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings passed to `initialize`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Model to load; providers fall back to their own default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl ProviderConfig {
    pub fn with_model(model_id: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
        }
    }
}

/// Provider manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerConfig {
    /// Time budget for each availability probe
    pub probe_timeout_ms: u64,
    /// Time budget for `initialize` during selection; unbounded when unset
    /// since model downloads can legitimately take minutes
    pub initialize_timeout_ms: Option<u64>,
    /// Provider settings used when (re)initializing the active provider
    pub provider: ProviderConfig,
    /// Session settings used when the manager creates the active session
    pub session: SessionConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: timeouts::PROBE_MS,
            initialize_timeout_ms: None,
            provider: ProviderConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Recovery supervisor settings
///
/// The attempt budget is fixed at [`recovery::MAX_ATTEMPTS`]; only the
/// backoff between attempts is tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoveryConfig {
    /// Base backoff in milliseconds
    pub backoff_base_ms: u64,
    /// Maximum backoff in milliseconds
    pub backoff_max_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: recovery::BACKOFF_BASE_MS,
            backoff_max_ms: recovery::BACKOFF_MAX_MS,
        }
    }
}

impl RecoveryConfig {
    /// No delay between attempts
    pub fn immediate() -> Self {
        Self {
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }
}

/// Local GPU engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalGpuConfig {
    /// Model loaded when `initialize` is called without a model
    pub default_model_id: String,
    /// Accelerator memory required before the engine is worth probing
    pub min_gpu_memory_mb: u64,
}

impl Default for LocalGpuConfig {
    fn default() -> Self {
        Self {
            default_model_id: defaults::LOCAL_MODEL_ID.to_string(),
            min_gpu_memory_mb: defaults::LOCAL_MIN_GPU_MEMORY_MB,
        }
    }
}

/// Remote API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteApiConfig {
    /// OpenAI-compatible base URL (without trailing `/chat/completions`)
    pub base_url: String,
    /// Bearer token; the provider reports itself unavailable without one
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model name sent with every request
    pub model: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for RemoteApiConfig {
    fn default() -> Self {
        Self {
            base_url: remote::BASE_URL.to_string(),
            api_key: None,
            model: remote::MODEL.to_string(),
            request_timeout_ms: timeouts::REMOTE_REQUEST_MS,
        }
    }
}

/// Top-level configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    pub manager: ManagerConfig,
    pub recovery: RecoveryConfig,
    pub local_gpu: LocalGpuConfig,
    pub remote: RemoteApiConfig,
}

impl OrchestratorConfig {
    /// Parse a JSON configuration document; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self, ProviderError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ProviderError::Config(format!("Invalid configuration: {}", e)))?;
        config.manager.session.validate()?;
        Ok(config)
    }
}
