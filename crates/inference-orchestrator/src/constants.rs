//! Orchestration-wide constants
//!
//! Single source of truth for limits, timeouts and configuration defaults.

/// Default values for session and provider configuration
pub mod defaults {
    /// Default sampling temperature
    pub const TEMPERATURE: f32 = 0.7;
    /// Default top-k sampling cutoff
    pub const TOP_K: u32 = 40;
    /// Default model for the local GPU engine
    pub const LOCAL_MODEL_ID: &str = "Llama-3.2-3B-Instruct-q4f16_1";
    /// Minimum accelerator memory (MB) for the local GPU engine to be probed
    pub const LOCAL_MIN_GPU_MEMORY_MB: u64 = 2048;
}

/// Timeout configuration (in milliseconds)
pub mod timeouts {
    /// Maximum time an availability probe may take before it is reported unavailable
    pub const PROBE_MS: u64 = 5_000;
    /// Request timeout for the remote API
    pub const REMOTE_REQUEST_MS: u64 = 60_000;
}

/// Recovery supervisor limits
pub mod recovery {
    /// Maximum number of recovery attempts before manual reset is required
    pub const MAX_ATTEMPTS: u32 = 3;
    /// Base backoff before a recovery attempt
    pub const BACKOFF_BASE_MS: u64 = 1_000;
    /// Upper bound on recovery backoff
    pub const BACKOFF_MAX_MS: u64 = 30_000;
}

/// Remote API defaults
pub mod remote {
    /// OpenAI-compatible base URL
    pub const BASE_URL: &str = "https://api.openai.com/v1";
    /// Default remote chat model
    pub const MODEL: &str = "gpt-4o-mini";
}
