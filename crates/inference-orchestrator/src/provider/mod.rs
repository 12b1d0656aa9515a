//! Pluggable inference provider abstraction
//!
//! Every backend (platform-native model, local GPU engine, remote API)
//! implements [`InferenceProvider`]. The manager only ever talks to this
//! trait; session state and transports stay private to each provider.

pub mod progress;
pub mod registry;
pub(crate) mod sessions;

#[cfg(feature = "provider-native")]
pub mod native;

#[cfg(feature = "provider-local-gpu")]
pub mod local_gpu;

#[cfg(feature = "provider-remote")]
pub mod remote;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ProviderConfig, SessionConfig};
use crate::stream::TextStream;
use crate::types::{
    Availability, DownloadProgress, HardwareProfile, ProviderDescriptor, ProviderKind,
    ProviderState, Session,
};

#[cfg(feature = "provider-native")]
pub use native::{NativeAvailability, NativeModelApi, NativeProvider, NativeSession};

#[cfg(feature = "provider-local-gpu")]
pub use local_gpu::{GenerationRequest, LocalEngine, LocalGpuProvider};

#[cfg(feature = "provider-remote")]
pub use remote::RemoteApiProvider;

pub use progress::ProgressReporter;
pub use registry::ProviderRegistry;

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Streaming error: {0}")]
    Streaming(String),

    /// The caller cancelled the request. A control signal, not a failure.
    #[error("Stream cancelled")]
    StreamCancelled,

    /// The accelerator or engine context was lost; route to the recovery supervisor
    #[error("Resource lost: {0}")]
    ResourceLost(String),

    #[error("Timed out after {0:?}: {1}")]
    Timeout(Duration, String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dispose failed: {0}")]
    Dispose(String),

    #[cfg(feature = "provider-remote")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// Whether this is the caller's own cancellation rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ProviderError::StreamCancelled)
    }

    /// Whether this should be handed to the recovery supervisor
    pub fn is_resource_loss(&self) -> bool {
        matches!(self, ProviderError::ResourceLost(_))
    }
}

/// Race `fut` against a timer, failing with [`ProviderError::Timeout`]
pub async fn with_timeout<T, F>(duration: Duration, what: &str, fut: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(duration, what.to_string())),
    }
}

/// The contract every inference backend implements.
///
/// Providers are shared behind `Arc`, so all methods take `&self` and keep
/// their mutable state behind interior locks. After [`dispose`] a provider
/// must accept a fresh [`initialize`] as if newly constructed.
///
/// [`dispose`]: InferenceProvider::dispose
/// [`initialize`]: InferenceProvider::initialize
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    // ─── IDENTITY ───────────────────────────────────────────────────

    /// Static identity (name, kind, description, native chunking)
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Registry key
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn kind(&self) -> ProviderKind {
        self.descriptor().kind
    }

    /// Whether the host's hardware can run this provider at all.
    /// Providers the profile rules out are never probed.
    fn supports_hardware(&self, _profile: &HardwareProfile) -> bool {
        true
    }

    // ─── LIFECYCLE ──────────────────────────────────────────────────

    /// Probe whether the provider can serve requests right now.
    ///
    /// Never fails: internal errors become `available: false` with a reason.
    async fn check_availability(&self) -> Availability;

    /// Prepare the backend, downloading model weights if needed.
    ///
    /// Returns immediately when already initialized for the same model. On
    /// failure partial state is torn down so a retry starts clean.
    async fn initialize(&self, config: &ProviderConfig) -> Result<(), ProviderError>;

    /// Current lifecycle state
    fn state(&self) -> ProviderState;

    /// Snapshot of download/load progress; `None` when nothing is loading
    fn progress(&self) -> Option<DownloadProgress> {
        None
    }

    /// Release every session and backend resource.
    ///
    /// Implementations absorb what they can; an `Err` reports a resource that
    /// could not be released cleanly but the provider is still reset.
    async fn dispose(&self) -> Result<(), ProviderError>;

    // ─── SESSIONS ───────────────────────────────────────────────────

    /// Create a session. Fails with [`ProviderError::Session`] before a
    /// successful `initialize`.
    async fn create_session(&self, config: &SessionConfig) -> Result<Session, ProviderError>;

    /// Stream the response to `text` as deltas.
    ///
    /// `cancel` belongs to this request only. Fails with
    /// [`ProviderError::Streaming`] if the session is unknown to this provider
    /// or already generating.
    async fn prompt_streaming(
        &self,
        session: &Session,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<TextStream, ProviderError>;

    /// Best-effort session teardown; unknown or already destroyed sessions
    /// are a no-op.
    async fn destroy_session(&self, session: &Session);
}
