//! Provider orchestration for interchangeable AI inference backends
//!
//! This library puts several inference backends behind one contract:
//! - **native**: Platform-provided on-device model API
//! - **local-gpu**: Local GPU engine that downloads and loads model weights
//! - **remote-api**: OpenAI-compatible HTTP API (never auto-selected)
//!
//! The [`ProviderManager`] probes and selects providers and owns the active
//! session; every provider streams deltas through the same cancellation
//! protocol; the [`RecoverySupervisor`] retries a bounded number of times
//! when the device is lost.
//!
//! # Example
//!
//! ```rust,ignore
//! use inference_orchestrator::{ManagerConfig, ProviderManager, RecoverySupervisor};
//! use tokio_util::sync::CancellationToken;
//!
//! let manager = Arc::new(ProviderManager::new(ManagerConfig::default()));
//! manager.register_provider(Arc::new(NativeProvider::new(platform_api)));
//! manager.register_provider(Arc::new(LocalGpuProvider::new(engine, Default::default())));
//!
//! manager.auto_select_provider().await;
//! let mut stream = manager.prompt_active("Hello", CancellationToken::new()).await?;
//! while let Some(delta) = stream.next().await {
//!     print!("{}", delta?);
//! }
//!
//! let supervisor = RecoverySupervisor::new(Default::default(), manager.clone());
//! supervisor.handle_loss("device lost").await;
//! ```

pub mod config;
pub mod constants;
pub mod manager;
pub mod provider;
pub mod recovery;
pub mod stream;
pub mod types;

// Re-exports for convenience
pub use config::{
    LocalGpuConfig, ManagerConfig, OrchestratorConfig, ProviderConfig, RecoveryConfig,
    RemoteApiConfig, SessionConfig,
};
pub use manager::{ManagerError, ProviderFailure, ProviderManager};
pub use provider::{
    with_timeout, InferenceProvider, ProgressReporter, ProviderError, ProviderRegistry,
};

#[cfg(feature = "provider-native")]
pub use provider::{NativeAvailability, NativeModelApi, NativeProvider, NativeSession};

#[cfg(feature = "provider-local-gpu")]
pub use provider::{GenerationRequest, LocalEngine, LocalGpuProvider};

#[cfg(feature = "provider-remote")]
pub use provider::RemoteApiProvider;

pub use recovery::{
    NullEventSink, RecoveryError, RecoveryEvent, RecoveryEventSink, RecoveryHost,
    RecoveryOutcome, RecoveryStatus, RecoverySupervisor, VecEventSink,
};
pub use stream::{cancellable_stream, ChunkSource, DeltaNormalizer, GenerationSlot, TextStream};
pub use types::{
    Availability, ChatRole, ChatTurn, ChunkSemantics, DownloadProgress, HardwareProfile,
    ProgressPhase, ProviderDescriptor, ProviderKind, ProviderReport, ProviderState, Session,
    SessionId,
};
