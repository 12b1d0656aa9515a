//! Platform-native model provider
//!
//! Adapts a built-in platform language model (an OS or browser prompt API)
//! to the provider contract. The platform API itself is supplied by the host
//! through [`NativeModelApi`]; its transport reports the whole response so
//! far on every chunk, which this provider normalizes to deltas.
//!
//! When the platform reports the model as downloadable, `initialize` drives
//! the download through [`NativeModelApi::download`] and serves its progress
//! from [`InferenceProvider::progress`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressReporter;
use super::sessions::{effective_state, SessionTable};
use super::{InferenceProvider, ProviderError};
use crate::config::{ProviderConfig, SessionConfig};
use crate::stream::{cancellable_stream, ChunkSource, TextStream};
use crate::types::{
    Availability, ChunkSemantics, DownloadProgress, ProgressPhase, ProviderDescriptor,
    ProviderKind, ProviderState, Session,
};

/// Platform answer to "can the built-in model run here?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeAvailability {
    /// Model is on the device and usable
    Readily,
    /// Usable once the platform finishes fetching the model
    AfterDownload { size_bytes: Option<u64> },
    /// Not supported on this device
    No,
}

/// Host binding to the platform's model API
#[async_trait]
pub trait NativeModelApi: Send + Sync {
    async fn availability(&self) -> Result<NativeAvailability, String>;

    /// Fetch the model after [`NativeAvailability::AfterDownload`], reporting
    /// progress as it goes. Resolves once the model is usable.
    async fn download(&self, _progress: ProgressReporter) -> Result<(), String> {
        Ok(())
    }

    /// Open a platform session configured with the given sampling settings
    async fn create_session(&self, config: &SessionConfig)
        -> Result<Box<dyn NativeSession>, String>;
}

/// A live platform session
#[async_trait]
pub trait NativeSession: Send + Sync {
    /// Start a generation. Chunks carry the full text so far.
    async fn prompt_streaming(&self, text: &str) -> Result<Box<dyn ChunkSource>, String>;

    /// Free the platform session; must tolerate repeated calls
    fn destroy(&self);
}

/// Provider backed by the platform's built-in model
pub struct NativeProvider {
    descriptor: ProviderDescriptor,
    api: Arc<dyn NativeModelApi>,
    state: Mutex<ProviderState>,
    sessions: SessionTable<Box<dyn NativeSession>>,
    progress: ProgressReporter,
    init_lock: tokio::sync::Mutex<()>,
}

impl NativeProvider {
    pub const NAME: &'static str = "native";

    pub fn new(api: Arc<dyn NativeModelApi>) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                name: Self::NAME.to_string(),
                kind: ProviderKind::Local,
                description: "Built-in platform model. Runs on-device; fetched by the platform on first use."
                    .to_string(),
                native_chunking: ChunkSemantics::FullReplace,
            },
            api,
            state: Mutex::new(ProviderState::Uninitialized),
            sessions: SessionTable::new(),
            progress: ProgressReporter::default(),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn is_initialized(&self) -> bool {
        matches!(*self.state.lock(), ProviderState::Ready)
    }

    async fn download(&self, size_bytes: Option<u64>) -> Result<(), ProviderError> {
        log::info!(
            "Built-in model needs a download ({} bytes)",
            size_bytes.map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );
        self.progress.report(ProgressPhase::Downloading, 0.0, None);
        self.api
            .download(self.progress.clone())
            .await
            .map_err(|e| {
                ProviderError::InitializationFailed(format!("Built-in model download failed: {}", e))
            })
    }
}

#[async_trait]
impl InferenceProvider for NativeProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn check_availability(&self) -> Availability {
        match self.api.availability().await {
            Ok(NativeAvailability::Readily) => Availability::ready(),
            Ok(NativeAvailability::AfterDownload { size_bytes }) => {
                Availability::after_download(size_bytes)
            }
            Ok(NativeAvailability::No) => {
                Availability::unavailable("Built-in model is not supported on this device")
            }
            Err(e) => Availability::unavailable(format!("Platform availability check failed: {}", e)),
        }
    }

    async fn initialize(&self, _config: &ProviderConfig) -> Result<(), ProviderError> {
        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        *self.state.lock() = ProviderState::Initializing;
        let outcome = match self.api.availability().await {
            Ok(NativeAvailability::No) => Err(ProviderError::InitializationFailed(
                "Built-in model is not supported on this device".to_string(),
            )),
            Ok(NativeAvailability::Readily) => Ok(()),
            Ok(NativeAvailability::AfterDownload { size_bytes }) => self.download(size_bytes).await,
            Err(e) => Err(ProviderError::InitializationFailed(e)),
        };

        match &outcome {
            Ok(()) => {
                self.progress.report(ProgressPhase::Ready, 100.0, None);
                *self.state.lock() = ProviderState::Ready;
                log::info!("Native provider ready");
            }
            Err(e) => {
                log::warn!("Native provider initialization failed: {}", e);
                self.progress.clear();
                *self.state.lock() = ProviderState::Uninitialized;
            }
        }
        outcome
    }

    fn state(&self) -> ProviderState {
        effective_state(*self.state.lock(), !self.sessions.is_empty())
    }

    fn progress(&self) -> Option<DownloadProgress> {
        self.progress.snapshot()
    }

    async fn dispose(&self) -> Result<(), ProviderError> {
        for session in self.sessions.drain() {
            session.destroy();
        }
        self.progress.clear();
        *self.state.lock() = ProviderState::Uninitialized;
        Ok(())
    }

    async fn create_session(&self, config: &SessionConfig) -> Result<Session, ProviderError> {
        if !self.is_initialized() {
            return Err(ProviderError::Session(
                "Native provider is not initialized".to_string(),
            ));
        }
        config.validate()?;

        let native = self
            .api
            .create_session(config)
            .await
            .map_err(ProviderError::Session)?;
        let session = Session::new(Self::NAME, config.clone());
        self.sessions.insert(session.id.clone(), native);
        log::debug!("Created native session {}", session.id);
        Ok(session)
    }

    async fn prompt_streaming(
        &self,
        session: &Session,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<TextStream, ProviderError> {
        let (native, permit) = self.sessions.begin_generation(Self::NAME, session)?;
        let source = native
            .prompt_streaming(text)
            .await
            .map_err(ProviderError::Streaming)?;
        Ok(cancellable_stream(
            source,
            ChunkSemantics::FullReplace,
            cancel,
            Some(permit),
        ))
    }

    async fn destroy_session(&self, session: &Session) {
        if let Some(native) = self.sessions.remove(&session.id) {
            native.destroy();
            log::debug!("Destroyed native session {}", session.id);
        }
    }
}
