//! Local GPU engine provider
//!
//! Runs a downloaded model on the machine's accelerator through a host
//! supplied [`LocalEngine`]. Model weights may need to be fetched on first
//! use; the engine reports download/load progress through a
//! [`ProgressReporter`] and the host polls [`InferenceProvider::progress`]
//! on its own timer.
//!
//! Accelerator context loss surfaces as [`ProviderError::ResourceLost`] and
//! is left for the recovery supervisor to handle.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressReporter;
use super::sessions::{effective_state, Conversation, RecordingSource, SessionTable};
use super::{InferenceProvider, ProviderError};
use crate::config::{LocalGpuConfig, ProviderConfig, SessionConfig};
use crate::stream::{cancellable_stream, ChunkSource, TextStream};
use crate::types::{
    Availability, ChatTurn, ChunkSemantics, DownloadProgress, HardwareProfile, ProgressPhase,
    ProviderDescriptor, ProviderKind, ProviderState, Session,
};

/// A generation request handed to the engine
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub model_id: String,
    pub messages: Vec<ChatTurn>,
    pub temperature: f32,
    pub top_k: u32,
    pub max_tokens: Option<u32>,
}

/// Host binding to a local accelerator-backed inference engine
#[async_trait]
pub trait LocalEngine: Send + Sync {
    /// Verify the accelerator can be acquired
    async fn probe(&self) -> Result<(), String>;

    /// Whether the model's weights are already on disk
    async fn is_cached(&self, model_id: &str) -> bool;

    /// Download size of the model, when known
    fn download_size(&self, model_id: &str) -> Option<u64>;

    /// Download (if needed) and load a model onto the accelerator
    async fn load(&self, model_id: &str, progress: ProgressReporter) -> Result<(), ProviderError>;

    /// Release the loaded model and accelerator context
    async fn unload(&self) -> Result<(), String>;

    /// Start a generation. Chunks are deltas.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<Box<dyn ChunkSource>, ProviderError>;
}

/// Provider backed by a local GPU engine
pub struct LocalGpuProvider {
    descriptor: ProviderDescriptor,
    engine: Arc<dyn LocalEngine>,
    config: LocalGpuConfig,
    state: Mutex<ProviderState>,
    loaded_model: Mutex<Option<String>>,
    progress: ProgressReporter,
    sessions: SessionTable<Conversation>,
    init_lock: tokio::sync::Mutex<()>,
}

impl LocalGpuProvider {
    pub const NAME: &'static str = "local-gpu";

    pub fn new(engine: Arc<dyn LocalEngine>, config: LocalGpuConfig) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                name: Self::NAME.to_string(),
                kind: ProviderKind::Local,
                description: "Local GPU-accelerated engine. Downloads the model once, then runs fully offline."
                    .to_string(),
                native_chunking: ChunkSemantics::Delta,
            },
            engine,
            config,
            state: Mutex::new(ProviderState::Uninitialized),
            loaded_model: Mutex::new(None),
            progress: ProgressReporter::default(),
            sessions: SessionTable::new(),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Model currently loaded on the accelerator
    pub fn loaded_model(&self) -> Option<String> {
        self.loaded_model.lock().clone()
    }

    fn requested_model(&self, config: &ProviderConfig) -> String {
        config
            .model_id
            .clone()
            .unwrap_or_else(|| self.config.default_model_id.clone())
    }

    fn is_initialized(&self) -> bool {
        matches!(*self.state.lock(), ProviderState::Ready)
    }

    /// Drop sessions and the loaded model, returning to `Uninitialized`
    async fn teardown(&self) -> Result<(), ProviderError> {
        let dropped = self.sessions.drain().len();
        if dropped > 0 {
            log::debug!("Dropped {} local GPU session(s)", dropped);
        }
        *self.loaded_model.lock() = None;
        *self.state.lock() = ProviderState::Uninitialized;
        self.progress.clear();
        self.engine
            .unload()
            .await
            .map_err(|e| ProviderError::Dispose(format!("Failed to unload model: {}", e)))
    }
}

#[async_trait]
impl InferenceProvider for LocalGpuProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn supports_hardware(&self, profile: &HardwareProfile) -> bool {
        profile.accelerator_available
            && profile
                .gpu_memory_mb
                .map_or(true, |mb| mb >= self.config.min_gpu_memory_mb)
    }

    async fn check_availability(&self) -> Availability {
        if let Err(e) = self.engine.probe().await {
            return Availability::unavailable(format!("GPU acceleration unavailable: {}", e));
        }

        let model_id = self.config.default_model_id.as_str();
        if self.loaded_model().as_deref() == Some(model_id) || self.engine.is_cached(model_id).await {
            Availability::ready()
        } else {
            Availability::after_download(self.engine.download_size(model_id))
        }
    }

    async fn initialize(&self, config: &ProviderConfig) -> Result<(), ProviderError> {
        let _guard = self.init_lock.lock().await;
        let model_id = self.requested_model(config);

        if self.is_initialized() {
            if self.loaded_model().as_deref() == Some(model_id.as_str()) {
                return Ok(());
            }
            log::info!("Switching local model to {}", model_id);
            if let Err(e) = self.teardown().await {
                log::warn!("{}", e);
            }
        }

        *self.state.lock() = ProviderState::Initializing;
        let phase = if self.engine.is_cached(&model_id).await {
            ProgressPhase::Loading
        } else {
            ProgressPhase::Downloading
        };
        self.progress.report(phase, 0.0, Some(&model_id));
        log::info!("Loading local model {}", model_id);

        match self.engine.load(&model_id, self.progress.clone()).await {
            Ok(()) => {
                *self.loaded_model.lock() = Some(model_id.clone());
                *self.state.lock() = ProviderState::Ready;
                self.progress.report(ProgressPhase::Ready, 100.0, None);
                log::info!("Local model {} ready", model_id);
                Ok(())
            }
            Err(e) => {
                log::warn!("Loading {} failed: {}", model_id, e);
                if let Err(cleanup) = self.teardown().await {
                    log::warn!("Cleanup after failed load: {}", cleanup);
                }
                Err(match e {
                    ProviderError::InitializationFailed(_) => e,
                    other => ProviderError::InitializationFailed(other.to_string()),
                })
            }
        }
    }

    fn state(&self) -> ProviderState {
        effective_state(*self.state.lock(), !self.sessions.is_empty())
    }

    fn progress(&self) -> Option<DownloadProgress> {
        self.progress.snapshot()
    }

    async fn dispose(&self) -> Result<(), ProviderError> {
        let _guard = self.init_lock.lock().await;
        self.teardown().await
    }

    async fn create_session(&self, config: &SessionConfig) -> Result<Session, ProviderError> {
        if !self.is_initialized() {
            return Err(ProviderError::Session(
                "Local GPU provider is not initialized".to_string(),
            ));
        }
        config.validate()?;

        if let Some(requested) = &config.model_id {
            if self.loaded_model().as_ref() != Some(requested) {
                return Err(ProviderError::Session(format!(
                    "Model {} is not loaded; initialize the provider with it first",
                    requested
                )));
            }
        }

        let session = Session::new(Self::NAME, config.clone());
        self.sessions
            .insert(session.id.clone(), Conversation::new(config.clone()));
        Ok(session)
    }

    async fn prompt_streaming(
        &self,
        session: &Session,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<TextStream, ProviderError> {
        let (conversation, permit) = self.sessions.begin_generation(Self::NAME, session)?;
        let model_id = self
            .loaded_model()
            .ok_or_else(|| ProviderError::Streaming("No model loaded".to_string()))?;

        let user = ChatTurn::user(text);
        let request = GenerationRequest {
            model_id,
            messages: conversation.messages_with(&user),
            temperature: conversation.config.temperature,
            top_k: conversation.config.top_k,
            max_tokens: conversation.config.max_tokens,
        };

        let source = self.engine.generate(request).await.map_err(|e| match e {
            ProviderError::ResourceLost(_) | ProviderError::Streaming(_) => e,
            other => ProviderError::Streaming(other.to_string()),
        })?;

        Ok(cancellable_stream(
            Box::new(RecordingSource::new(source, conversation, user)),
            ChunkSemantics::Delta,
            cancel,
            Some(permit),
        ))
    }

    async fn destroy_session(&self, session: &Session) {
        if self.sessions.remove(&session.id).is_some() {
            log::debug!("Destroyed local GPU session {}", session.id);
        }
    }
}
