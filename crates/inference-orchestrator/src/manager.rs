//! Provider Manager - single entry point for provider selection
//!
//! Owns the registry, probes availability, picks a provider (automatically
//! or on request) and keeps exactly one active provider/session pair. The
//! active pair lives in one state container that only [`transition`] writes,
//! so a switch is observed either before or after, never halfway.
//!
//! [`transition`]: ProviderManager::transition

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::provider::{with_timeout, InferenceProvider, ProviderError, ProviderRegistry};
use crate::recovery::{RecoveryError, RecoveryHost};
use crate::stream::TextStream;
use crate::types::{Availability, HardwareProfile, ProviderReport, Session};

/// Error types for manager operations
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("No provider active")]
    NoActiveProvider,

    #[error("Provider switch failed: {0}")]
    SwitchFailed(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// A provider that failed during selection or disposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

impl ProviderFailure {
    fn new(provider: &str, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Clone)]
struct ActiveSlot {
    provider: Arc<dyn InferenceProvider>,
    session: Session,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

pub struct ProviderManager {
    config: ManagerConfig,
    hardware: Option<HardwareProfile>,
    registry: RwLock<ProviderRegistry>,
    /// The active provider and its session, written only by `transition`
    active: tokio::sync::RwLock<Option<ActiveSlot>>,
    /// Serializes selection, switching, recovery and disposal
    transition_lock: tokio::sync::Mutex<()>,
    /// Provider to bring back when recovering from resource loss
    last_active: Mutex<Option<String>>,
    selection_failures: Mutex<Vec<ProviderFailure>>,
}

impl ProviderManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            hardware: None,
            registry: RwLock::new(ProviderRegistry::new()),
            active: tokio::sync::RwLock::new(None),
            transition_lock: tokio::sync::Mutex::new(()),
            last_active: Mutex::new(None),
            selection_failures: Mutex::new(Vec::new()),
        }
    }

    /// Gate probing on the host's hardware diagnostics
    pub fn with_hardware(mut self, profile: HardwareProfile) -> Self {
        self.hardware = Some(profile);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ─── REGISTRY ───────────────────────────────────────────────────

    /// Register a provider; a provider with the same name is replaced in place
    pub fn register_provider(&self, provider: Arc<dyn InferenceProvider>) {
        let name = provider.name().to_string();
        if self.registry.write().register(provider).is_some() {
            log::info!("Replaced provider: {}", name);
        } else {
            log::info!("Registered provider: {}", name);
        }
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn InferenceProvider>> {
        self.registry.read().get(name)
    }

    /// Registered provider names in registration order
    pub fn provider_names(&self) -> Vec<String> {
        self.registry
            .read()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn InferenceProvider>> {
        self.registry.read().providers().to_vec()
    }

    // ─── DETECTION ──────────────────────────────────────────────────

    /// Probe one provider, turning timeouts and panics into an unavailable result
    async fn probe(&self, provider: &Arc<dyn InferenceProvider>) -> Availability {
        if let Some(profile) = &self.hardware {
            if !provider.supports_hardware(profile) {
                return Availability::unavailable("Not supported by this hardware");
            }
        }

        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let probe = AssertUnwindSafe(provider.check_availability()).catch_unwind();
        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(availability)) => availability,
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                log::error!(
                    "Availability probe for {} panicked: {}",
                    provider.name(),
                    message
                );
                Availability::unavailable(format!("Availability probe panicked: {}", message))
            }
            Err(_) => {
                log::warn!(
                    "Availability probe for {} timed out after {:?}",
                    provider.name(),
                    timeout
                );
                Availability::unavailable(format!(
                    "Availability probe timed out after {:?}",
                    timeout
                ))
            }
        }
    }

    /// Probe every registered provider.
    ///
    /// Probes run concurrently; the result has one entry per provider, in
    /// registration order, whatever the individual probes did.
    pub async fn detect_providers(&self) -> Vec<ProviderReport> {
        let providers = self.snapshot();
        let active = self.active_provider_name().await;

        let availability = join_all(providers.iter().map(|p| self.probe(p))).await;

        providers
            .iter()
            .zip(availability)
            .map(|(provider, availability)| ProviderReport {
                descriptor: provider.descriptor().clone(),
                availability,
                active: active.as_deref() == Some(provider.name()),
            })
            .collect()
    }

    // ─── SELECTION ──────────────────────────────────────────────────

    async fn initialize_provider(
        &self,
        provider: &Arc<dyn InferenceProvider>,
    ) -> Result<(), ProviderError> {
        let init = provider.initialize(&self.config.provider);
        match self.config.initialize_timeout_ms {
            Some(ms) => {
                with_timeout(
                    Duration::from_millis(ms),
                    &format!("initialize {}", provider.name()),
                    init,
                )
                .await
            }
            None => init.await,
        }
    }

    /// The only writer of the active slot.
    ///
    /// Holds the slot's write lock throughout: the previous session is
    /// destroyed, then the target's session is created, then the pair is
    /// published. If session creation fails nothing is active.
    async fn transition(
        &self,
        target: Option<&Arc<dyn InferenceProvider>>,
    ) -> Result<Option<Session>, ManagerError> {
        let mut slot = self.active.write().await;

        if let Some(previous) = slot.take() {
            previous.provider.destroy_session(&previous.session).await;
            log::debug!(
                "Destroyed session {} on {}",
                previous.session.id,
                previous.provider.name()
            );
        }

        let Some(provider) = target else {
            return Ok(None);
        };

        let session = provider
            .create_session(&self.config.session)
            .await
            .map_err(|e| {
                log::warn!("Failed to create session on {}: {}", provider.name(), e);
                ManagerError::SwitchFailed(format!("{}: {}", provider.name(), e))
            })?;

        *slot = Some(ActiveSlot {
            provider: provider.clone(),
            session: session.clone(),
        });
        *self.last_active.lock() = Some(provider.name().to_string());
        log::info!("Active provider: {} (session {})", provider.name(), session.id);
        Ok(Some(session))
    }

    /// Pick the first usable local provider, in registration order.
    ///
    /// Remote providers are never considered here. Each candidate is probed
    /// and initialized; failures are recorded (see
    /// [`last_selection_failures`](Self::last_selection_failures)) and the
    /// next candidate is tried. Returns `None` if nothing could be started.
    pub async fn auto_select_provider(&self) -> Option<Arc<dyn InferenceProvider>> {
        let _transition = self.transition_lock.lock().await;
        let mut failures = Vec::new();
        let mut selected = None;

        for provider in self.snapshot() {
            if !provider.kind().auto_selectable() {
                log::debug!("Skipping {} for auto-selection (explicit opt-in only)", provider.name());
                continue;
            }

            let availability = self.probe(&provider).await;
            if !availability.available {
                let reason = availability
                    .reason
                    .unwrap_or_else(|| "unavailable".to_string());
                log::info!("Provider {} unavailable: {}", provider.name(), reason);
                failures.push(ProviderFailure::new(provider.name(), reason));
                continue;
            }

            if let Err(e) = self.initialize_provider(&provider).await {
                log::warn!("Provider {} failed to initialize: {}", provider.name(), e);
                failures.push(ProviderFailure::new(provider.name(), e.to_string()));
                continue;
            }

            match self.transition(Some(&provider)).await {
                Ok(_) => {
                    selected = Some(provider);
                    break;
                }
                Err(e) => failures.push(ProviderFailure::new(provider.name(), e.to_string())),
            }
        }

        if selected.is_none() {
            log::warn!("No provider could be selected ({} failed)", failures.len());
        }
        *self.selection_failures.lock() = failures;
        selected
    }

    /// Providers that failed during the latest auto-selection, with reasons
    pub fn last_selection_failures(&self) -> Vec<ProviderFailure> {
        self.selection_failures.lock().clone()
    }

    /// Explicitly switch to `name`, the only way to activate a remote provider.
    ///
    /// An unknown name or a failed initialize leaves the current pair
    /// untouched. Switching to the already active provider is a no-op.
    pub async fn set_active_provider(&self, name: &str) -> Result<Session, ManagerError> {
        let provider = self
            .provider(name)
            .ok_or_else(|| ManagerError::UnknownProvider(name.to_string()))?;

        let _transition = self.transition_lock.lock().await;
        if let Some(current) = self.active.read().await.as_ref() {
            if Arc::ptr_eq(&current.provider, &provider) {
                return Ok(current.session.clone());
            }
        }

        self.initialize_provider(&provider).await?;
        self.transition(Some(&provider))
            .await?
            .ok_or(ManagerError::NoActiveProvider)
    }

    // ─── ACTIVE PROVIDER ────────────────────────────────────────────

    pub async fn get_active_provider(&self) -> Option<Arc<dyn InferenceProvider>> {
        self.active.read().await.as_ref().map(|slot| slot.provider.clone())
    }

    pub async fn active_provider_name(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|slot| slot.provider.name().to_string())
    }

    /// Session held for the active provider
    pub async fn active_session(&self) -> Option<Session> {
        self.active.read().await.as_ref().map(|slot| slot.session.clone())
    }

    /// Stream a prompt through the active provider's session
    pub async fn prompt_active(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<TextStream, ManagerError> {
        let slot = self
            .active
            .read()
            .await
            .clone()
            .ok_or(ManagerError::NoActiveProvider)?;
        Ok(slot
            .provider
            .prompt_streaming(&slot.session, text, cancel)
            .await?)
    }

    /// Tear down and bring back the most recently active provider.
    ///
    /// Readers see no active provider until the new session is published.
    pub async fn reinitialize_active(&self) -> Result<Session, ManagerError> {
        let _transition = self.transition_lock.lock().await;
        let name = self
            .last_active
            .lock()
            .clone()
            .ok_or(ManagerError::NoActiveProvider)?;
        let provider = self
            .provider(&name)
            .ok_or_else(|| ManagerError::UnknownProvider(name.clone()))?;

        log::info!("Reinitializing provider: {}", name);
        self.transition(None).await?;
        if let Err(e) = provider.dispose().await {
            log::warn!("Dispose of {} before reinitialize failed: {}", name, e);
        }
        self.initialize_provider(&provider).await?;
        self.transition(Some(&provider))
            .await?
            .ok_or(ManagerError::NoActiveProvider)
    }

    // ─── TEARDOWN ───────────────────────────────────────────────────

    /// Dispose every provider, continuing past failures.
    ///
    /// Failures (errors and panics) are logged and returned.
    pub async fn dispose(&self) -> Vec<ProviderFailure> {
        let _transition = self.transition_lock.lock().await;
        // Clearing the slot cannot fail
        let _ = self.transition(None).await;
        *self.last_active.lock() = None;

        let mut failures = Vec::new();
        for provider in self.snapshot() {
            match AssertUnwindSafe(provider.dispose()).catch_unwind().await {
                Ok(Ok(())) => log::debug!("Disposed provider: {}", provider.name()),
                Ok(Err(e)) => {
                    log::error!("Failed to dispose {}: {}", provider.name(), e);
                    failures.push(ProviderFailure::new(provider.name(), e.to_string()));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    log::error!("Dispose of {} panicked: {}", provider.name(), message);
                    failures.push(ProviderFailure::new(
                        provider.name(),
                        format!("panicked: {}", message),
                    ));
                }
            }
        }

        log::info!("Disposed all providers ({} failures)", failures.len());
        failures
    }
}

#[async_trait]
impl RecoveryHost for ProviderManager {
    async fn reinitialize(&self) -> Result<(), RecoveryError> {
        match self.reinitialize_active().await {
            Ok(_) => Ok(()),
            Err(ManagerError::NoActiveProvider) => Err(RecoveryError::NoActiveProvider),
            Err(e) => Err(RecoveryError::Callback(e.to_string())),
        }
    }

    async fn reset_application(&self) {
        let failures = self.dispose().await;
        if !failures.is_empty() {
            log::warn!("Application reset left {} providers unclean", failures.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::StreamExt;

    use super::*;
    use crate::config::{ProviderConfig, SessionConfig};
    use crate::types::{ChunkSemantics, ProviderDescriptor, ProviderKind, ProviderState};

    /// Ordered log shared by every mock in a test
    type Journal = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Copy, PartialEq)]
    enum Probe {
        Available,
        Unavailable,
        Panics,
        Hangs,
    }

    struct MockProvider {
        descriptor: ProviderDescriptor,
        probe: Probe,
        init_fails: bool,
        dispose_fails: bool,
        dispose_panics: bool,
        journal: Journal,
        live_sessions: AtomicUsize,
        initializations: AtomicUsize,
    }

    impl MockProvider {
        fn new(name: &str, kind: ProviderKind, journal: &Journal) -> Self {
            Self {
                descriptor: ProviderDescriptor {
                    name: name.to_string(),
                    kind,
                    description: format!("{} mock", name),
                    native_chunking: ChunkSemantics::Delta,
                },
                probe: Probe::Available,
                init_fails: false,
                dispose_fails: false,
                dispose_panics: false,
                journal: journal.clone(),
                live_sessions: AtomicUsize::new(0),
                initializations: AtomicUsize::new(0),
            }
        }

        fn local(name: &str, journal: &Journal) -> Self {
            Self::new(name, ProviderKind::Local, journal)
        }

        fn with_probe(mut self, probe: Probe) -> Self {
            self.probe = probe;
            self
        }

        fn failing_init(mut self) -> Self {
            self.init_fails = true;
            self
        }

        fn log(&self, what: &str) {
            self.journal.lock().push(format!("{}:{}", self.descriptor.name, what));
        }
    }

    #[async_trait]
    impl InferenceProvider for MockProvider {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }

        fn supports_hardware(&self, profile: &HardwareProfile) -> bool {
            self.descriptor.name != "gpu-only" || profile.accelerator_available
        }

        async fn check_availability(&self) -> Availability {
            match self.probe {
                Probe::Available => Availability::ready(),
                Probe::Unavailable => Availability::unavailable("model not installed"),
                Probe::Panics => panic!("probe exploded"),
                Probe::Hangs => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Availability::ready()
                }
            }
        }

        async fn initialize(&self, _config: &ProviderConfig) -> Result<(), ProviderError> {
            self.initializations.fetch_add(1, Ordering::SeqCst);
            if self.init_fails {
                return Err(ProviderError::InitializationFailed("no weights".to_string()));
            }
            self.log("init");
            Ok(())
        }

        fn state(&self) -> ProviderState {
            ProviderState::Ready
        }

        async fn dispose(&self) -> Result<(), ProviderError> {
            self.log("dispose");
            if self.dispose_panics {
                panic!("dispose exploded");
            }
            if self.dispose_fails {
                return Err(ProviderError::Dispose("device busy".to_string()));
            }
            Ok(())
        }

        async fn create_session(&self, config: &SessionConfig) -> Result<Session, ProviderError> {
            self.live_sessions.fetch_add(1, Ordering::SeqCst);
            self.log("create");
            Ok(Session::new(self.name(), config.clone()))
        }

        async fn prompt_streaming(
            &self,
            _session: &Session,
            text: &str,
            _cancel: CancellationToken,
        ) -> Result<TextStream, ProviderError> {
            let reply = format!("{} says {}", self.name(), text);
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(reply)])))
        }

        async fn destroy_session(&self, _session: &Session) {
            self.live_sessions.fetch_sub(1, Ordering::SeqCst);
            self.log("destroy");
        }
    }

    fn fast_config() -> ManagerConfig {
        ManagerConfig {
            probe_timeout_ms: 50,
            ..Default::default()
        }
    }

    fn manager_with(providers: Vec<MockProvider>) -> (ProviderManager, Vec<Arc<MockProvider>>) {
        let manager = ProviderManager::new(fast_config());
        let providers: Vec<Arc<MockProvider>> = providers.into_iter().map(Arc::new).collect();
        for provider in &providers {
            manager.register_provider(provider.clone());
        }
        (manager, providers)
    }

    #[tokio::test]
    async fn test_detect_reports_every_provider_in_order() {
        let journal = Journal::default();
        let (manager, _) = manager_with(vec![
            MockProvider::local("native", &journal).with_probe(Probe::Panics),
            MockProvider::local("local-gpu", &journal).with_probe(Probe::Hangs),
            MockProvider::local("other", &journal).with_probe(Probe::Unavailable),
            MockProvider::new("remote-api", ProviderKind::RemoteApi, &journal),
        ]);

        let reports = manager.detect_providers().await;
        let names: Vec<_> = reports.iter().map(|r| r.descriptor.name.as_str()).collect();
        assert_eq!(names, vec!["native", "local-gpu", "other", "remote-api"]);

        assert!(!reports[0].availability.available);
        assert!(reports[0].availability.reason.as_deref().unwrap().contains("panicked"));
        assert!(reports[1].availability.reason.as_deref().unwrap().contains("timed out"));
        assert_eq!(reports[2].availability.reason.as_deref(), Some("model not installed"));
        assert!(reports[3].availability.available);
        assert!(reports.iter().all(|r| !r.active));
    }

    #[tokio::test]
    async fn test_detect_skips_providers_excluded_by_hardware() {
        let journal = Journal::default();
        let manager = ProviderManager::new(fast_config()).with_hardware(HardwareProfile::default());
        manager.register_provider(Arc::new(MockProvider::local("gpu-only", &journal)));

        let reports = manager.detect_providers().await;
        assert_eq!(
            reports[0].availability.reason.as_deref(),
            Some("Not supported by this hardware")
        );
    }

    #[tokio::test]
    async fn test_auto_select_prefers_first_working_local() {
        let journal = Journal::default();
        let (manager, _) = manager_with(vec![
            MockProvider::new("remote-api", ProviderKind::RemoteApi, &journal),
            MockProvider::local("native", &journal).with_probe(Probe::Unavailable),
            MockProvider::local("local-gpu", &journal).failing_init(),
            MockProvider::local("fallback", &journal),
        ]);

        let selected = manager.auto_select_provider().await.unwrap();
        assert_eq!(selected.name(), "fallback");
        assert_eq!(manager.active_provider_name().await.as_deref(), Some("fallback"));

        let failures = manager.last_selection_failures();
        let failed: Vec<_> = failures.iter().map(|f| f.provider.as_str()).collect();
        assert_eq!(failed, vec!["native", "local-gpu"]);
    }

    #[tokio::test]
    async fn test_auto_select_deterministic() {
        for _ in 0..5 {
            let journal = Journal::default();
            let (manager, _) = manager_with(vec![
                MockProvider::local("a", &journal).with_probe(Probe::Unavailable),
                MockProvider::local("b", &journal),
                MockProvider::local("c", &journal),
            ]);
            let selected = manager.auto_select_provider().await.unwrap();
            assert_eq!(selected.name(), "b");
        }
    }

    #[tokio::test]
    async fn test_auto_select_never_picks_remote() {
        let journal = Journal::default();
        let (manager, providers) = manager_with(vec![
            MockProvider::local("native", &journal).with_probe(Probe::Unavailable),
            MockProvider::new("remote-api", ProviderKind::RemoteApi, &journal),
        ]);

        assert!(manager.auto_select_provider().await.is_none());
        assert!(manager.get_active_provider().await.is_none());
        assert_eq!(providers[1].initializations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_leaves_state_unchanged() {
        let journal = Journal::default();
        let (manager, _) = manager_with(vec![MockProvider::local("native", &journal)]);
        manager.set_active_provider("native").await.unwrap();
        let session = manager.active_session().await.unwrap();

        let result = manager.set_active_provider("unregistered").await;
        assert!(matches!(result, Err(ManagerError::UnknownProvider(_))));
        assert_eq!(manager.active_provider_name().await.as_deref(), Some("native"));
        assert_eq!(manager.active_session().await.unwrap().id, session.id);
    }

    #[tokio::test]
    async fn test_failed_initialize_leaves_state_unchanged() {
        let journal = Journal::default();
        let (manager, _) = manager_with(vec![
            MockProvider::local("native", &journal),
            MockProvider::local("broken", &journal).failing_init(),
        ]);
        manager.set_active_provider("native").await.unwrap();

        assert!(manager.set_active_provider("broken").await.is_err());
        assert_eq!(manager.active_provider_name().await.as_deref(), Some("native"));
    }

    #[tokio::test]
    async fn test_switch_destroys_before_creating() {
        let journal = Journal::default();
        let (manager, providers) = manager_with(vec![
            MockProvider::local("a", &journal),
            MockProvider::local("b", &journal),
        ]);

        manager.set_active_provider("a").await.unwrap();
        journal.lock().clear();
        manager.set_active_provider("b").await.unwrap();

        assert_eq!(*journal.lock(), vec!["b:init", "a:destroy", "b:create"]);
        assert_eq!(providers[0].live_sessions.load(Ordering::SeqCst), 0);
        assert_eq!(providers[1].live_sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_switch_to_active_provider_is_noop() {
        let journal = Journal::default();
        let (manager, _) = manager_with(vec![MockProvider::local("a", &journal)]);

        let first = manager.set_active_provider("a").await.unwrap();
        let second = manager.set_active_provider("a").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_remote_selected_explicitly() {
        let journal = Journal::default();
        let (manager, _) = manager_with(vec![MockProvider::new(
            "remote-api",
            ProviderKind::RemoteApi,
            &journal,
        )]);

        manager.set_active_provider("remote-api").await.unwrap();
        let reports = manager.detect_providers().await;
        assert!(reports[0].active);
    }

    #[tokio::test]
    async fn test_prompt_active() {
        let journal = Journal::default();
        let (manager, _) = manager_with(vec![MockProvider::local("native", &journal)]);
        assert!(matches!(
            manager.prompt_active("hi", CancellationToken::new()).await,
            Err(ManagerError::NoActiveProvider)
        ));

        manager.set_active_provider("native").await.unwrap();
        let chunks: Vec<_> = manager
            .prompt_active("hi", CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks[0].as_ref().unwrap(), "native says hi");
    }

    #[tokio::test]
    async fn test_dispose_reaches_every_provider() {
        let journal = Journal::default();
        let mut failing = MockProvider::local("failing", &journal);
        failing.dispose_fails = true;
        let mut panicking = MockProvider::local("panicking", &journal);
        panicking.dispose_panics = true;
        let (manager, _) = manager_with(vec![
            failing,
            panicking,
            MockProvider::local("healthy", &journal),
        ]);
        manager.set_active_provider("healthy").await.unwrap();

        let failures = manager.dispose().await;
        let failed: Vec<_> = failures.iter().map(|f| f.provider.as_str()).collect();
        assert_eq!(failed, vec!["failing", "panicking"]);

        let journal = journal.lock();
        assert!(journal.contains(&"healthy:destroy".to_string()));
        assert!(journal.contains(&"healthy:dispose".to_string()));
        drop(journal);
        assert!(manager.get_active_provider().await.is_none());
    }

    #[tokio::test]
    async fn test_reinitialize_active_recreates_session() {
        let journal = Journal::default();
        let (manager, providers) = manager_with(vec![MockProvider::local("native", &journal)]);
        let before = manager.set_active_provider("native").await.unwrap();
        journal.lock().clear();

        manager.reinitialize().await.unwrap();

        let after = manager.active_session().await.unwrap();
        assert_ne!(before.id, after.id);
        assert_eq!(
            *journal.lock(),
            vec!["native:destroy", "native:dispose", "native:init", "native:create"]
        );
        assert_eq!(providers[0].live_sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reinitialize_without_active_provider() {
        let manager = ProviderManager::new(fast_config());
        assert!(matches!(
            manager.reinitialize().await,
            Err(RecoveryError::NoActiveProvider)
        ));
    }
}
