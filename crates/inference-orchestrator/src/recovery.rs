//! Recovery supervisor for transient resource loss
//!
//! When the accelerator or engine context is lost the supervisor asks its
//! [`RecoveryHost`] to reinitialize the active provider, with exponential
//! backoff and a fixed attempt budget. Once the budget is spent only an
//! explicit [`RecoverySupervisor::reset_counter`] or the terminal
//! [`RecoverySupervisor::reset_application`] gets things moving again.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::RecoveryConfig;
use crate::constants::recovery::MAX_ATTEMPTS;

/// Error reported by a recovery host
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("Recovery callback failed: {0}")]
    Callback(String),

    #[error("No active provider to recover")]
    NoActiveProvider,
}

/// The component that actually rebuilds state after a resource loss
#[async_trait]
pub trait RecoveryHost: Send + Sync {
    /// Reinitialize the active provider and its session
    async fn reinitialize(&self) -> Result<(), RecoveryError>;

    /// Tear everything down to a freshly started state
    async fn reset_application(&self);
}

/// Lifecycle events emitted by the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryEvent {
    RecoveryStarted { attempt: u32, reason: String },
    RecoveryComplete { success: bool, error: Option<String> },
    /// No attempts left; the user has to reset manually
    RecoveryExhausted { attempts: u32 },
    ApplicationReset,
}

/// Destination for [`RecoveryEvent`]s (UI bridge, channel, test collector)
pub trait RecoveryEventSink: Send + Sync {
    fn send(&self, event: RecoveryEvent);
}

/// Discards every event
pub struct NullEventSink;

impl RecoveryEventSink for NullEventSink {
    fn send(&self, _event: RecoveryEvent) {}
}

/// Collects events in memory
#[derive(Default)]
pub struct VecEventSink {
    events: Mutex<Vec<RecoveryEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecoveryEvent> {
        self.events.lock().clone()
    }
}

impl RecoveryEventSink for VecEventSink {
    fn send(&self, event: RecoveryEvent) {
        self.events.lock().push(event);
    }
}

impl RecoveryEventSink for tokio::sync::mpsc::UnboundedSender<RecoveryEvent> {
    fn send(&self, event: RecoveryEvent) {
        if tokio::sync::mpsc::UnboundedSender::send(self, event).is_err() {
            log::debug!("Recovery event receiver dropped");
        }
    }
}

/// Result of a single [`RecoverySupervisor::handle_loss`] call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Recovered,
    /// The attempt ran and the host failed
    Failed(String),
    /// Another attempt was running; nothing was done
    AlreadyInProgress,
    /// Attempt budget spent; manual reset required
    Exhausted,
}

/// Snapshot for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStatus {
    pub attempts: u32,
    pub max_attempts: u32,
    pub can_attempt: bool,
    pub in_progress: bool,
    pub last_error: Option<String>,
}

/// Clears the in-progress flag on every exit path, unwinding included
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Why [`RecoverySupervisor::claim_attempt`] turned a caller away
#[derive(Debug, PartialEq, Eq)]
enum Refused {
    InProgress,
    Exhausted(u32),
}

pub struct RecoverySupervisor {
    config: RecoveryConfig,
    host: Arc<dyn RecoveryHost>,
    events: Arc<dyn RecoveryEventSink>,
    in_progress: AtomicBool,
    attempts: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl RecoverySupervisor {
    pub fn new(config: RecoveryConfig, host: Arc<dyn RecoveryHost>) -> Self {
        Self::with_events(config, host, Arc::new(NullEventSink))
    }

    pub fn with_events(
        config: RecoveryConfig,
        host: Arc<dyn RecoveryHost>,
        events: Arc<dyn RecoveryEventSink>,
    ) -> Self {
        Self {
            config,
            host,
            events,
            in_progress: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Exponential backoff: base * 2^attempt, capped
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(10));
        Duration::from_millis(delay_ms.min(self.config.backoff_max_ms))
    }

    /// Handle a resource-loss event.
    ///
    /// Overlapping calls collapse into the one already running. Each call
    /// that gets through consumes one attempt, successful or not; the counter
    /// only goes down through [`reset_counter`](Self::reset_counter).
    pub async fn handle_loss(&self, reason: &str) -> RecoveryOutcome {
        if self.in_progress.load(Ordering::SeqCst) {
            log::debug!("Recovery already in progress, ignoring: {}", reason);
            return RecoveryOutcome::AlreadyInProgress;
        }

        let spent = self.attempts.load(Ordering::SeqCst);
        if spent >= MAX_ATTEMPTS {
            return self.exhausted(reason, spent);
        }

        let (_guard, attempt) = match self.claim_attempt() {
            Ok(claimed) => claimed,
            Err(Refused::InProgress) => {
                log::debug!("Recovery already in progress, ignoring: {}", reason);
                return RecoveryOutcome::AlreadyInProgress;
            }
            Err(Refused::Exhausted(spent)) => return self.exhausted(reason, spent),
        };
        *self.last_error.lock() = Some(reason.to_string());
        self.events.send(RecoveryEvent::RecoveryStarted {
            attempt,
            reason: reason.to_string(),
        });

        let backoff = self.calculate_backoff(attempt - 1);
        log::info!(
            "Recovery attempt {}/{} for '{}' (waiting {:?})",
            attempt,
            MAX_ATTEMPTS,
            reason,
            backoff
        );
        if !backoff.is_zero() {
            tokio::time::sleep(backoff).await;
        }

        match self.host.reinitialize().await {
            Ok(()) => {
                log::info!("Recovery attempt {} succeeded", attempt);
                self.events.send(RecoveryEvent::RecoveryComplete {
                    success: true,
                    error: None,
                });
                RecoveryOutcome::Recovered
            }
            Err(e) => {
                let message = e.to_string();
                log::warn!("Recovery attempt {} failed: {}", attempt, message);
                *self.last_error.lock() = Some(message.clone());
                self.events.send(RecoveryEvent::RecoveryComplete {
                    success: false,
                    error: Some(message.clone()),
                });
                if attempt >= MAX_ATTEMPTS {
                    log::error!(
                        "Recovery failed after {} attempts; manual reset required",
                        attempt
                    );
                    self.events
                        .send(RecoveryEvent::RecoveryExhausted { attempts: attempt });
                }
                RecoveryOutcome::Failed(message)
            }
        }
    }

    /// Take the in-progress flag, then consume one attempt from the budget.
    ///
    /// The budget is re-checked under the flag; the count never passes
    /// [`MAX_ATTEMPTS`].
    fn claim_attempt(&self) -> Result<(InProgressGuard<'_>, u32), Refused> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Refused::InProgress);
        }
        let guard = InProgressGuard(&self.in_progress);

        match self
            .attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |spent| {
                (spent < MAX_ATTEMPTS).then_some(spent + 1)
            }) {
            Ok(previous) => Ok((guard, previous + 1)),
            Err(spent) => Err(Refused::Exhausted(spent)),
        }
    }

    fn exhausted(&self, reason: &str, spent: u32) -> RecoveryOutcome {
        log::error!(
            "Resource lost ({}) with no recovery attempts left; manual reset required",
            reason
        );
        self.events
            .send(RecoveryEvent::RecoveryExhausted { attempts: spent });
        RecoveryOutcome::Exhausted
    }

    /// Restore the attempt budget (e.g. from a "try again" button)
    pub fn reset_counter(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        log::info!("Recovery counter reset");
    }

    pub fn status(&self) -> RecoveryStatus {
        let attempts = self.attempts.load(Ordering::SeqCst);
        RecoveryStatus {
            attempts,
            max_attempts: MAX_ATTEMPTS,
            can_attempt: attempts < MAX_ATTEMPTS,
            in_progress: self.in_progress.load(Ordering::SeqCst),
            last_error: self.last_error.lock().clone(),
        }
    }

    /// Terminal full reset. Not gated by the attempt counter or an attempt
    /// in flight; the host starts over from scratch and so does the counter.
    pub async fn reset_application(&self) {
        log::warn!("Resetting application state");
        self.host.reset_application().await;
        self.attempts.store(0, Ordering::SeqCst);
        *self.last_error.lock() = None;
        self.events.send(RecoveryEvent::ApplicationReset);
    }
}
