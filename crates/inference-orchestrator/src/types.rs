//! Common types shared by providers, the manager and the recovery supervisor

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;

/// Where a provider runs its model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Runs on this machine (platform-native API or local GPU engine)
    Local,
    /// Sends prompts to a remote HTTP API. Never auto-selected.
    RemoteApi,
}

impl ProviderKind {
    /// Whether the manager may pick this kind without an explicit user choice
    pub fn auto_selectable(self) -> bool {
        matches!(self, ProviderKind::Local)
    }
}

/// How a provider's transport natively delivers text.
///
/// Consumers never see full-replace chunks: providers normalize every stream
/// to deltas before handing it out. The declaration is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSemantics {
    /// Each chunk is only the newly generated text
    Delta,
    /// Each chunk is the whole response so far
    FullReplace,
}

/// Static identity of a provider, immutable once registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    /// Unique registry key
    pub name: String,
    pub kind: ProviderKind,
    /// Human-readable description for settings screens
    pub description: String,
    /// Chunking used by the underlying transport
    pub native_chunking: ChunkSemantics,
}

/// Result of a single availability probe. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub available: bool,
    /// Why the provider cannot serve requests
    pub reason: Option<String>,
    /// Whether `initialize` will have to download model weights first
    pub requires_download: bool,
    pub download_size_bytes: Option<u64>,
}

impl Availability {
    pub fn ready() -> Self {
        Self {
            available: true,
            reason: None,
            requires_download: false,
            download_size_bytes: None,
        }
    }

    pub fn after_download(size_bytes: Option<u64>) -> Self {
        Self {
            available: true,
            reason: None,
            requires_download: true,
            download_size_bytes: size_bytes,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
            requires_download: false,
            download_size_bytes: None,
        }
    }
}

/// Phase of a model download/load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Downloading,
    Loading,
    Ready,
}

/// Snapshot of initialization progress, polled by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub phase: ProgressPhase,
    /// Completion in percent, clamped to `0..=100`
    pub percentage: u8,
    /// File or shard currently being processed
    pub current_item: Option<String>,
}

impl DownloadProgress {
    pub fn new(phase: ProgressPhase, percentage: f32, current_item: Option<String>) -> Self {
        Self {
            phase,
            percentage: percentage.clamp(0.0, 100.0).round() as u8,
            current_item,
        }
    }

    pub fn ready() -> Self {
        Self::new(ProgressPhase::Ready, 100.0, None)
    }
}

/// Hardware capabilities reported by the host's diagnostics.
///
/// Consumed only to decide whether a provider is worth probing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HardwareProfile {
    /// A GPU compute API is usable
    pub accelerator_available: bool,
    /// Dedicated or shared accelerator memory
    pub gpu_memory_mb: Option<u64>,
    pub system_memory_mb: Option<u64>,
}

/// Lifecycle state of a provider instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Uninitialized,
    Initializing,
    Ready,
    SessionActive,
}

/// Opaque session identifier, unique per creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a conversation owned by one provider.
///
/// Backend-private state stays inside the provider, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    /// Name of the provider that created this session
    pub provider: String,
    pub config: SessionConfig,
}

impl Session {
    pub fn new(provider: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            id: SessionId::new(),
            provider: provider.into(),
            config,
        }
    }
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a session's conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One entry of `detect_providers`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReport {
    pub descriptor: ProviderDescriptor,
    pub availability: Availability,
    /// Whether this provider is the manager's active provider
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage_clamped() {
        assert_eq!(DownloadProgress::new(ProgressPhase::Downloading, 140.0, None).percentage, 100);
        assert_eq!(DownloadProgress::new(ProgressPhase::Downloading, -3.0, None).percentage, 0);
        assert_eq!(DownloadProgress::new(ProgressPhase::Loading, 42.4, None).percentage, 42);
    }

    #[test]
    fn test_session_ids_unique() {
        let a = Session::new("native", SessionConfig::default());
        let b = Session::new("native", SessionConfig::default());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_only_local_kind_auto_selectable() {
        assert!(ProviderKind::Local.auto_selectable());
        assert!(!ProviderKind::RemoteApi.auto_selectable());
    }
}
