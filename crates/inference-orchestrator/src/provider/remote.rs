//! Remote API provider
//!
//! Talks to an OpenAI-compatible HTTP API. Prompts leave the machine, so
//! this provider is never picked by auto-selection; the user has to switch
//! to it explicitly.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::sessions::{effective_state, Conversation, RecordingSource, SessionTable};
use super::{with_timeout, InferenceProvider, ProviderError};
use crate::config::{ProviderConfig, RemoteApiConfig, SessionConfig};
use crate::stream::{cancellable_stream, ChunkSource, TextStream};
use crate::types::{
    Availability, ChatTurn, ChunkSemantics, ProviderDescriptor, ProviderKind, ProviderState,
    Session,
};

/// Event decoded from a server-sent-events body
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Delta(String),
    Error(String),
    Done,
}

/// Incremental SSE decoder.
///
/// Network chunks do not respect event or UTF-8 boundaries, so bytes are
/// buffered until a full line is available.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }

            match serde_json::from_str::<serde_json::Value>(data) {
                Ok(json) => {
                    if let Some(message) = json
                        .get("error")
                        .and_then(|e| e.get("message").or(Some(e)))
                        .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
                    {
                        events.push(SseEvent::Error(message));
                    } else if let Some(content) = json
                        .get("choices")
                        .and_then(|c| c.get(0))
                        .and_then(|c| c.get("delta"))
                        .and_then(|d| d.get("content"))
                        .and_then(|c| c.as_str())
                        .filter(|c| !c.is_empty())
                    {
                        events.push(SseEvent::Delta(content.to_string()));
                    }
                }
                Err(e) => log::debug!("Skipping malformed SSE payload: {}", e),
            }
        }

        events
    }
}

/// Chunk transport over a streaming HTTP response
struct SseSource {
    response: Option<reqwest::Response>,
    parser: SseParser,
    pending: VecDeque<String>,
    finished: bool,
    /// Server-reported error, surfaced once `pending` has drained
    failed: Option<String>,
}

impl SseSource {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response: Some(response),
            parser: SseParser::default(),
            pending: VecDeque::new(),
            finished: false,
            failed: None,
        }
    }
}

#[async_trait]
impl ChunkSource for SseSource {
    async fn next_chunk(&mut self) -> Result<Option<String>, ProviderError> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }
            if let Some(message) = self.failed.take() {
                self.finished = true;
                return Err(ProviderError::Streaming(format!(
                    "Remote API error: {}",
                    message
                )));
            }
            if self.finished {
                return Ok(None);
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(None);
            };

            match response.chunk().await {
                Ok(Some(bytes)) => {
                    // Events after `[DONE]` or an error are ignored
                    for event in self.parser.feed(&bytes) {
                        if self.finished || self.failed.is_some() {
                            break;
                        }
                        match event {
                            SseEvent::Delta(text) => self.pending.push_back(text),
                            SseEvent::Done => self.finished = true,
                            SseEvent::Error(message) => self.failed = Some(message),
                        }
                    }
                }
                Ok(None) => self.finished = true,
                Err(e) => {
                    return Err(ProviderError::Streaming(format!(
                        "Response stream failed: {}",
                        e
                    )))
                }
            }
        }
    }

    async fn cancel(&mut self) {
        // Dropping the response aborts the connection
        self.response = None;
    }

    fn release(&mut self) {
        self.response = None;
    }
}

/// Provider backed by an OpenAI-compatible remote API
pub struct RemoteApiProvider {
    descriptor: ProviderDescriptor,
    config: RemoteApiConfig,
    http_client: reqwest::Client,
    state: Mutex<ProviderState>,
    model: Mutex<String>,
    sessions: SessionTable<Conversation>,
    init_lock: tokio::sync::Mutex<()>,
}

impl RemoteApiProvider {
    pub const NAME: &'static str = "remote-api";

    pub fn new(config: RemoteApiConfig) -> Self {
        let model = config.model.clone();
        Self {
            descriptor: ProviderDescriptor {
                name: Self::NAME.to_string(),
                kind: ProviderKind::RemoteApi,
                description: "Remote OpenAI-compatible API. Prompts are sent over the network; requires an API key."
                    .to_string(),
                native_chunking: ChunkSemantics::Delta,
            },
            config,
            http_client: reqwest::Client::new(),
            state: Mutex::new(ProviderState::Uninitialized),
            model: Mutex::new(model),
            sessions: SessionTable::new(),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderError::Unavailable("API key not configured".to_string()))
    }

    /// Cheap authenticated request used as the availability probe
    async fn list_models(&self) -> Result<(), ProviderError> {
        let key = self.api_key()?;
        let request = self
            .http_client
            .get(self.endpoint("models"))
            .bearer_auth(key)
            .send();
        let response = with_timeout(self.request_timeout(), "model listing", async {
            request.await.map_err(ProviderError::from)
        })
        .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!(
                "API error {}: {}",
                status, body
            )));
        }
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        matches!(*self.state.lock(), ProviderState::Ready)
    }
}

#[async_trait]
impl InferenceProvider for RemoteApiProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn check_availability(&self) -> Availability {
        match self.list_models().await {
            Ok(()) => Availability::ready(),
            Err(ProviderError::Unavailable(reason)) => Availability::unavailable(reason),
            Err(e) => Availability::unavailable(e.to_string()),
        }
    }

    async fn initialize(&self, config: &ProviderConfig) -> Result<(), ProviderError> {
        let _guard = self.init_lock.lock().await;
        let model = config
            .model_id
            .clone()
            .unwrap_or_else(|| self.config.model.clone());

        if self.is_initialized() && *self.model.lock() == model {
            return Ok(());
        }

        *self.state.lock() = ProviderState::Initializing;
        match self.list_models().await {
            Ok(()) => {
                *self.model.lock() = model;
                *self.state.lock() = ProviderState::Ready;
                log::info!("Remote API provider ready");
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = ProviderState::Uninitialized;
                Err(ProviderError::InitializationFailed(e.to_string()))
            }
        }
    }

    fn state(&self) -> ProviderState {
        effective_state(*self.state.lock(), !self.sessions.is_empty())
    }

    async fn dispose(&self) -> Result<(), ProviderError> {
        self.sessions.drain();
        *self.state.lock() = ProviderState::Uninitialized;
        Ok(())
    }

    async fn create_session(&self, config: &SessionConfig) -> Result<Session, ProviderError> {
        if !self.is_initialized() {
            return Err(ProviderError::Session(
                "Remote API provider is not initialized".to_string(),
            ));
        }
        config.validate()?;

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
        let key = self.api_key()?;

        let user = ChatTurn::user(text);
        let model = conversation
            .config
            .model_id
            .clone()
            .unwrap_or_else(|| self.model.lock().clone());
        let mut body = serde_json::json!({
            "model": model,
            "messages": conversation.messages_with(&user),
            "stream": true,
            "temperature": conversation.config.temperature,
        });
        if let Some(max_tokens) = conversation.config.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let request = self
            .http_client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(key)
            .json(&body)
            .send();
        let response = with_timeout(self.request_timeout(), "chat completion", async {
            request.await.map_err(ProviderError::from)
        })
        .await
        .map_err(|e| ProviderError::Streaming(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Streaming(format!(
                "API error {}: {}",
                status, body
            )));
        }

        Ok(cancellable_stream(
            Box::new(RecordingSource::new(
                Box::new(SseSource::new(response)),
                conversation,
                user,
            )),
            ChunkSemantics::Delta,
            cancel,
            Some(permit),
        ))
    }

    async fn destroy_session(&self, session: &Session) {
        self.sessions.remove(&session.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(json: &str) -> String {
        format!("data: {}\n\n", json)
    }

    #[test]
    fn test_parse_delta_and_done() {
        let mut parser = SseParser::default();
        let body = format!(
            "{}{}data: [DONE]\n\n",
            data(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#),
            data(r#"{"choices":[{"delta":{"content":"lo"}}]}"#),
        );
        assert_eq!(
            parser.feed(body.as_bytes()),
            vec![
                SseEvent::Delta("Hel".to_string()),
                SseEvent::Delta("lo".to_string()),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn test_event_split_across_network_chunks() {
        let mut parser = SseParser::default();
        let body = data(r#"{"choices":[{"delta":{"content":"größer"}}]}"#);
        let bytes = body.as_bytes();
        // Split inside the multibyte "ö"
        let split = body.find('ö').unwrap() + 1;

        assert!(parser.feed(&bytes[..split]).is_empty());
        assert_eq!(
            parser.feed(&bytes[split..]),
            vec![SseEvent::Delta("größer".to_string())]
        );
    }

    #[test]
    fn test_role_only_and_malformed_payloads_skipped() {
        let mut parser = SseParser::default();
        let body = format!(
            "{}data: {{not json}}\n\n: keep-alive\n\n",
            data(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#),
        );
        assert!(parser.feed(body.as_bytes()).is_empty());
    }

    #[test]
    fn test_error_payload() {
        let mut parser = SseParser::default();
        let body = data(r#"{"error":{"message":"rate limited"}}"#);
        assert_eq!(
            parser.feed(body.as_bytes()),
            vec![SseEvent::Error("rate limited".to_string())]
        );
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = SseParser::default();
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\n\r\n";
        assert_eq!(parser.feed(body.as_bytes()), vec![SseEvent::Delta("x".to_string())]);
    }

    #[tokio::test]
    async fn test_unavailable_without_api_key() {
        let provider = RemoteApiProvider::new(RemoteApiConfig::default());
        let availability = provider.check_availability().await;
        assert!(!availability.available);
        assert_eq!(availability.reason.as_deref(), Some("API key not configured"));
    }

    #[test]
    fn test_descriptor_is_remote() {
        let provider = RemoteApiProvider::new(RemoteApiConfig::default());
        assert_eq!(provider.kind(), ProviderKind::RemoteApi);
        assert!(!provider.kind().auto_selectable());
    }
}
