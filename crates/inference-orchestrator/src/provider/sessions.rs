//! Session bookkeeping shared by the built-in providers

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::ProviderError;
use crate::config::SessionConfig;
use crate::stream::{ChunkSource, GenerationPermit, GenerationSlot};
use crate::types::{ChatTurn, ProviderState, Session, SessionId};

struct SessionEntry<S> {
    state: Arc<S>,
    slot: GenerationSlot,
}

/// Backend-private session state keyed by session id
pub(crate) struct SessionTable<S> {
    entries: Mutex<HashMap<SessionId, SessionEntry<S>>>,
}

impl<S> SessionTable<S> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, id: SessionId, state: S) {
        self.entries.lock().insert(
            id,
            SessionEntry {
                state: Arc::new(state),
                slot: GenerationSlot::new(),
            },
        );
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<S>> {
        self.entries.lock().remove(id).map(|entry| entry.state)
    }

    pub fn drain(&self) -> Vec<Arc<S>> {
        self.entries
            .lock()
            .drain()
            .map(|(_, entry)| entry.state)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Resolve a session for prompting and claim its generation slot
    pub fn begin_generation(
        &self,
        owner: &str,
        session: &Session,
    ) -> Result<(Arc<S>, GenerationPermit), ProviderError> {
        let entries = self.entries.lock();
        let entry = entries
            .get(&session.id)
            .filter(|_| session.provider == owner)
            .ok_or_else(|| {
                ProviderError::Streaming(format!("Unknown session {} for {}", session.id, owner))
            })?;
        let permit = entry.slot.try_acquire().ok_or_else(|| {
            ProviderError::Streaming(format!(
                "Session {} already has a generation in flight",
                session.id
            ))
        })?;
        Ok((entry.state.clone(), permit))
    }
}

/// Report `SessionActive` while a ready provider holds sessions
pub(crate) fn effective_state(base: ProviderState, has_sessions: bool) -> ProviderState {
    match base {
        ProviderState::Ready if has_sessions => ProviderState::SessionActive,
        other => other,
    }
}

/// Conversation history for providers whose engine is stateless
pub(crate) struct Conversation {
    pub config: SessionConfig,
    history: Mutex<Vec<ChatTurn>>,
}

impl Conversation {
    pub fn new(config: SessionConfig) -> Self {
        let history = config
            .system_prompt
            .iter()
            .map(|prompt| ChatTurn::system(prompt.clone()))
            .collect();
        Self {
            config,
            history: Mutex::new(history),
        }
    }

    /// History followed by the new user turn
    pub fn messages_with(&self, user: &ChatTurn) -> Vec<ChatTurn> {
        let mut messages = self.history.lock().clone();
        messages.push(user.clone());
        messages
    }

    pub fn commit(&self, user: ChatTurn, reply: String) {
        let mut history = self.history.lock();
        history.push(user);
        history.push(ChatTurn::assistant(reply));
    }

    #[cfg(test)]
    pub fn turns(&self) -> usize {
        self.history.lock().len()
    }
}

/// Records the assistant reply and commits the exchange to the conversation
/// once the transport reports completion. Cancelled or failed generations
/// leave the history untouched.
pub(crate) struct RecordingSource {
    inner: Box<dyn ChunkSource>,
    conversation: Arc<Conversation>,
    user: Option<ChatTurn>,
    reply: String,
}

impl RecordingSource {
    pub fn new(inner: Box<dyn ChunkSource>, conversation: Arc<Conversation>, user: ChatTurn) -> Self {
        Self {
            inner,
            conversation,
            user: Some(user),
            reply: String::new(),
        }
    }
}

#[async_trait]
impl ChunkSource for RecordingSource {
    async fn next_chunk(&mut self) -> Result<Option<String>, ProviderError> {
        match self.inner.next_chunk().await? {
            Some(chunk) => {
                self.reply.push_str(&chunk);
                Ok(Some(chunk))
            }
            None => {
                if let Some(user) = self.user.take() {
                    self.conversation
                        .commit(user, std::mem::take(&mut self.reply));
                }
                Ok(None)
            }
        }
    }

    async fn cancel(&mut self) {
        self.inner.cancel().await;
    }

    fn release(&mut self) {
        self.inner.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_generation_rejects_foreign_session() {
        let table = SessionTable::new();
        let session = Session::new("other", SessionConfig::default());
        table.insert(session.id.clone(), ());

        assert!(matches!(
            table.begin_generation("mine", &session),
            Err(ProviderError::Streaming(_))
        ));
    }

    #[test]
    fn test_begin_generation_single_flight() {
        let table = SessionTable::new();
        let session = Session::new("mine", SessionConfig::default());
        table.insert(session.id.clone(), ());

        let (_, permit) = table.begin_generation("mine", &session).unwrap();
        assert!(table.begin_generation("mine", &session).is_err());
        drop(permit);
        assert!(table.begin_generation("mine", &session).is_ok());
    }

    #[tokio::test]
    async fn test_recording_source_commits_on_completion() {
        use crate::stream::testing::ScriptedSource;

        let conversation = Arc::new(Conversation::new(SessionConfig {
            system_prompt: Some("be brief".to_string()),
            ..Default::default()
        }));
        assert_eq!(conversation.turns(), 1);

        let (inner, _) = ScriptedSource::new(&["Hi", " there"]);
        let mut source =
            RecordingSource::new(Box::new(inner), conversation.clone(), ChatTurn::user("hello"));
        while source.next_chunk().await.unwrap().is_some() {}

        let messages = conversation.messages_with(&ChatTurn::user("next"));
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2], ChatTurn::assistant("Hi there"));
    }

    #[tokio::test]
    async fn test_recording_source_skips_unfinished_reply() {
        use crate::stream::testing::ScriptedSource;

        let conversation = Arc::new(Conversation::new(SessionConfig::default()));
        let (inner, _) = ScriptedSource::new(&["partial", "reply"]);
        let mut source =
            RecordingSource::new(Box::new(inner), conversation.clone(), ChatTurn::user("hello"));
        source.next_chunk().await.unwrap();
        drop(source);

        assert_eq!(conversation.turns(), 0);
    }

    #[test]
    fn test_effective_state() {
        assert_eq!(effective_state(ProviderState::Ready, true), ProviderState::SessionActive);
        assert_eq!(effective_state(ProviderState::Ready, false), ProviderState::Ready);
        assert_eq!(
            effective_state(ProviderState::Uninitialized, true),
            ProviderState::Uninitialized
        );
    }
}
