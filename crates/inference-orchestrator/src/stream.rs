//! Streaming and cancellation protocol shared by every provider
//!
//! Providers adapt their transport (platform stream reader, engine chunk
//! iterator, HTTP body) into a [`ChunkSource`] and hand it to
//! [`cancellable_stream`], which enforces the rules every consumer relies on:
//!
//! - chunks are yielded in generation order, normalized to deltas
//! - the request's [`CancellationToken`] is checked before every fetch; once
//!   signalled the transport is cancelled and released, exactly one
//!   [`ProviderError::StreamCancelled`] is yielded, and the stream ends
//! - the transport is released on completion, error, cancellation, and when
//!   the consumer drops the stream early
//! - the session's [`GenerationSlot`] stays occupied until the stream ends

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use tokio_util::sync::CancellationToken;

use crate::provider::ProviderError;
use crate::types::ChunkSemantics;

/// Lazy, finite sequence of text deltas produced by `prompt_streaming`
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// A provider's raw chunk transport.
///
/// `next_chunk` must be cancel-safe: the protocol may drop an in-flight call
/// when the request's token fires.
#[async_trait]
pub trait ChunkSource: Send {
    /// Next raw chunk, or `None` once generation has finished
    async fn next_chunk(&mut self) -> Result<Option<String>, ProviderError>;

    /// Ask the transport to stop generating (abort the request, interrupt the engine)
    async fn cancel(&mut self) {}

    /// Release the reader/lock held by this transport. Called exactly once.
    fn release(&mut self) {}
}

/// Converts full-replace chunks into deltas
#[derive(Debug)]
pub struct DeltaNormalizer {
    semantics: ChunkSemantics,
    emitted: String,
}

impl DeltaNormalizer {
    pub fn new(semantics: ChunkSemantics) -> Self {
        Self {
            semantics,
            emitted: String::new(),
        }
    }

    /// Turn a raw chunk into the text newly added by it, if any
    pub fn push(&mut self, chunk: String) -> Option<String> {
        let delta = match self.semantics {
            ChunkSemantics::Delta => chunk,
            ChunkSemantics::FullReplace => {
                if chunk.starts_with(self.emitted.as_str()) {
                    let delta = chunk[self.emitted.len()..].to_string();
                    self.emitted = chunk;
                    delta
                } else if self.emitted.starts_with(chunk.as_str()) {
                    // Truncated snapshot; delivered text stays the baseline
                    log::debug!(
                        "Full-replace chunk shorter than delivered text ({} < {} bytes)",
                        chunk.len(),
                        self.emitted.len()
                    );
                    return None;
                } else {
                    // Deltas cannot be retracted; resume where the versions diverge
                    log::warn!("Full-replace chunk rewrote earlier output; emitting divergent tail");
                    let delta = chunk[common_prefix_len(&self.emitted, &chunk)..].to_string();
                    self.emitted = chunk;
                    delta
                }
            }
        };
        (!delta.is_empty()).then_some(delta)
    }
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((idx, _), _)| idx)
        .unwrap_or_else(|| a.len().min(b.len()))
}

/// Per-session guard allowing at most one generation in flight
#[derive(Debug, Clone, Default)]
pub struct GenerationSlot {
    busy: Arc<AtomicBool>,
}

impl GenerationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot; `None` while another generation holds it
    pub fn try_acquire(&self) -> Option<GenerationPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GenerationPermit {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held by a live stream; frees its [`GenerationSlot`] on drop
#[derive(Debug)]
pub struct GenerationPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for GenerationPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Owns the transport and guarantees `release` runs exactly once
struct SourceGuard {
    source: Box<dyn ChunkSource>,
    released: bool,
}

impl SourceGuard {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.source.release();
        }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

enum Step {
    Chunk(String),
    Finished,
    Failed(ProviderError),
    Cancelled,
}

struct StreamState {
    source: SourceGuard,
    normalizer: DeltaNormalizer,
    token: CancellationToken,
    _permit: Option<GenerationPermit>,
}

impl StreamState {
    async fn step(&mut self) -> Step {
        loop {
            if self.token.is_cancelled() {
                self.source.source.cancel().await;
                self.source.release();
                return Step::Cancelled;
            }

            let fetched = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                chunk = self.source.source.next_chunk() => Some(chunk),
            };

            match fetched {
                // Token fired while waiting; handled at the top of the loop
                None => continue,
                Some(Ok(Some(raw))) => {
                    if let Some(delta) = self.normalizer.push(raw) {
                        return Step::Chunk(delta);
                    }
                }
                Some(Ok(None)) => {
                    self.source.release();
                    return Step::Finished;
                }
                Some(Err(e)) => {
                    self.source.release();
                    return Step::Failed(e);
                }
            }
        }
    }
}

/// Wrap a transport in the shared streaming protocol
pub fn cancellable_stream(
    source: Box<dyn ChunkSource>,
    semantics: ChunkSemantics,
    token: CancellationToken,
    permit: Option<GenerationPermit>,
) -> TextStream {
    let state = StreamState {
        source: SourceGuard {
            source,
            released: false,
        },
        normalizer: DeltaNormalizer::new(semantics),
        token,
        _permit: permit,
    };

    let stream = stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        match state.step().await {
            Step::Chunk(delta) => Some((Ok(delta), Some(state))),
            Step::Finished => None,
            Step::Failed(e) => {
                log::warn!("Stream failed: {}", e);
                Some((Err(e), None))
            }
            Step::Cancelled => {
                log::debug!("Stream cancelled by caller");
                Some((Err(ProviderError::StreamCancelled), None))
            }
        }
    });

    Box::pin(stream)
}
