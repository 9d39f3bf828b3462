//! Generation backends for Pagesmith.
//!
//! This crate provides concrete implementations of the `Generator` trait.
//!
//! # Components
//!
//! - **ndjson**: chunked reader turning a byte stream into decoded records
//! - **http**: reqwest transport for Ollama-compatible servers
//! - **client**: streaming client with chat → completion fallback
//! - **Mock**: scripted generator for testing and offline development

pub mod client;
pub mod http;
pub mod ndjson;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pagesmith_abstraction::{
    ChatMessage, GenerationRecord, Generator, ModelError, ModelParameters, RecordStream,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use client::{flatten_transcript, GenerationClient};
pub use http::{HttpTransport, DEFAULT_BASE_URL};
pub use ndjson::NdjsonStream;

/// One scripted answer of a [`MockGenerator`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Stream these chunks, optionally sleeping before each one.
    Chunks {
        /// Text deltas in order.
        chunks: Vec<String>,
        /// Pause before each chunk.
        delay: Option<Duration>,
    },
    /// Fail before any record is produced.
    StartError(ModelError),
    /// Stream these chunks, then fail.
    StreamError {
        /// Text deltas produced before the failure.
        chunks: Vec<String>,
        /// Error yielded after the chunks.
        error: ModelError,
    },
}

/// A scripted implementation of the `Generator` trait for tests.
///
/// Each call to `generate` consumes the next queued reply. Calls beyond the
/// script fail with `ModelError::Other`.
#[derive(Debug, Default)]
pub struct MockGenerator {
    id: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockGenerator {
    /// Creates a new `MockGenerator` with the given ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }

    /// Queue a reply.
    #[must_use]
    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        self.push(reply);
        self
    }

    /// Queue a reply streamed as the given chunks.
    #[must_use]
    pub fn with_text<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_reply(ScriptedReply::Chunks {
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: None,
        })
    }

    /// Queue a reply whose chunks arrive `delay` apart.
    #[must_use]
    pub fn with_slow_text<I, S>(self, chunks: I, delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_reply(ScriptedReply::Chunks {
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: Some(delay),
        })
    }

    /// Queue a reply at runtime.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push_back(reply);
    }

    /// Message lists received so far, one entry per call.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Number of `generate` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
        cancel: CancellationToken,
    ) -> Result<RecordStream, ModelError> {
        debug!(
            model_id = %self.id,
            message_count = messages.len(),
            parameters = ?parameters,
            "MockGenerator generating"
        );
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(messages.to_vec());

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| ModelError::Other(format!("MockGenerator '{}' has no reply left", self.id)))?;

        let (chunks, delay, error) = match reply {
            ScriptedReply::StartError(error) => return Err(error),
            ScriptedReply::Chunks { chunks, delay } => (chunks, delay, None),
            ScriptedReply::StreamError { chunks, error } => (chunks, None, Some(error)),
        };

        let completion_tokens = u32::try_from(chunks.len()).unwrap_or(u32::MAX);
        let records = futures::stream::iter(chunks)
            .then(move |chunk| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, ModelError>(GenerationRecord::text(chunk))
            })
            .chain(futures::stream::iter(match error {
                Some(error) => vec![Err(error)],
                None => vec![Ok(GenerationRecord::finished(None, Some(completion_tokens)))],
            }))
            .take_until(cancel.cancelled_owned());

        Ok(Box::pin(records))
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}
