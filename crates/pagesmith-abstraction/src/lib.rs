//! Generation abstraction layer for Pagesmith.
//!
//! This module defines the core traits and types shared between the generation
//! client and the orchestration engine.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Represents an error that can occur when talking to the generation service.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// The request could not be sent or the connection broke mid-stream.
    #[error("Request Error: {0}")]
    Request(String),

    /// The service answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error text reported by the service.
        message: String,
    },

    /// The requested endpoint shape is not supported by the service.
    #[error("Endpoint not supported: {0}")]
    EndpointUnsupported(String),

    /// The service answered with a success status but no body.
    #[error("Response has no body")]
    MissingBody,

    /// An upstream record could not be decoded.
    #[error("Serialization Error: {0}")]
    Serialization(String),

    /// The model reported an error inside the record stream.
    #[error("Model Response Error: {0}")]
    ModelResponse(String),

    /// The request was cancelled by the caller.
    #[error("Generation cancelled")]
    Cancelled,

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

/// Represents a message in a conversation with a chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    pub role: String,
    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Parameters for controlling the model's generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// The maximum number of tokens to generate.
    pub max_tokens: Option<u32>,
}

/// One decoded unit from the upstream record stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Text produced since the previous record.
    pub delta: String,
    /// Cumulative prompt tokens, usually only present on the final record.
    pub prompt_tokens: Option<u32>,
    /// Cumulative completion tokens, usually only present on the final record.
    pub completion_tokens: Option<u32>,
    /// Whether the service marked the generation as finished.
    pub done: bool,
}

impl GenerationRecord {
    /// A text-only record.
    pub fn text(delta: impl Into<String>) -> Self {
        Self { delta: delta.into(), ..Self::default() }
    }

    /// A final record with optional token counts.
    pub fn finished(prompt_tokens: Option<u32>, completion_tokens: Option<u32>) -> Self {
        Self { delta: String::new(), prompt_tokens, completion_tokens, done: true }
    }
}

/// The two call shapes exposed by the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointShape {
    /// Message-list chat endpoint.
    Chat,
    /// Single-prompt completion endpoint.
    Completion,
}

impl fmt::Display for EndpointShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Completion => write!(f, "completion"),
        }
    }
}

/// Raw response body as a stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ModelError>> + Send>>;

/// Decoded generation records.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<GenerationRecord, ModelError>> + Send>>;

/// What the transport got back for one call.
pub struct TransportResponse {
    /// HTTP-style status code.
    pub status: u16,
    /// Response body, if the service sent one.
    pub body: Option<ByteStream>,
}

impl TransportResponse {
    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// The wire-level seam to the generation service.
///
/// Implementations must honour `cancel` while the request is in flight and
/// must not interpret the status code; that policy belongs to the client.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    /// Issue one call of the given shape with a JSON payload.
    ///
    /// # Errors
    /// Returns `ModelError::Request` if the request cannot be sent and
    /// `ModelError::Cancelled` if `cancel` fires first.
    async fn call(
        &self,
        shape: EndpointShape,
        payload: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse, ModelError>;
}

/// A trait for streaming text generation.
///
/// All generators must be `Send + Sync` so one instance can serve concurrent runs.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Starts a streaming generation for the given conversation.
    ///
    /// The returned stream ends on upstream completion, on a fatal error
    /// (yielded once), or promptly after `cancel` fires.
    ///
    /// # Errors
    /// Returns a `ModelError` if the generation cannot be started.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
        cancel: CancellationToken,
    ) -> Result<RecordStream, ModelError>;

    /// Returns the ID of the model.
    fn model_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
        assert_eq!(ChatMessage::assistant("a").content, "a");
    }

    #[test]
    fn test_transport_response_success_range() {
        let ok = TransportResponse { status: 200, body: None };
        let missing = TransportResponse { status: 404, body: None };
        assert!(ok.is_success());
        assert!(!missing.is_success());
    }

    #[test]
    fn test_model_error_display() {
        let err = ModelError::Api { status: 500, message: "boom".to_string() };
        assert_eq!(err.to_string(), "API error (500): boom");
        assert_eq!(ModelError::MissingBody.to_string(), "Response has no body");
    }

    #[test]
    fn test_endpoint_shape_display() {
        assert_eq!(EndpointShape::Chat.to_string(), "chat");
        assert_eq!(EndpointShape::Completion.to_string(), "completion");
    }
}
