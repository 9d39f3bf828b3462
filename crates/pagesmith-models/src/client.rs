//! Generation client with transparent call-shape fallback.
//!
//! The client speaks the chat shape first. Servers that do not expose the chat
//! endpoint answer 404; the same intent is then re-issued against the completion
//! endpoint with the conversation flattened into one transcript. Callers only
//! ever see a [`RecordStream`].

use std::fmt::Write;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{future, StreamExt};
use pagesmith_abstraction::{
    ByteStream, ChatMessage, EndpointShape, GenerationRecord, GenerationTransport, Generator,
    ModelError, ModelParameters, RecordStream, TransportResponse,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::http::HttpTransport;
use crate::ndjson::NdjsonStream;

/// Status the service uses to say a call shape is not available.
const UNSUPPORTED_STATUS: u16 = 404;

/// Longest error body kept in a `ModelError::Api` message.
const MAX_ERROR_BODY: usize = 2048;

/// Streaming client over any [`GenerationTransport`].
#[derive(Clone)]
pub struct GenerationClient {
    /// The model ID (e.g., "llama3.1", "qwen2.5-coder:7b").
    model_id: String,
    transport: Arc<dyn GenerationTransport>,
}

impl std::fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient").field("model_id", &self.model_id).finish_non_exhaustive()
    }
}

impl GenerationClient {
    /// Creates a client over an arbitrary transport.
    pub fn new(model_id: impl Into<String>, transport: Arc<dyn GenerationTransport>) -> Self {
        Self { model_id: model_id.into(), transport }
    }

    /// Creates a client talking HTTP to an Ollama-compatible server.
    ///
    /// # Errors
    /// Returns a `ModelError` if the HTTP client cannot be created.
    pub fn ollama(
        model_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let transport = HttpTransport::with_base_url(base_url)?;
        Ok(Self::new(model_id, Arc::new(transport)))
    }

    fn build_options(parameters: Option<&ModelParameters>) -> Option<WireOptions> {
        parameters.map(|p| WireOptions { temperature: p.temperature, num_predict: p.max_tokens })
    }

    fn chat_payload(
        &self,
        messages: &[ChatMessage],
        parameters: Option<&ModelParameters>,
    ) -> Result<serde_json::Value, ModelError> {
        let request = ChatRequest {
            model: &self.model_id,
            messages,
            stream: true,
            options: Self::build_options(parameters),
        };
        serde_json::to_value(request)
            .map_err(|e| ModelError::Serialization(format!("Failed to encode chat request: {e}")))
    }

    fn completion_payload(
        &self,
        messages: &[ChatMessage],
        parameters: Option<&ModelParameters>,
    ) -> Result<serde_json::Value, ModelError> {
        let request = CompletionRequest {
            model: &self.model_id,
            prompt: flatten_transcript(messages),
            stream: true,
            options: Self::build_options(parameters),
        };
        serde_json::to_value(request).map_err(|e| {
            ModelError::Serialization(format!("Failed to encode completion request: {e}"))
        })
    }

    /// Turns a transport response into a body stream, or the matching error.
    async fn accept(response: TransportResponse, shape: EndpointShape) -> Result<ByteStream, ModelError> {
        let status = response.status;
        if !response.is_success() {
            let message = match response.body {
                Some(body) => read_error_body(body).await,
                None => "Unknown error".to_string(),
            };
            error!(status, shape = %shape, error = %message, "Generation service returned error status");
            if status == UNSUPPORTED_STATUS && shape == EndpointShape::Completion {
                return Err(ModelError::EndpointUnsupported(format!(
                    "neither chat nor completion endpoint is available: {message}"
                )));
            }
            return Err(ModelError::Api { status, message });
        }
        response.body.ok_or(ModelError::MissingBody)
    }
}

#[async_trait]
impl Generator for GenerationClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
        cancel: CancellationToken,
    ) -> Result<RecordStream, ModelError> {
        debug!(
            model_id = %self.model_id,
            message_count = messages.len(),
            parameters = ?parameters,
            "Starting streaming generation"
        );

        let payload = self.chat_payload(messages, parameters.as_ref())?;
        let mut shape = EndpointShape::Chat;
        let mut response = self.transport.call(shape, payload, &cancel).await?;

        if response.status == UNSUPPORTED_STATUS {
            info!(
                model_id = %self.model_id,
                "Chat endpoint unsupported, retrying with completion shape"
            );
            drop(response);
            shape = EndpointShape::Completion;
            let payload = self.completion_payload(messages, parameters.as_ref())?;
            response = self.transport.call(shape, payload, &cancel).await?;
        }

        let body = Self::accept(response, shape).await?;
        let records = NdjsonStream::<WireRecord>::new(body)
            .map(|item| item.and_then(WireRecord::into_record))
            .scan(false, |failed, item| {
                if *failed {
                    return future::ready(None);
                }
                *failed = item.is_err();
                future::ready(Some(item))
            })
            .take_until(cancel.cancelled_owned());

        Ok(Box::pin(records))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Flatten a message list into one role-prefixed transcript for the completion shape.
pub fn flatten_transcript(messages: &[ChatMessage]) -> String {
    let mut transcript = String::new();
    for message in messages {
        let _ = write!(transcript, "{}: {}\n\n", role_label(&message.role), message.content.trim_end());
    }
    transcript.push_str("Assistant:");
    transcript
}

fn role_label(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => "User".to_string(),
    }
}

async fn read_error_body(mut body: ByteStream) -> String {
    let mut raw = Vec::new();
    while let Some(Ok(chunk)) = body.next().await {
        raw.extend_from_slice(&chunk);
        if raw.len() >= MAX_ERROR_BODY {
            raw.truncate(MAX_ERROR_BODY);
            break;
        }
    }
    let text = String::from_utf8_lossy(&raw).trim().to_string();
    match serde_json::from_str::<WireError>(&text) {
        Ok(parsed) => parsed.error,
        Err(_) if text.is_empty() => "Unknown error".to_string(),
        Err(_) => text,
    }
}

// Wire structures for the Ollama-style API

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<WireOptions>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<WireOptions>,
}

#[derive(Serialize)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>, // max_tokens equivalent
}

#[derive(Deserialize)]
struct WireRecord {
    message: Option<WireMessage>,
    response: Option<String>,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct WireError {
    error: String,
}

impl WireRecord {
    fn into_record(self) -> Result<GenerationRecord, ModelError> {
        if let Some(error) = self.error {
            return Err(ModelError::ModelResponse(error));
        }
        let delta = self
            .message
            .map(|m| m.content)
            .or(self.response)
            .unwrap_or_default();
        Ok(GenerationRecord {
            delta,
            prompt_tokens: self.prompt_eval_count,
            completion_tokens: self.eval_count,
            done: self.done,
        })
    }
}
