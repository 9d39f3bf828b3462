//! HTTP transport for Ollama-compatible generation servers.
//!
//! The transport only moves bytes: it maps an [`EndpointShape`] to a URL, posts
//! the payload and hands back the status and body stream. Status policy lives in
//! [`crate::client::GenerationClient`].

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pagesmith_abstraction::{
    EndpointShape, GenerationTransport, ModelError, TransportResponse,
};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Default server URL for a local Ollama instance.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// reqwest-backed [`GenerationTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// The base URL for the API (e.g., "http://localhost:11434").
    base_url: String,
    /// HTTP client for making requests.
    client: Client,
}

impl HttpTransport {
    /// Creates a transport against the default local server.
    ///
    /// # Errors
    /// Returns a `ModelError` if the HTTP client cannot be created.
    pub fn new() -> Result<Self, ModelError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a transport with a custom base URL.
    ///
    /// # Errors
    /// Returns a `ModelError` if the HTTP client cannot be created.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ModelError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ModelError::Other(format!("Failed to build HTTP client: {e}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { base_url, client })
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL for an endpoint shape.
    pub fn endpoint_url(&self, shape: EndpointShape) -> String {
        match shape {
            EndpointShape::Chat => format!("{}/api/chat", self.base_url),
            EndpointShape::Completion => format!("{}/api/generate", self.base_url),
        }
    }
}

#[async_trait]
impl GenerationTransport for HttpTransport {
    async fn call(
        &self,
        shape: EndpointShape,
        payload: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse, ModelError> {
        let url = self.endpoint_url(shape);
        debug!(url = %url, shape = %shape, "Sending generation request");

        let send = self.client.post(&url).json(&payload).send();
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(url = %url, "Generation request cancelled before response");
                return Err(ModelError::Cancelled);
            }
            result = send => result.map_err(|e| {
                error!(error = %e, base_url = %self.base_url, "Failed to reach generation server");
                if e.is_connect() {
                    ModelError::Request(format!(
                        "Generation server not reachable at {}. Start it with 'ollama serve'.",
                        self.base_url
                    ))
                } else {
                    ModelError::Request(format!("Network error: {e}"))
                }
            })?,
        };

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ModelError::Request(format!("Stream error: {e}"))));

        Ok(TransportResponse { status, body: Some(Box::pin(body)) })
    }
}
