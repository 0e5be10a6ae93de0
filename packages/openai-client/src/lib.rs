//! Pure OpenAI REST API client
//!
//! A clean, minimal client for the OpenAI API with no domain-specific logic.
//! Supports chat completions (including vision via inline image parts),
//! JSON-mode responses, and embeddings, against either the hosted OpenAI API
//! or an Azure OpenAI deployment.
//!
//! # Example
//!
//! ```rust,ignore
//! use openai_client::{OpenAIClient, ChatRequest, Message};
//!
//! let client = OpenAIClient::from_env()?;
//!
//! // Chat completion
//! let response = client.chat_completion(
//!     ChatRequest::new("gpt-4.1")
//!         .message(Message::system("You extract text from documents."))
//!         .message(Message::user("Hello!")),
//! ).await?;
//!
//! // Embeddings
//! let vectors = client
//!     .create_embeddings(&["text to embed".into()], "text-embedding-3-small")
//!     .await?;
//! ```

pub mod error;
pub mod types;

pub use error::{OpenAIError, Result};
pub use types::*;

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Which API surface the client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// Hosted OpenAI API (`https://api.openai.com/v1`).
    OpenAI,
    /// Azure OpenAI deployment; the model name doubles as the deployment name.
    Azure {
        endpoint: String,
        api_version: String,
    },
}

/// Minimal OpenAI API client.
#[derive(Clone)]
pub struct OpenAIClient {
    http_client: Client,
    api_key: String,
    base_url: String,
    provider: Provider,
    timeout: Duration,
}

impl OpenAIClient {
    /// Create a new OpenAI client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            provider: Provider::OpenAI,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create from environment variable `OPENAI_API_KEY`.
    ///
    /// When `OPENAI_PROVIDER=azure`, `AZURE_OPENAI_ENDPOINT` and
    /// `AZURE_OPENAI_API_VERSION` select the Azure surface instead.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| OpenAIError::Config("OPENAI_API_KEY not set".into()))?;
        let mut client = Self::new(api_key);

        if std::env::var("OPENAI_PROVIDER").as_deref() == Ok("azure") {
            let endpoint = std::env::var("AZURE_OPENAI_ENDPOINT").map_err(|_| {
                OpenAIError::Config("AZURE_OPENAI_ENDPOINT required for azure provider".into())
            })?;
            let api_version = std::env::var("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|_| "2024-06-01".to_string());
            client = client.with_azure(endpoint, api_version);
        }

        Ok(client)
    }

    /// Set a custom base URL (for proxies or compatible gateways).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Target an Azure OpenAI endpoint.
    pub fn with_azure(mut self, endpoint: impl Into<String>, api_version: impl Into<String>) -> Self {
        self.provider = Provider::Azure {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
        };
        self
    }

    /// Set the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the per-request deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn chat_url(&self, model: &str) -> String {
        match &self.provider {
            Provider::OpenAI => format!("{}/chat/completions", self.base_url),
            Provider::Azure {
                endpoint,
                api_version,
            } => format!(
                "{endpoint}/openai/deployments/{model}/chat/completions?api-version={api_version}"
            ),
        }
    }

    fn embeddings_url(&self, model: &str) -> String {
        match &self.provider {
            Provider::OpenAI => format!("{}/embeddings", self.base_url),
            Provider::Azure {
                endpoint,
                api_version,
            } => format!(
                "{endpoint}/openai/deployments/{model}/embeddings?api-version={api_version}"
            ),
        }
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.provider {
            Provider::OpenAI => request.bearer_auth(&self.api_key),
            Provider::Azure { .. } => request.header("api-key", &self.api_key),
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> OpenAIError {
        if err.is_timeout() {
            OpenAIError::Timeout(self.timeout.as_secs_f64())
        } else {
            OpenAIError::Network(err.to_string())
        }
    }

    /// Send a chat completion request and return the first choice's content.
    pub async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        debug!(model = %request.model, messages = request.messages.len(), "chat completion request");

        let url = self.chat_url(&request.model);
        let response = self
            .apply_auth(self.http_client.post(&url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OpenAIError::Network(e.to_string()))?;

        if !status.is_success() {
            warn!(%status, "chat completion failed");
            return Err(OpenAIError::Api(format!("{status}: {body}")));
        }

        let raw: ChatResponseRaw = serde_json::from_str(&body)
            .map_err(|e| OpenAIError::Parse(format!("invalid chat response: {e}")))?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OpenAIError::Parse("response contained no choices".into()))?;

        Ok(ChatResponse {
            content,
            usage: raw.usage,
        })
    }

    /// Create embeddings for a batch of inputs.
    ///
    /// Returns one vector per input, in input order.
    pub async fn create_embeddings(&self, inputs: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        debug!(model, count = inputs.len(), "embedding request");

        let url = self.embeddings_url(model);
        let request = EmbeddingRequest {
            model: model.to_string(),
            input: inputs.to_vec(),
        };

        let response = self
            .apply_auth(self.http_client.post(&url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OpenAIError::Network(e.to_string()))?;

        if !status.is_success() {
            warn!(%status, "embedding request failed");
            return Err(OpenAIError::Api(format!("{status}: {body}")));
        }

        let raw: EmbeddingResponseRaw = serde_json::from_str(&body)
            .map_err(|e| OpenAIError::Parse(format!("invalid embedding response: {e}")))?;

        let mut data = raw.data;
        data.sort_by_key(|d| d.index);

        if data.len() != inputs.len() {
            return Err(OpenAIError::Parse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                data.len()
            )));
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_serializes_text_content_as_string() {
        let request = ChatRequest::new("gpt-4.1")
            .message(Message::user("hello"))
            .json_mode();

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn chat_request_serializes_image_parts() {
        let request = ChatRequest::new("gpt-4.1").message(Message::user_with_image(
            "read this page",
            "data:image/png;base64,AAAA",
        ));

        let json = serde_json::to_value(&request).unwrap();
        let parts = json["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn azure_urls_embed_deployment_and_api_version() {
        let client = OpenAIClient::new("key").with_azure("https://example.openai.azure.com/", "2024-06-01");
        assert_eq!(
            client.chat_url("gpt-4.1"),
            "https://example.openai.azure.com/openai/deployments/gpt-4.1/chat/completions?api-version=2024-06-01"
        );
        assert_eq!(
            client.embeddings_url("text-embedding-3-small"),
            "https://example.openai.azure.com/openai/deployments/text-embedding-3-small/embeddings?api-version=2024-06-01"
        );
    }
}
