//! Upstream completion transport

use std::io;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::{Client, Proxy, Response, header};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;

use chatrelay_config::UpstreamConfig;

use crate::error::LlmError;
use crate::protocol::ChatResponse;
use crate::request::CompletionRequest;

/// Buffered line source over a streamed response body
pub type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;

/// Service that produces chat completions
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Issue a blocking request; returns the decoded response and its body text
    async fn complete(&self, request: &CompletionRequest) -> Result<(ChatResponse, String), LlmError>;

    /// Issue a streaming request and hand back the response body
    async fn open_stream(&self, request: &CompletionRequest) -> Result<LineSource, LlmError>;
}

/// OpenAI-compatible `/v1/chat/completions` endpoint
pub struct OpenAiUpstream {
    client: Client,
    url: String,
    api_key: SecretString,
}

impl OpenAiUpstream {
    /// Build the transport from configuration
    ///
    /// Fails closed: a blank credential, an unparsable timeout or a
    /// rejected proxy address is a configuration error.
    pub fn new(config: &UpstreamConfig) -> Result<Self, LlmError> {
        if config.api_key.expose_secret().trim().is_empty() {
            return Err(LlmError::Configuration("upstream api_key is empty".to_owned()));
        }

        let timeout = config
            .timeout()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        let mut builder = Client::builder().timeout(timeout);

        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(proxy.as_str())
                .map_err(|e| LlmError::Configuration(format!("invalid upstream proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build upstream client: {e}")))?;

        let base = config.base_url.as_str().trim_end_matches('/');

        Ok(Self {
            client,
            url: format!("{base}/v1/chat/completions"),
            api_key: config.api_key.clone(),
        })
    }

    /// Full completions endpoint address
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, request: &CompletionRequest) -> Result<Response, LlmError> {
        let builder = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret());

        let builder = match &request.raw_body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.clone()),
            None => builder.json(&request.to_wire()),
        };

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, "upstream request failed");
            LlmError::Transport(e.to_string())
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "upstream returned error");
            return Err(LlmError::Transport(format!("upstream returned {status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl Upstream for OpenAiUpstream {
    async fn complete(&self, request: &CompletionRequest) -> Result<(ChatResponse, String), LlmError> {
        let response = self.send(request).await?;

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to read response: {e}")))?;

        let decoded = serde_json::from_str(&body)
            .map_err(|e| LlmError::Transport(format!("failed to parse response: {e}")))?;

        Ok((decoded, body))
    }

    async fn open_stream(&self, request: &CompletionRequest) -> Result<LineSource, LlmError> {
        let response = self.send(request).await?;
        let body = response.bytes_stream().map_err(io::Error::other);

        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }
}
