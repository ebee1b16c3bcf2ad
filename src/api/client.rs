use std::time::Duration;

use futures::Stream;
use futures::TryStreamExt;
use reqwest::{header, Client, StatusCode};
use thiserror::Error;
use url::Url;

use super::models::ApiConfig;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Server responded with HTTP {0}")]
    Status(StatusCode),
}

impl ApiError {
    /// Short human-readable cause, without the URL reqwest likes to repeat.
    pub fn reason(&self) -> String {
        match self {
            ApiError::RequestError(e) if e.is_timeout() => "timed out".to_string(),
            ApiError::RequestError(e) if e.is_connect() => {
                format!("connection failed: {}", root_cause(e))
            }
            ApiError::RequestError(e) => root_cause(e),
            ApiError::Status(status) => format!("HTTP {}", status.as_u16()),
        }
    }
}

fn root_cause(error: &(dyn std::error::Error + 'static)) -> String {
    let mut current = error;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new(ApiConfig::default())
    }
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Self {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });

        Self { client }
    }

    /// Reachability check: any HTTP response counts, whatever its status.
    pub async fn probe(&self, url: &Url, timeout: Duration) -> Result<StatusCode> {
        let response = self
            .client
            .head(url.clone())
            .header(header::ACCEPT, "*/*")
            .timeout(timeout)
            .send()
            .await?;

        Ok(response.status())
    }

    /// Starts a streamed GET.
    /// Returns (total_size, stream)
    pub async fn download_file_stream(
        &self,
        url: &Url,
    ) -> Result<(Option<u64>, impl Stream<Item = Result<bytes::Bytes>>)> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status));
        }

        let total_size = response.content_length();
        let stream = response.bytes_stream().map_err(ApiError::RequestError);

        Ok((total_size, stream))
    }
}
