//! JSON-over-HTTP transport shared by the quote provider and the relays

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::{Error, Result};

/// Minimal JSON transport so bundle/relay/quote clients can be faked in tests
#[async_trait]
pub trait JsonTransport: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value>;

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value>;
}

/// [`JsonTransport`] over reqwest with exponential backoff on transient
/// failures (connection errors, 429, 5xx)
pub struct HttpTransport {
    client: Client,
    retry_base_delay: Duration,
    max_elapsed: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration, retry_base_delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retry_base_delay,
            max_elapsed: Duration::from_millis(500),
        })
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.retry_base_delay,
            max_interval: self.retry_base_delay * 4,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }

    async fn read_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Value>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 429 {
            Err(Error::Http(format!("{}: {}", status, body)))
        } else {
            Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            })
        }
    }

    fn classify(e: Error) -> backoff::Error<Error> {
        if e.is_retryable() {
            warn!("Retryable HTTP error: {}", e);
            backoff::Error::transient(e)
        } else {
            error!("Permanent HTTP error: {}", e);
            backoff::Error::permanent(e)
        }
    }
}

#[async_trait]
impl JsonTransport for HttpTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        retry(self.backoff(), || async {
            let response = self
                .client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(|e| Self::classify(e.into()))?;

            Self::read_response(response).await.map_err(Self::classify)
        })
        .await
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        retry(self.backoff(), || async {
            let response = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(|e| Self::classify(e.into()))?;

            Self::read_response(response).await.map_err(Self::classify)
        })
        .await
    }
}
