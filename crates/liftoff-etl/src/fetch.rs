//! JSON document fetching
//!
//! Fetch failures never cross this boundary as errors: [`Fetcher::fetch`]
//! logs the categorized failure and returns `None`, and the caller decides
//! whether an absent document is fatal for its stage.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::EtlConfig;
use crate::error::{EtlError, Result};

/// Default pause before the first retry; later retries wait proportionally longer
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Why a fetch produced no document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Timeout,
    Transport(String),
    /// Non-2xx response
    Status(u16),
    /// Body is not valid JSON
    Parse(String),
}

impl FetchFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchFailure::Timeout => "timeout",
            FetchFailure::Transport(_) => "transport",
            FetchFailure::Status(_) => "status",
            FetchFailure::Parse(_) => "parse",
        }
    }

    /// Client errors and bad bodies will not improve on a second attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchFailure::Timeout | FetchFailure::Transport(_) => true,
            FetchFailure::Status(code) => *code >= 500,
            FetchFailure::Parse(_) => false,
        }
    }
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::Timeout => write!(f, "request timed out"),
            FetchFailure::Transport(msg) => write!(f, "request failed: {}", msg),
            FetchFailure::Status(code) => write!(f, "unexpected HTTP status {}", code),
            FetchFailure::Parse(msg) => write!(f, "failed to parse JSON: {}", msg),
        }
    }
}

/// Source of JSON documents
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch and parse one document, reporting the failure category
    async fn fetch_json(&self, url: &str) -> std::result::Result<Value, FetchFailure>;

    /// Fetch one document; failures are logged and yield `None`
    async fn fetch(&self, url: &str) -> Option<Value> {
        match self.fetch_json(url).await {
            Ok(document) => Some(document),
            Err(failure) => {
                error!(url, kind = failure.kind(), error = %failure, "Fetch failed");
                None
            },
        }
    }
}

/// [`Fetcher`] over HTTP GET with a per-request timeout
pub struct HttpFetcher {
    client: Client,
    retries: u32,
    backoff: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("liftoff-etl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EtlError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retries,
            backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        Self::new(config.request_timeout(), config.fetch_retries)
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, url: &str) -> std::result::Result<Value, FetchFailure> {
        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(classify)?;
        serde_json::from_slice(&body).map_err(|e| FetchFailure::Parse(e.to_string()))
    }
}

fn classify(err: reqwest::Error) -> FetchFailure {
    if err.is_timeout() {
        FetchFailure::Timeout
    } else {
        FetchFailure::Transport(err.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_json(&self, url: &str) -> std::result::Result<Value, FetchFailure> {
        let mut attempt: u32 = 1;
        loop {
            info!(url, attempt, "Sending GET request");

            match self.attempt(url).await {
                Ok(document) => {
                    info!(url, attempt, "Request successful");
                    return Ok(document);
                },
                Err(failure) if failure.is_retryable() && attempt <= self.retries => {
                    warn!(url, attempt, kind = failure.kind(), error = %failure, "Request failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                },
                Err(failure) => return Err(failure),
            }
        }
    }
}
