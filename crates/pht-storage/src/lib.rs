//! Upstream page fetching + profile history persistence.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use pht_core::{HistoryRecord, ObservationOutcome, ObservedFields};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryHistoryStore;
pub use postgres::{PgHistoryStore, PgStoreConfig};

pub const CRATE_NAME: &str = "pht-storage";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

/// Every variant means the upstream page is unavailable. A missing profile
/// and a blocked request map to the same error.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("empty body from {url}")]
    EmptyBody { url: String },
}

impl FetchError {
    /// Upstream status code, when the upstream answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Request { source, .. } => source.status().map(|s| s.as_u16()),
            FetchError::EmptyBody { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Request { source, .. } if source.is_timeout())
    }
}

/// Builds the public profile URL for `handle` under `base_url`.
pub fn profile_url(base_url: &str, handle: &str) -> String {
    format!("{}/@{}", base_url.trim_end_matches('/'), handle)
}

/// Shared upstream HTTP client. Performs no retries; callers own retry policy.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
        })
    }

    pub async fn fetch_text(
        &self,
        request_id: Uuid,
        handle: &str,
        url: &str,
    ) -> Result<FetchedPage, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .expect("fetch semaphore is never closed");

        let span = info_span!("http_fetch", %request_id, handle, url);
        async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|source| FetchError::Request {
                    url: url.to_string(),
                    source,
                })?;

            let status = resp.status();
            let final_url = resp.url().to_string();
            debug!(status = status.as_u16(), "upstream responded");

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.text().await.map_err(|source| FetchError::Request {
                url: final_url.clone(),
                source,
            })?;
            if body.trim().is_empty() {
                return Err(FetchError::EmptyBody { url: final_url });
            }

            Ok(FetchedPage {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("schema migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("store operation `{operation}` timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("history record for {identity_id} vanished while locked")]
    MissingRecord { identity_id: String },
}

/// Keyed history store: one record per identity id.
///
/// `upsert_observation` is the atomic unit. Reading the stored record,
/// computing transitions with [`pht_core::detect_changes`] and writing the
/// result never interleave with another writer for the same identity.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn upsert_observation(
        &self,
        identity_id: &str,
        observed: &ObservedFields,
    ) -> Result<ObservationOutcome, StoreError>;

    async fn get(&self, identity_id: &str) -> Result<Option<HistoryRecord>, StoreError>;

    /// Teardown hook; called once when the process stops serving.
    async fn close(&self) {}
}
