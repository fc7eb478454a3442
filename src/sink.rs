//! Search-index sink (§6): an HTTP JSON service reached over TLS-optional
//! HTTP, initialized as a process-wide singleton with basic auth and
//! exponential backoff retries capped at 30 s.
//!
//! Modeled on a DAO-style singleton with an explicit init/get pair and a
//! retrier wrapping the outbound call, rather than any implicit global.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::config::SinkConfig;
use crate::error::{BrokerError, Result};

/// Index-create keyed by document JSON; identity of the index corresponds to
/// the log record's `"project"` field.
#[async_trait]
pub trait IndexSink: Send + Sync {
    async fn index_create(&self, project: &str, document: Value) -> Result<()>;
}

pub struct HttpIndexSink {
    client: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    retry_floor: Duration,
    retry_ceiling: Duration,
}

impl HttpIndexSink {
    pub fn new(cfg: &SinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(cfg.gzip)
            .build()
            .map_err(|e| BrokerError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            base_url: cfg.base_url(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            retry_floor: Duration::from_secs(cfg.retry_floor_secs),
            retry_ceiling: Duration::from_secs(cfg.retry_ceiling_secs),
        })
    }

    fn index_url(&self, project: &str) -> String {
        format!("{}/{}/_doc", self.base_url, project)
    }
}

#[async_trait]
impl IndexSink for HttpIndexSink {
    async fn index_create(&self, project: &str, document: Value) -> Result<()> {
        const MAX_ATTEMPTS: u32 = 5;

        let mut delay = self.retry_floor;
        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .client
                .post(self.index_url(project))
                .basic_auth(&self.user, Some(&self.password))
                .json(&document)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = Some(format!("sink responded with status {}", response.status()));
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                }
            }

            if attempt == MAX_ATTEMPTS {
                break;
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.retry_ceiling);
        }

        Err(BrokerError::SinkWrite(
            last_error.unwrap_or_else(|| "unknown sink error".into()),
        ))
    }
}

/// Explicit Init/Get lifecycle for the process-wide sink client singleton.
pub struct IndexSinkHandle {
    cell: OnceCell<Arc<dyn IndexSink>>,
}

impl IndexSinkHandle {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn init(&self, cfg: &SinkConfig) -> Result<()> {
        self.cell
            .get_or_try_init(|| async {
                HttpIndexSink::new(cfg).map(|sink| Arc::new(sink) as Arc<dyn IndexSink>)
            })
            .await
            .map(|_| ())
    }

    pub fn get(&self) -> Result<Arc<dyn IndexSink>> {
        self.cell
            .get()
            .cloned()
            .ok_or_else(|| BrokerError::InvalidConfig("index sink not initialized".into()))
    }
}

impl Default for IndexSinkHandle {
    fn default() -> Self {
        Self::new()
    }
}
