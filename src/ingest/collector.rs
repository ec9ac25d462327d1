use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::types::TradeRecord;

/// Downstream receiver of a best-effort copy of every trade record.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn push(&self, record: &TradeRecord) -> Result<()>;
}

/// POSTs each record as JSON to a log collector endpoint (e.g. Logstash http input).
pub struct HttpCollector {
    client: Client,
    url: String,
}

impl HttpCollector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn push(&self, record: &TradeRecord) -> Result<()> {
        let resp = self.client.post(&self.url).json(record).send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("Collector responded with status {}", status);
        }
        Ok(())
    }
}

/// Used when collector forwarding is disabled.
pub struct NoopCollector;

#[async_trait]
impl Collector for NoopCollector {
    async fn push(&self, _record: &TradeRecord) -> Result<()> {
        Ok(())
    }
}
