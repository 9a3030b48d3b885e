use std::time::Duration;

use jobsync_core::error::AppError;
use jobsync_core::traits::FeedFetcher;
use reqwest::Client;

use crate::parser::parse_feed;

/// HTTP feed fetcher using reqwest.
///
/// Downloads a feed payload with a configurable timeout and parses it into
/// raw items. Timeouts and connection failures map to retryable errors;
/// non-success statuses and unparsable payloads are feed-level failures.
#[derive(Clone)]
pub struct ReqwestFeedFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFeedFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let timeout_secs = timeout.as_secs();
        let client = Client::builder()
            .user_agent("jobsync/0.1 (job feed importer)")
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Http(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

impl FeedFetcher for ReqwestFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<serde_json::Value>, AppError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::Network(format!("Connection failed: {e}"))
            } else {
                AppError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Http(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::Http(format!("Failed to read response body: {e}")))?;

        let items = parse_feed(&body)?;
        tracing::debug!(%url, count = items.len(), "Fetched feed");
        Ok(items)
    }
}
