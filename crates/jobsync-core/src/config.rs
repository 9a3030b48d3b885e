use chrono::TimeDelta;

use crate::error::AppError;
use crate::task::RetryConfig;

/// Default feed set, used when `FEED_URLS` is not configured.
pub const DEFAULT_FEED_URLS: &[&str] = &[
    "https://jobicy.com/?feed=job_feed",
    "https://jobicy.com/?feed=job_feed&job_categories=smm&job_types=full-time",
    "https://jobicy.com/?feed=job_feed&job_categories=seller&job_types=full-time&search_region=france",
    "https://jobicy.com/?feed=job_feed&job_categories=design-multimedia",
    "https://jobicy.com/?feed=job_feed&job_categories=data-science",
    "https://jobicy.com/?feed=job_feed&job_categories=copywriting",
    "https://jobicy.com/?feed=job_feed&job_categories=business",
    "https://jobicy.com/?feed=job_feed&job_categories=management",
    "https://www.higheredjobs.com/rss/articleFeed.cfm",
];

/// Import pipeline configuration.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Static feed list; source and category are embedded in each URL.
    pub feed_urls: Vec<String>,
    /// Records per bulk-enqueue call. Bounds memory and queue overhead,
    /// not ordering.
    pub batch_size: usize,
    /// Worker pool size.
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: i64,
    pub fetch_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            feed_urls: DEFAULT_FEED_URLS.iter().map(|s| s.to_string()).collect(),
            batch_size: 100,
            concurrency: 5,
            max_attempts: 3,
            retry_delay_ms: 2000,
            fetch_timeout_secs: 30,
            poll_interval_ms: 200,
        }
    }
}

impl ImportConfig {
    /// Read configuration from environment variables, falling back to
    /// defaults.
    ///
    /// - `FEED_URLS` (comma-separated)
    /// - `BATCH_SIZE`, `QUEUE_CONCURRENCY`, `MAX_RETRIES`,
    ///   `RETRY_DELAY_MS`, `FETCH_TIMEOUT_SECS`, `POLL_INTERVAL_MS`
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("FEED_URLS") {
            let urls: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if urls.is_empty() {
                return Err(AppError::Config("FEED_URLS is set but empty".into()));
            }
            config.feed_urls = urls;
        }

        config.batch_size = env_parse("BATCH_SIZE", config.batch_size)?;
        config.concurrency = env_parse("QUEUE_CONCURRENCY", config.concurrency)?;
        config.max_attempts = env_parse("MAX_RETRIES", config.max_attempts)?;
        config.retry_delay_ms = env_parse("RETRY_DELAY_MS", config.retry_delay_ms)?;
        config.fetch_timeout_secs = env_parse("FETCH_TIMEOUT_SECS", config.fetch_timeout_secs)?;
        config.poll_interval_ms = env_parse("POLL_INTERVAL_MS", config.poll_interval_ms)?;

        if config.batch_size == 0 {
            return Err(AppError::Config("BATCH_SIZE must be at least 1".into()));
        }
        if config.concurrency == 0 {
            return Err(AppError::Config(
                "QUEUE_CONCURRENCY must be at least 1".into(),
            ));
        }

        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: TimeDelta::milliseconds(self.retry_delay_ms),
            max_delay: TimeDelta::minutes(5),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid {name} '{raw}'"))),
    }
}
