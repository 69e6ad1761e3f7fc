use std::time::Duration;

use reqwest::{Client, StatusCode, Url};

use crate::config::CrawlSettings;

const USER_AGENT: &str = concat!("site-ingest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} failed with status: {status}")]
    Status { url: Url, status: StatusCode },
    #[error("failed to read response body from {url}: {source}")]
    Body {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Timeouts, refused connections, throttling and server-side failures are
    /// worth another attempt; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request { source, .. } | FetchError::Body { source, .. } => {
                source.is_timeout() || source.is_connect()
            }
            FetchError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
        }
    }
}

/// A successfully fetched document.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub url: Url,
    /// Where the request ended up after redirects.
    pub final_url: Url,
    pub status: StatusCode,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    max_retries: u32,
    retry_backoff: Duration,
}

impl Fetcher {
    pub fn new(settings: &CrawlSettings) -> reqwest::Result<Fetcher> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.fetch_timeout)
            .connect_timeout(settings.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Fetcher::with_client(client, settings))
    }

    pub fn with_client(client: Client, settings: &CrawlSettings) -> Fetcher {
        Fetcher {
            client,
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff,
        }
    }

    /// GET `url`, retrying transient failures with exponential backoff.
    pub async fn fetch(&self, url: &Url) -> Result<RawDocument, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    tracing::debug!("retrying {url} in {delay:?} (attempt {attempt}): {e}");
                    tokio::time::sleep(delay).await;
                }
                res => return res,
            }
        }
    }

    /// Delay before retry number `attempt` (1-based): the base backoff doubled
    /// per earlier retry, saturating instead of overflowing.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff.saturating_mul(factor)
    }

    async fn fetch_once(&self, url: &Url) -> Result<RawDocument, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status,
            });
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(|source| FetchError::Body {
            url: url.clone(),
            source,
        })?;

        Ok(RawDocument {
            url: url.clone(),
            final_url,
            status,
            body,
        })
    }
}
