//! Feed sources: the live HTTP endpoint and local XML files.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use situfeed_core::xml::parse_publication;
use situfeed_core::{FeedSource, FetchError, Publication};
use std::path::PathBuf;
use std::time::Duration;

pub struct HttpFeedSource {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpFeedSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .timeout(timeout)
            .user_agent(concat!("situfeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    fn transport(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(Box::new(err))
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self) -> Result<Publication, FetchError> {
        let resp = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/xml")
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.bytes().await.map_err(|e| self.transport(e))?;
        parse_publication(&body)
    }
}

/// Reads a publication from disk on every fetch.
pub struct FileFeedSource {
    path: PathBuf,
}

impl FileFeedSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FeedSource for FileFeedSource {
    async fn fetch(&self) -> Result<Publication, FetchError> {
        let body = tokio::fs::read(&self.path)
            .await
            .map_err(|e| FetchError::Transport(Box::new(e)))?;
        parse_publication(&body)
    }
}

/// HTTP(S) URLs are fetched over the network, anything else is a file path.
pub fn source_for(location: &str, timeout: Duration) -> Result<Box<dyn FeedSource>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Box::new(HttpFeedSource::new(location, timeout)?))
    } else {
        Ok(Box::new(FileFeedSource::new(location)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../situfeed-core/tests/fixtures/feed/situations.xml")
    }

    #[tokio::test]
    async fn file_source_parses_fixture() {
        let publication = FileFeedSource::new(fixture()).fetch().await.unwrap();
        assert_eq!(publication.situations.len(), 4);
        assert_eq!(publication.record_count(), 4);
    }

    #[tokio::test]
    async fn missing_file_is_transport_error() {
        let err = FileFeedSource::new("/nonexistent/situfeed.xml")
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
