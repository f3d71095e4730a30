use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use tracing::info;

use crate::error::{MigrateError, Result};

const USER_AGENT: &str = concat!("glazelki_migrate/", env!("CARGO_PKG_VERSION"));

/// Blocking HTTP client shared by page, picture and avatar downloads.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|source| MigrateError::Fetch {
                url: String::new(),
                source,
            })?;
        Ok(Fetcher { client })
    }

    /// Fetch a URL and return the raw body. Non-success statuses are errors.
    pub fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let start = Instant::now();
        info!("Getting {}", url);

        let wrap = |source| MigrateError::Fetch {
            url: url.to_string(),
            source,
        };
        let bytes = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(wrap)?;

        info!(
            "Got {} bytes from {} in {}ms",
            bytes.len(),
            url,
            start.elapsed().as_millis()
        );
        Ok(bytes.to_vec())
    }

    /// Fetch a page and decode it as UTF-8, replacing invalid sequences.
    pub fn fetch_text(&self, url: &str) -> Result<String> {
        let bytes = self.fetch(url)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
