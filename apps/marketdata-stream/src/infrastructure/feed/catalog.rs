//! Instrument Catalog Client
//!
//! Downloads the instrument catalog (gzip-compressed JSON) and builds an
//! [`InstrumentDirectory`] from it.

use std::time::Duration;

use crate::application::services::DirectoryHandle;
use crate::domain::instrument::{CatalogError, InstrumentDirectory};

/// Timeout for one catalog download.
pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(15);

/// Catalog download errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogFetchError {
    /// The request failed or timed out.
    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("catalog request returned HTTP {0}")]
    Status(u16),

    /// The body was not a valid catalog.
    #[error(transparent)]
    Parse(#[from] CatalogError),
}

/// Fetches the instrument catalog over HTTP.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    url: String,
}

impl CatalogClient {
    /// Create a client for the catalog URL.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogFetchError::Request`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, CatalogFetchError> {
        let http = reqwest::Client::builder().timeout(CATALOG_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Download and parse the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogFetchError`] if the download or parse fails.
    pub async fn fetch(&self) -> Result<InstrumentDirectory, CatalogFetchError> {
        tracing::info!(url = %self.url, "Fetching instrument catalog");

        let response = self.http.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogFetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        tracing::debug!(bytes = bytes.len(), "Instrument catalog downloaded");

        Ok(InstrumentDirectory::load(&bytes)?)
    }

    /// Fetch the catalog and swap it into `directory`.
    ///
    /// On failure the previous directory stays in place.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogFetchError`] if the download or parse fails.
    pub async fn refresh(&self, directory: &DirectoryHandle) -> Result<usize, CatalogFetchError> {
        match self.fetch().await {
            Ok(fresh) => {
                let instruments = fresh.len();
                directory.replace(fresh);
                Ok(instruments)
            }
            Err(error) => {
                tracing::warn!(
                    %error,
                    kept = directory.len(),
                    "Catalog refresh failed, keeping previous directory"
                );
                Err(error)
            }
        }
    }
}
