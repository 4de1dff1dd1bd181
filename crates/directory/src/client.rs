use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;
use url::Url;

use fbp_core::types::{Company, SubscriptionTier};

/// Client for the external company/subscription directory API.
///
/// The directory answers ordinary absence with a non-success status, so
/// lookups resolve to `None` instead of an error. Connection-level failures
/// also resolve to `None`: the caller cannot distinguish an absent company
/// from an unreachable directory. Timeouts are the exception and surface as
/// [`DirectoryError::Timeout`] so the caller can report a retryable failure.
#[derive(Clone)]
pub struct DirectoryClient {
    http: Client,
    base_url: Url,
}

impl DirectoryClient {
    /// Creates a new directory client for the given base URL.
    pub fn new(mut base_url: Url, http: Client) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { http, base_url }
    }

    /// Resolves a company by id.
    pub async fn get_company(&self, company_id: i64) -> Result<Option<Company>, DirectoryError> {
        self.fetch(&format!("companies/{company_id}")).await
    }

    /// Resolves a subscription tier by id.
    pub async fn get_subscription(
        &self,
        subscription_id: i64,
    ) -> Result<Option<SubscriptionTier>, DirectoryError> {
        self.fetch(&format!("subscriptions/{subscription_id}")).await
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, DirectoryError> {
        let url = self.base_url.join(path)?;
        let response = match self
            .http
            .get(url.clone())
            .header(header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return Err(DirectoryError::Timeout(err)),
            Err(err) => {
                warn!(stage = "directory", %url, error = %err, "directory request failed, treating as not found");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            return Ok(None);
        }

        let value = response.json::<T>().await.map_err(DirectoryError::Decode)?;
        Ok(Some(value))
    }
}

/// Errors raised by the directory client.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("invalid directory url: {0}")]
    Url(#[from] url::ParseError),
    #[error("directory request timed out: {0}")]
    Timeout(reqwest::Error),
    #[error("failed to decode directory response: {0}")]
    Decode(reqwest::Error),
}
