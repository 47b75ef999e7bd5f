//! Fathom Analytics API client.
//!
//! Only the one read the app needs: listing the account's sites.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, error};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::FetchError;

pub const DEFAULT_API_URL: &str = "https://api.usefathom.com/v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSitesResponse {
    pub object: String,
    pub url: String,
    pub has_more: bool,
    pub data: Vec<Site>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    #[serde(default = "default_site_object")]
    pub object: String,
    pub name: String,
    pub sharing: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

fn default_site_object() -> String {
    "site".to_string()
}

// The API sends "2024-03-15 10:46:09" (UTC); RFC 3339 is accepted as well.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| D::Error::custom(format!("Invalid timestamp {:?}: {}", raw, e)))
}

#[derive(Debug, Clone)]
pub struct FathomClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl FathomClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, FetchError> {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, token: impl Into<String>) -> Result<Self, FetchError> {
        // Url::join drops the last path segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };

        Ok(FathomClient {
            http,
            base_url: Url::parse(&normalized)?,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// GET `/sites`. No retry: any failure goes straight back to the caller.
    pub async fn list_sites(&self) -> Result<Vec<Site>, FetchError> {
        let url = self.base_url.join("sites")?;
        debug!("Listing Fathom sites from {}", url);

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("Fathom API returned {} for site listing", status);
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ListSitesResponse = serde_json::from_str(&body)?;
        debug!("Fathom returned {} site(s), has_more={}", parsed.data.len(), parsed.has_more);
        Ok(parsed.data)
    }
}
