//! Curated update index backend

use super::traits::{CatalogBackend, CatalogEntry, CatalogFilter};
use super::{build_client, decode_body, send_query};
use crate::config::Credentials;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const BACKEND_NAME: &str = "curated-index";

/// Index response envelope
#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    updates: Vec<CatalogEntry>,
}

/// Backend for a curated update index keyed by product, architecture, build
/// and classification
///
/// Issues `GET <base>/updates?product=..&architecture=..&build=..&classification=..`
/// and expects `{"updates": [ ... ]}`. A 404 means the index has no entries
/// for that key and yields an empty result.
///
/// # Examples
///
/// ```no_run
/// use offline_servicing::catalog::{CatalogBackend, CuratedIndexBackend};
/// use std::time::Duration;
///
/// # fn main() -> offline_servicing::Result<()> {
/// let backend = CuratedIndexBackend::new(
///     "https://index.example.com",
///     None,
///     Duration::from_secs(30),
/// )?;
/// assert_eq!(backend.name(), "curated-index");
/// # Ok(())
/// # }
/// ```
pub struct CuratedIndexBackend {
    base_url: String,
    credentials: Option<Credentials>,
    client: reqwest::Client,
}

impl CuratedIndexBackend {
    /// Create a backend for the index at `base_url`
    pub fn new(
        base_url: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl CatalogBackend for CuratedIndexBackend {
    async fn query(&self, filter: &CatalogFilter) -> crate::Result<Vec<CatalogEntry>> {
        let classifications = filter
            .classifications
            .iter()
            .map(|c| c.folder_name())
            .collect::<Vec<_>>()
            .join(",");

        let request = self
            .client
            .get(format!("{}/updates", self.base_url))
            .query(&[
                ("product", filter.product.as_str()),
                ("architecture", filter.architecture.as_str()),
                ("build", filter.build.as_str()),
                ("classification", classifications.as_str()),
            ]);

        let Some(body) = send_query(BACKEND_NAME, request, self.credentials.as_ref(), true).await?
        else {
            return Ok(Vec::new());
        };

        let response: IndexResponse = decode_body(BACKEND_NAME, &body)?;
        tracing::debug!(
            backend = BACKEND_NAME,
            entries = response.updates.len(),
            "Curated index query complete"
        );
        Ok(response.updates)
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }
}
