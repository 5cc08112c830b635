//! Enterprise software-distribution catalog backend

use super::traits::{CatalogBackend, CatalogEntry, CatalogFile, CatalogFilter};
use super::{build_client, decode_body, send_query};
use crate::config::Credentials;
use crate::error::CatalogError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

const BACKEND_NAME: &str = "enterprise";

/// One update as the enterprise server reports it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerUpdate {
    update_id: String,
    title: String,
    #[serde(default)]
    classification: Option<String>,
    #[serde(default)]
    is_superseded: bool,
    #[serde(default)]
    arrival_date: Option<DateTime<Utc>>,
    #[serde(default)]
    files: Vec<ServerFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerFile {
    file_name: String,
    /// Server-relative content path, e.g. `/Content/AB/0123ABCD.cab`
    content_path: String,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    length: Option<u64>,
}

/// Backend for an enterprise distribution server queried by category
///
/// Issues one `GET <server>/api/v1/updates?category=<category>` per category
/// in the filter, then filters locally: superseded updates are dropped and
/// only titles naming the target build and architecture are kept. Content
/// paths are resolved against the server URL.
pub struct EnterpriseCatalogBackend {
    server: Url,
    credentials: Option<Credentials>,
    client: reqwest::Client,
}

impl EnterpriseCatalogBackend {
    /// Create a backend for the server at `server_url`
    pub fn new(
        server_url: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let mut server = Url::parse(server_url).map_err(|e| CatalogError::Unavailable {
            backend: BACKEND_NAME,
            reason: format!("invalid server URL '{server_url}': {e}"),
        })?;
        if !server.path().ends_with('/') {
            let with_slash = format!("{}/", server.path());
            server.set_path(&with_slash);
        }

        Ok(Self {
            server,
            credentials,
            client: build_client(timeout)?,
        })
    }

    async fn query_category(&self, category: &str) -> crate::Result<Vec<ServerUpdate>> {
        let endpoint = self
            .server
            .join("api/v1/updates")
            .map_err(|e| CatalogError::Unavailable {
                backend: BACKEND_NAME,
                reason: e.to_string(),
            })?;
        let request = self.client.get(endpoint).query(&[("category", category)]);

        match send_query(BACKEND_NAME, request, self.credentials.as_ref(), false).await? {
            Some(body) => decode_body(BACKEND_NAME, &body),
            None => Ok(Vec::new()),
        }
    }

    fn into_entry(&self, update: ServerUpdate) -> crate::Result<CatalogEntry> {
        let files = update
            .files
            .into_iter()
            .map(|f| -> crate::Result<CatalogFile> {
                let url = self
                    .server
                    .join(f.content_path.trim_start_matches('/'))
                    .map_err(|e| CatalogError::Malformed {
                        backend: BACKEND_NAME,
                        reason: format!("bad content path '{}': {e}", f.content_path),
                    })?;
                Ok(CatalogFile {
                    name: f.file_name,
                    url: url.to_string(),
                    sha256: f.sha256.map(|d| d.to_lowercase()),
                    size: f.length,
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(CatalogEntry {
            id: update.update_id,
            title: update.title,
            category: update.classification,
            superseded: update.is_superseded,
            revised_at: update.arrival_date,
            files,
        })
    }
}

/// Whether a title names the build and architecture being serviced
fn title_matches(title: &str, filter: &CatalogFilter) -> bool {
    let title = title.to_lowercase();
    title.contains(&filter.build.to_lowercase())
        && title.contains(&filter.architecture.to_lowercase())
}

#[async_trait]
impl CatalogBackend for EnterpriseCatalogBackend {
    async fn query(&self, filter: &CatalogFilter) -> crate::Result<Vec<CatalogEntry>> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for category in &filter.categories {
            let updates = self.query_category(category).await?;
            tracing::debug!(
                backend = BACKEND_NAME,
                category = %category,
                count = updates.len(),
                "Category query complete"
            );

            for update in updates {
                if update.is_superseded {
                    tracing::debug!(update_id = %update.update_id, "Skipping superseded update");
                    continue;
                }
                if !title_matches(&update.title, filter) {
                    continue;
                }
                if !seen.insert(update.update_id.clone()) {
                    continue;
                }
                entries.push(self.into_entry(update)?);
            }
        }

        Ok(entries)
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }
}
