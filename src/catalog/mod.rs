//! Catalog resolution
//!
//! Turns a product/build/toggle combination into the list of
//! [`UpdateDescriptor`]s worth servicing offline. Two interchangeable
//! backends answer the raw query:
//!
//! - [`CuratedIndexBackend`]: an index keyed by product, architecture, build
//!   and classification
//! - [`EnterpriseCatalogBackend`]: a distribution server queried by category,
//!   filtered locally by title and supersession
//!
//! [`CatalogResolver`] then applies the exclusion and classification rule
//! tables from [`RuleConfig`](crate::config::RuleConfig) and the feature
//! toggles. A query that returns nothing is a warning, not an error.

mod curated;
mod enterprise;
mod rules;
mod traits;

pub use curated::CuratedIndexBackend;
pub use enterprise::EnterpriseCatalogBackend;
pub use rules::{RuleSet, dynamic_category, lifecycle_category};
pub use traits::{CatalogBackend, CatalogEntry, CatalogFile, CatalogFilter};

use crate::config::{
    CatalogBackendKind, CatalogConfig, Credentials, RetryConfig, RuleConfig, ServicingContext,
};
use crate::error::{CatalogError, Error, Result};
use crate::retry::with_retry;
use crate::types::{Classification, ContainerFormat, ContentItem, UpdateDescriptor, UpdateId};
use crate::utils::file_name_from_locator;
use reqwest::StatusCode;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Build the backend selected in the catalog configuration
pub fn backend_from_config(config: &CatalogConfig) -> Result<Arc<dyn CatalogBackend>> {
    match config.backend {
        CatalogBackendKind::CuratedIndex => {
            let url = config.curated_index_url.as_deref().ok_or_else(|| {
                Error::config("catalog.curated_index_url", "curated index URL not set")
            })?;
            Ok(Arc::new(CuratedIndexBackend::new(
                url,
                config.credentials.clone(),
                config.timeout,
            )?))
        }
        CatalogBackendKind::Enterprise => {
            let url = config.enterprise_url.as_deref().ok_or_else(|| {
                Error::config("catalog.enterprise_url", "enterprise catalog URL not set")
            })?;
            Ok(Arc::new(EnterpriseCatalogBackend::new(
                url,
                config.credentials.clone(),
                config.timeout,
            )?))
        }
    }
}

/// Resolves catalog entries into applicable update descriptors
pub struct CatalogResolver {
    backend: Arc<dyn CatalogBackend>,
    rules: RuleSet,
    retry: RetryConfig,
}

impl CatalogResolver {
    /// Create a resolver over `backend` with the given rule tables
    pub fn new(
        backend: Arc<dyn CatalogBackend>,
        rules: &RuleConfig,
        retry: RetryConfig,
    ) -> Result<Self> {
        Ok(Self {
            backend,
            rules: RuleSet::compile(rules)?,
            retry,
        })
    }

    /// Name of the backend answering queries
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Query the backend and return the descriptors applicable to `ctx`
    ///
    /// # Errors
    ///
    /// Backend failures (unreachable, rejected credentials, unreadable
    /// payload) propagate after transient errors have been retried. Zero
    /// results is not an error.
    pub async fn resolve(&self, ctx: &ServicingContext) -> Result<Vec<UpdateDescriptor>> {
        let filter = CatalogFilter::for_context(ctx);
        tracing::debug!(
            backend = self.backend.name(),
            product = %ctx.product,
            build = %ctx.build,
            categories = ?filter.categories,
            "Querying catalog"
        );

        let entries = with_retry(&self.retry, || self.backend.query(&filter)).await?;

        if entries.is_empty() {
            tracing::warn!(
                backend = self.backend.name(),
                product = %ctx.product,
                build = %ctx.build,
                "Catalog returned no updates; continuing without updates"
            );
            return Ok(Vec::new());
        }

        let descriptors = self.descriptors_from_entries(ctx, entries);
        tracing::info!(
            backend = self.backend.name(),
            count = descriptors.len(),
            "Catalog resolution complete"
        );
        Ok(descriptors)
    }

    /// Apply exclusions, classification and toggles to raw entries
    pub fn descriptors_from_entries(
        &self,
        ctx: &ServicingContext,
        entries: Vec<CatalogEntry>,
    ) -> Vec<UpdateDescriptor> {
        let mut seen = HashSet::new();
        let mut descriptors = Vec::new();

        for entry in entries {
            if let Some(pattern) = self.rules.exclusion_for(&entry.title) {
                tracing::debug!(
                    update_id = %entry.id,
                    title = %entry.title,
                    pattern,
                    "Excluding update not appliable offline"
                );
                continue;
            }

            let classification = self.rules.classify(&entry.title, entry.category.as_deref());
            let keep = match classification {
                Classification::Definition => false,
                Classification::Optional => ctx.toggles.include_optional,
                Classification::DynamicUpdate => ctx.toggles.include_dynamic,
                _ => true,
            };
            if !keep {
                tracing::debug!(
                    update_id = %entry.id,
                    %classification,
                    "Dropping update by classification"
                );
                continue;
            }

            if !seen.insert(entry.id.clone()) {
                continue;
            }

            let id = UpdateId::new(entry.id);
            let content = entry
                .files
                .into_iter()
                .filter_map(|file| {
                    let file_name = if file.name.trim().is_empty() {
                        file_name_from_locator(&file.url)?
                    } else {
                        file.name
                    };
                    Some(ContentItem {
                        update_id: id.clone(),
                        format: ContainerFormat::from_file_name(&file_name),
                        file_name,
                        locator: file.url,
                        sha256: file.sha256.map(|d| d.to_lowercase()),
                        size_bytes: file.size,
                    })
                })
                .collect();

            descriptors.push(UpdateDescriptor {
                id,
                title: entry.title,
                product: ctx.product.clone(),
                build: ctx.build.clone(),
                classification,
                superseded: entry.superseded,
                revised_at: entry.revised_at,
                content,
            });
        }

        descriptors
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("offline-servicing/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Send a catalog request and return the body of a successful answer
///
/// `Ok(None)` is returned for a 404 when `not_found_is_empty` is set.
pub(crate) async fn send_query(
    backend: &'static str,
    request: reqwest::RequestBuilder,
    credentials: Option<&Credentials>,
    not_found_is_empty: bool,
) -> Result<Option<String>> {
    let request = match credentials {
        Some(creds) => request.basic_auth(&creds.username, Some(&creds.password)),
        None => request,
    };

    let response = request.send().await.map_err(|e| CatalogError::Unavailable {
        backend,
        reason: e.to_string(),
    })?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(CatalogError::Unauthorized {
            backend,
            status: status.as_u16(),
        }
        .into());
    }
    if status == StatusCode::NOT_FOUND && not_found_is_empty {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(CatalogError::Unavailable {
            backend,
            reason: format!("HTTP {status}"),
        }
        .into());
    }

    let body = response.text().await.map_err(|e| CatalogError::Unavailable {
        backend,
        reason: format!("failed to read response: {e}"),
    })?;
    Ok(Some(body))
}

pub(crate) fn decode_body<T: serde::de::DeserializeOwned>(
    backend: &'static str,
    body: &str,
) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        CatalogError::Malformed {
            backend,
            reason: e.to_string(),
        }
        .into()
    })
}
