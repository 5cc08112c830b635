//! Traits and types shared by the catalog backends

use crate::config::ServicingContext;
use crate::types::Classification;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Query parameters handed to a [`CatalogBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFilter {
    /// Product being serviced (e.g. "Windows 10")
    pub product: String,
    /// Build/version string (e.g. "22H2")
    pub build: String,
    /// Architecture token (e.g. "x64")
    pub architecture: String,
    /// Catalog categories covering the product's lifecycle family
    pub categories: Vec<String>,
    /// Classifications the caller is interested in
    pub classifications: Vec<Classification>,
}

impl CatalogFilter {
    /// Build the filter for one servicing batch
    ///
    /// Definition updates are never requested. Optional and dynamic
    /// classifications are requested only when their toggle is set, and the
    /// dynamic-update category joins the category list with them.
    pub fn for_context(ctx: &ServicingContext) -> Self {
        let mut categories = vec![super::rules::lifecycle_category(&ctx.product, &ctx.build)];
        if ctx.toggles.include_dynamic {
            categories.push(super::rules::dynamic_category(&ctx.product));
        }

        let classifications = Classification::ALL
            .into_iter()
            .filter(|c| match c {
                Classification::Definition => false,
                Classification::Optional => ctx.toggles.include_optional,
                Classification::DynamicUpdate => ctx.toggles.include_dynamic,
                _ => true,
            })
            .collect();

        Self {
            product: ctx.product.clone(),
            build: ctx.build.clone(),
            architecture: ctx.architecture.clone(),
            categories,
            classifications,
        }
    }
}

/// One file published by a catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFile {
    /// File name
    pub name: String,
    /// Absolute download URL
    pub url: String,
    /// SHA-256 digest, lowercase hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Raw catalog entry before exclusion and classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub title: String,
    /// Catalog category or classification label, if the backend publishes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Supersession flag
    #[serde(default)]
    pub superseded: bool,
    /// Last revision timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_at: Option<DateTime<Utc>>,
    /// Downloadable files
    #[serde(default)]
    pub files: Vec<CatalogFile>,
}

/// A source of catalog entries
///
/// Implementations translate a [`CatalogFilter`] into their own query shape
/// and return entries in the common [`CatalogEntry`] form. Exclusion,
/// classification and toggle handling happen in
/// [`CatalogResolver`](super::CatalogResolver), never in a backend.
///
/// # Errors
///
/// Backends report an unreachable endpoint or server error as
/// [`CatalogError::Unavailable`](crate::error::CatalogError::Unavailable) and
/// rejected credentials as
/// [`CatalogError::Unauthorized`](crate::error::CatalogError::Unauthorized).
/// Both abort the batch.
#[async_trait]
pub trait CatalogBackend: Send + Sync {
    /// Fetch all entries matching the filter
    async fn query(&self, filter: &CatalogFilter) -> crate::Result<Vec<CatalogEntry>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
