//! Local artifact cache
//!
//! The cache is partitioned per product, build and architecture:
//!
//! ```text
//! <root>/<product>/<build>/<architecture>/<classification>/<update title>/<file>
//! ```
//!
//! A partition is the unit the [`SupersedenceAuditor`] prunes. Nothing in
//! this module ever reads or writes outside the partition it was built for.

mod auditor;

pub use auditor::{AuditReport, SupersedenceAuditor};

use crate::config::ServicingTarget;
use crate::types::Classification;
use crate::utils::{cached_name_variants, sanitize_component};
use std::path::{Path, PathBuf};

/// Path arithmetic for one cache partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Layout rooted directly at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout of the partition for `target` under the cache root
    ///
    /// # Examples
    ///
    /// ```
    /// use offline_servicing::cache::CacheLayout;
    /// use offline_servicing::config::ServicingTarget;
    /// use std::path::Path;
    ///
    /// let layout = CacheLayout::partition_for(Path::new("/cache"), &ServicingTarget::default());
    /// assert_eq!(layout.root(), Path::new("/cache/Windows 10/22H2/x64"));
    /// ```
    pub fn partition_for(cache_root: &Path, target: &ServicingTarget) -> Self {
        Self::new(
            cache_root
                .join(sanitize_component(&target.product))
                .join(sanitize_component(&target.build))
                .join(sanitize_component(&target.architecture)),
        )
    }

    /// Partition root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files of one update
    pub fn artifact_dir(&self, classification: Classification, title: &str) -> PathBuf {
        self.root
            .join(classification.folder_name())
            .join(sanitize_component(title))
    }

    /// Destination of a content item as published by the catalog
    pub fn artifact_path(
        &self,
        classification: Classification,
        title: &str,
        file_name: &str,
    ) -> PathBuf {
        self.artifact_dir(classification, title)
            .join(sanitize_component(file_name))
    }

    /// Existing on-disk copy of a content item, under either of its labels
    ///
    /// A cabinet relabeled to `.msu` by an earlier apply is the same artifact.
    pub async fn find_cached(
        &self,
        classification: Classification,
        title: &str,
        file_name: &str,
    ) -> Option<PathBuf> {
        let dir = self.artifact_dir(classification, title);
        for name in cached_name_variants(&sanitize_component(file_name)) {
            let path = dir.join(name);
            if let Ok(meta) = tokio::fs::metadata(&path).await
                && meta.is_file()
            {
                return Some(path);
            }
        }
        None
    }
}
