//! Package file relabel state machine
//!
//! A cabinet moves between its two labels by rename only:
//!
//! ```text
//! Cab --relabel--> Msu --(apply failed)--> Cab
//! ```
//!
//! The on-disk name is the single source of truth for the current label, so
//! the format recorded in an outcome always matches the file left behind.

use crate::error::ApplyError;
use crate::types::ContainerFormat;
use crate::utils::relabeled_path;
use std::path::{Path, PathBuf};

/// A cached package whose label may change during an apply sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    path: PathBuf,
    original: ContainerFormat,
}

impl PackageFile {
    /// Wrap a cached file published as `original`
    pub fn new(path: PathBuf, original: ContainerFormat) -> Self {
        Self { path, original }
    }

    /// Current on-disk path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format the catalog published the file in
    pub fn original_format(&self) -> ContainerFormat {
        self.original
    }

    /// Format implied by the current label
    pub fn format(&self) -> ContainerFormat {
        ContainerFormat::from_path(&self.path).unwrap_or(self.original)
    }

    /// Rename the file so its label is `to`
    ///
    /// A no-op when the label already matches. On failure the file keeps its
    /// previous label.
    pub async fn relabel(&mut self, to: ContainerFormat) -> Result<(), ApplyError> {
        if self.format() == to {
            return Ok(());
        }

        let target = relabeled_path(&self.path, to);
        tokio::fs::rename(&self.path, &target)
            .await
            .map_err(|e| ApplyError::RelabelFailed {
                from: self.path.clone(),
                to: target.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(from = ?self.path, to = ?target, "Relabeled package");
        self.path = target;
        Ok(())
    }

    /// Return the file to the label it was published with
    pub async fn restore(&mut self) -> Result<(), ApplyError> {
        self.relabel(self.original).await
    }
}
