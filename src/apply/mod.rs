//! Ordered apply engine
//!
//! [`ApplyEngine`] applies validated artifacts to a mounted image:
//!
//! - every ServicingStack artifact finishes before any CumulativeUpdate
//!   artifact starts, and everything else follows the cumulative updates
//! - on platforms that accept `.msu` offline, cabinets are relabeled to
//!   `.msu` first and fall back to `.cab` if that attempt fails
//! - on older platforms every file is applied in its published format
//!
//! The strategy is chosen once per batch. Only an unusable mount target
//! aborts a batch; a failed package is recorded and the next one starts.

mod dism;
mod noop;
mod package;
mod traits;

pub use dism::{DismInstaller, parse_dism_output};
pub use noop::NoOpInstaller;
pub use package::PackageFile;
pub use traits::PackageInstaller;

use crate::config::ApplyStrategySetting;
use crate::error::{ApplyError, Result};
use crate::types::{
    ApplyOutcome, ApplyStatus, Classification, ContainerFormat, Event, LocalArtifact,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// How artifacts are presented to the installer for a whole batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStrategy {
    /// Relabel cabinets to `.msu`, fall back to `.cab` on failure
    RelabelWithFallback,
    /// Apply every file in its published format, no fallback
    Direct,
}

impl ApplyStrategy {
    /// Resolve the configured setting for a product
    ///
    /// `Auto` picks [`Direct`](Self::Direct) for platform families that
    /// predate offline `.msu` servicing of relabeled cabinets (Windows 7,
    /// Windows 8.1, Server 2008 and 2012) and relabeling otherwise.
    pub fn select(setting: ApplyStrategySetting, product: &str) -> Self {
        match setting {
            ApplyStrategySetting::RelabelWithFallback => Self::RelabelWithFallback,
            ApplyStrategySetting::Direct => Self::Direct,
            ApplyStrategySetting::Auto => {
                let product = product.to_lowercase();
                let legacy = ["windows 7", "windows 8", "server 2008", "server 2012"]
                    .iter()
                    .any(|family| product.contains(family));
                if legacy {
                    Self::Direct
                } else {
                    Self::RelabelWithFallback
                }
            }
        }
    }
}

/// Result of one apply batch
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// One outcome per attempted artifact, in apply order
    pub outcomes: Vec<ApplyOutcome>,
    /// Whether the batch stopped early on cancellation
    pub cancelled: bool,
    /// Artifacts never started because of cancellation
    pub not_attempted: usize,
}

/// Precedence of a classification within a batch
fn apply_phase(classification: Classification) -> u8 {
    match classification {
        Classification::ServicingStack => 0,
        Classification::CumulativeUpdate => 1,
        _ => 2,
    }
}

/// Order artifacts for application, keeping input order within a phase
pub fn apply_order(mut artifacts: Vec<LocalArtifact>) -> Vec<LocalArtifact> {
    artifacts.sort_by_key(|a| apply_phase(a.classification));
    artifacts
}

/// Applies artifacts to a mounted image through a [`PackageInstaller`]
pub struct ApplyEngine {
    installer: Arc<dyn PackageInstaller>,
    event_tx: broadcast::Sender<Event>,
}

impl ApplyEngine {
    /// Create an engine over `installer`
    pub fn new(installer: Arc<dyn PackageInstaller>, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            installer,
            event_tx,
        }
    }

    /// Apply `artifacts` to the image mounted at `mount`
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::MountPrecondition`] before any artifact is
    /// attempted if `mount` is missing, not a directory, or unreadable.
    /// Per-artifact failures are outcomes, never errors.
    pub async fn apply_batch(
        &self,
        mount: &Path,
        artifacts: Vec<LocalArtifact>,
        strategy: ApplyStrategy,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport> {
        check_mount(mount).await?;

        let ordered = apply_order(artifacts);
        let total = ordered.len();
        let mut report = ApplyReport::default();

        tracing::info!(
            ?mount,
            artifacts = total,
            ?strategy,
            installer = self.installer.name(),
            "Starting apply batch"
        );

        for (index, artifact) in ordered.into_iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.not_attempted = total - index;
                tracing::info!(
                    not_attempted = report.not_attempted,
                    "Apply cancelled before next artifact"
                );
                break;
            }

            let outcome = if artifact.state.is_appliable() {
                match strategy {
                    ApplyStrategy::RelabelWithFallback => {
                        self.apply_with_fallback(mount, &artifact).await
                    }
                    ApplyStrategy::Direct => self.apply_direct(mount, &artifact).await,
                }
            } else {
                failed_without_attempt(&artifact)
            };

            self.event_tx
                .send(Event::Applied {
                    outcome: outcome.clone(),
                })
                .ok();
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    /// Relabel path: `.msu` first, `.cab` fallback for relabeled cabinets
    async fn apply_with_fallback(&self, mount: &Path, artifact: &LocalArtifact) -> ApplyOutcome {
        let mut file = PackageFile::new(artifact.path.clone(), artifact.original_format);

        if file.original_format() == ContainerFormat::Msu {
            let result = self.attempt(mount, artifact, &file).await;
            return outcome(artifact, &file, result.map(|_| ApplyStatus::Success));
        }

        if let Err(e) = file.relabel(ContainerFormat::Msu).await {
            tracing::warn!(
                update_id = %artifact.update_id,
                error = %e,
                "Relabel failed, applying cabinet directly"
            );
            let result = self.attempt(mount, artifact, &file).await;
            return outcome(artifact, &file, result.map(|_| ApplyStatus::Success));
        }

        let primary = match self.attempt(mount, artifact, &file).await {
            Ok(()) => return outcome(artifact, &file, Ok(ApplyStatus::Success)),
            Err(e) => e,
        };

        tracing::warn!(
            update_id = %artifact.update_id,
            path = ?file.path(),
            error = %primary,
            "Apply as msu failed, falling back to cab"
        );

        if let Err(e) = file.restore().await {
            let message = format!("primary: {primary}; restore: {e}");
            tracing::error!(update_id = %artifact.update_id, error = %message, "Apply failed");
            return outcome(artifact, &file, Err(message));
        }

        match self.attempt(mount, artifact, &file).await {
            Ok(()) => outcome(artifact, &file, Ok(ApplyStatus::FallbackSuccess)),
            Err(fallback) => {
                tracing::error!(
                    update_id = %artifact.update_id,
                    primary_error = %primary,
                    fallback_error = %fallback,
                    "Apply failed in both formats"
                );
                outcome(
                    artifact,
                    &file,
                    Err(format!("primary: {primary}; fallback: {fallback}")),
                )
            }
        }
    }

    /// Direct path: the published format, one attempt
    async fn apply_direct(&self, mount: &Path, artifact: &LocalArtifact) -> ApplyOutcome {
        let mut file = PackageFile::new(artifact.path.clone(), artifact.original_format);
        if let Err(e) = file.restore().await {
            tracing::warn!(
                update_id = %artifact.update_id,
                error = %e,
                "Could not restore published label, applying as-is"
            );
        }

        let result = self.attempt(mount, artifact, &file).await;
        if let Err(e) = &result {
            tracing::error!(update_id = %artifact.update_id, error = %e, "Apply failed");
        }
        outcome(artifact, &file, result.map(|_| ApplyStatus::Success))
    }

    async fn attempt(
        &self,
        mount: &Path,
        artifact: &LocalArtifact,
        file: &PackageFile,
    ) -> std::result::Result<(), String> {
        self.event_tx
            .send(Event::Applying {
                update_id: artifact.update_id.clone(),
                path: file.path().to_path_buf(),
                format: file.format(),
            })
            .ok();
        tracing::debug!(
            update_id = %artifact.update_id,
            path = ?file.path(),
            format = %file.format(),
            "Adding package"
        );

        self.installer
            .add_package(mount, file.path())
            .await
            .map_err(|e| e.to_string())
    }
}

fn outcome(
    artifact: &LocalArtifact,
    file: &PackageFile,
    result: std::result::Result<ApplyStatus, String>,
) -> ApplyOutcome {
    let (status, error) = match result {
        Ok(status) => (status, None),
        Err(e) => (ApplyStatus::Failure, Some(e)),
    };
    ApplyOutcome {
        update_id: artifact.update_id.clone(),
        classification: artifact.classification,
        path: file.path().to_path_buf(),
        format: file.format(),
        status,
        error,
    }
}

fn failed_without_attempt(artifact: &LocalArtifact) -> ApplyOutcome {
    tracing::error!(
        update_id = %artifact.update_id,
        state = ?artifact.state,
        "Artifact is not in an appliable state"
    );
    ApplyOutcome {
        update_id: artifact.update_id.clone(),
        classification: artifact.classification,
        path: artifact.path.clone(),
        format: artifact.current_format(),
        status: ApplyStatus::Failure,
        error: Some(format!("artifact state {:?} is not appliable", artifact.state)),
    }
}

/// Verify the mount target exists, is a directory and can be listed
async fn check_mount(mount: &Path) -> std::result::Result<(), ApplyError> {
    let precondition = |reason: String| ApplyError::MountPrecondition {
        path: mount.to_path_buf(),
        reason,
    };

    let metadata = tokio::fs::metadata(mount)
        .await
        .map_err(|e| precondition(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(precondition("not a directory".to_string()));
    }
    tokio::fs::read_dir(mount)
        .await
        .map_err(|e| precondition(format!("cannot list mount target: {e}")))?;
    Ok(())
}
