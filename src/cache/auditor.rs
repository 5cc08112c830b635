//! Supersedence audit of one cache partition

use super::CacheLayout;
use crate::config::ServicingTarget;
use crate::types::UpdateDescriptor;
use crate::utils::{cached_name_variants, sanitize_component};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of one audit pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Files still listed by the catalog
    pub retained: usize,
    /// Files deleted because the catalog no longer lists them
    pub removed: Vec<PathBuf>,
    /// Files or directories that could not be removed
    pub failures: Vec<(PathBuf, String)>,
    /// Whether the audit was skipped (no fresh result to compare against)
    pub skipped: bool,
}

/// Prunes cached artifacts the catalog no longer lists
///
/// The auditor only ever walks the partition for the target it is handed.
/// A fresh result whose descriptors belong to another product or build is
/// refused rather than used, since comparing against it would wipe the
/// partition.
///
/// [`audit`](Self::audit) walks and deletes synchronously; async callers run
/// it on the blocking pool.
#[derive(Debug, Clone)]
pub struct SupersedenceAuditor {
    cache_root: PathBuf,
}

impl SupersedenceAuditor {
    /// Create an auditor over the cache rooted at `cache_root`
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    /// Reconcile the partition for `target` against a fresh catalog result
    ///
    /// A cached file is kept when its name (or its relabeled counterpart)
    /// appears among the fresh result's content-item file names, and deleted
    /// otherwise. Descriptor directories left empty are removed. An empty
    /// fresh result skips the audit.
    ///
    /// # Errors
    ///
    /// Returns an error if a descriptor in `fresh` belongs to another
    /// product or build. Individual deletion failures are collected in the
    /// report instead.
    pub fn audit(
        &self,
        target: &ServicingTarget,
        fresh: &[UpdateDescriptor],
    ) -> crate::Result<AuditReport> {
        if let Some(foreign) = fresh
            .iter()
            .find(|d| d.product != target.product || d.build != target.build)
        {
            return Err(crate::Error::Other(format!(
                "refusing to audit {} {} against a result for {} {}",
                target.product, target.build, foreign.product, foreign.build
            )));
        }

        let layout = CacheLayout::partition_for(&self.cache_root, target);
        let mut report = AuditReport::default();

        if fresh.is_empty() {
            tracing::info!(
                partition = ?layout.root(),
                "No fresh catalog result, skipping supersedence audit"
            );
            report.skipped = true;
            return Ok(report);
        }
        if !layout.root().is_dir() {
            return Ok(report);
        }

        let current = current_names(fresh);
        prune_files(layout.root(), &current, &mut report);
        remove_empty_dirs(layout.root(), &mut report);

        tracing::info!(
            partition = ?layout.root(),
            retained = report.retained,
            removed = report.removed.len(),
            "Supersedence audit complete"
        );
        Ok(report)
    }
}

/// Lowercased on-disk names of every content item in the fresh result
fn current_names(fresh: &[UpdateDescriptor]) -> HashSet<String> {
    fresh
        .iter()
        .flat_map(|d| d.content.iter())
        .flat_map(|item| cached_name_variants(&sanitize_component(&item.file_name)))
        .map(|name| name.to_lowercase())
        .collect()
}

fn prune_files(root: &Path, current: &HashSet<String>, report: &mut AuditReport) {
    let files = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable cache entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file());

    for entry in files {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if current.contains(&name) {
            report.retained += 1;
            continue;
        }

        let path = entry.into_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::warn!(?path, "Pruned cached artifact no longer listed by the catalog");
                report.removed.push(path);
            }
            Err(e) => {
                tracing::warn!(?path, error = %e, "Failed to prune cached artifact");
                report.failures.push((path, e.to_string()));
            }
        }
    }
}

fn remove_empty_dirs(root: &Path, report: &mut AuditReport) {
    let dirs: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();

    for dir in dirs {
        let is_empty = match std::fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => false,
        };
        if is_empty && let Err(e) = std::fs::remove_dir(&dir) {
            report.failures.push((dir, e.to_string()));
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Classification, ContainerFormat, ContentItem, UpdateId};

    fn descriptor(id: &str, build: &str, files: &[&str]) -> UpdateDescriptor {
        UpdateDescriptor {
            id: UpdateId::from(id),
            title: format!("Update {id}"),
            product: "Windows 10".into(),
            build: build.into(),
            classification: Classification::CumulativeUpdate,
            superseded: false,
            revised_at: None,
            content: files
                .iter()
                .map(|f| ContentItem {
                    update_id: UpdateId::from(id),
                    file_name: f.to_string(),
                    locator: format!("https://dl.example.com/{f}"),
                    format: ContainerFormat::from_file_name(f),
                    sha256: None,
                    size_bytes: None,
                })
                .collect(),
        }
    }

    fn target(build: &str) -> ServicingTarget {
        ServicingTarget {
            build: build.into(),
            ..Default::default()
        }
    }

    fn seed(root: &Path, build: &str, title: &str, file: &str) -> PathBuf {
        let layout = CacheLayout::partition_for(root, &target(build));
        let path = layout.artifact_path(Classification::CumulativeUpdate, title, file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"payload").unwrap();
        path
    }

    #[test]
    fn prunes_withdrawn_files_and_leaves_other_builds_alone() {
        let dir = tempfile::tempdir().unwrap();
        let stale = seed(dir.path(), "B1", "Update U0", "c0.cab");
        let current = seed(dir.path(), "B1", "Update U1", "c1.cab");
        let other_build = seed(dir.path(), "B2", "Update U0", "c0.cab");

        let auditor = SupersedenceAuditor::new(dir.path());
        let report = auditor
            .audit(&target("B1"), &[descriptor("U1", "B1", &["c1.cab"])])
            .unwrap();

        assert_eq!(report.removed, vec![stale.clone()]);
        assert_eq!(report.retained, 1);
        assert!(!stale.exists());
        assert!(!stale.parent().unwrap().exists(), "empty update dir removed");
        assert!(current.exists());
        assert!(other_build.exists());
    }

    #[test]
    fn relabeled_copies_count_as_current() {
        let dir = tempfile::tempdir().unwrap();
        let relabeled = seed(dir.path(), "B1", "Update U1", "C1.msu");

        let report = SupersedenceAuditor::new(dir.path())
            .audit(&target("B1"), &[descriptor("U1", "B1", &["c1.cab"])])
            .unwrap();

        assert!(report.removed.is_empty());
        assert!(relabeled.exists());
    }

    #[test]
    fn leftover_partial_downloads_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let partial = seed(dir.path(), "B1", "Update U1", "c1.cab.part");

        let report = SupersedenceAuditor::new(dir.path())
            .audit(&target("B1"), &[descriptor("U1", "B1", &["c1.cab"])])
            .unwrap();

        assert_eq!(report.removed, vec![partial]);
    }

    #[test]
    fn empty_fresh_result_skips_the_audit() {
        let dir = tempfile::tempdir().unwrap();
        let cached = seed(dir.path(), "B1", "Update U0", "c0.cab");

        let report = SupersedenceAuditor::new(dir.path())
            .audit(&target("B1"), &[])
            .unwrap();

        assert!(report.skipped);
        assert!(cached.exists());
    }

    #[test]
    fn result_for_another_build_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cached = seed(dir.path(), "B1", "Update U0", "c0.cab");

        let result = SupersedenceAuditor::new(dir.path())
            .audit(&target("B1"), &[descriptor("U9", "B2", &["c9.cab"])]);

        assert!(result.is_err());
        assert!(cached.exists());
    }

    #[test]
    fn missing_partition_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let report = SupersedenceAuditor::new(dir.path())
            .audit(&target("B1"), &[descriptor("U1", "B1", &["c1.cab"])])
            .unwrap();
        assert_eq!(report, AuditReport::default());
    }
}
