//! Content fetching and validation
//!
//! [`ContentFetcher`] turns resolved [`UpdateDescriptor`]s into
//! [`LocalArtifact`]s in the cache partition. Per content item it:
//!
//! 1. rejects anything that is not a `.cab` or `.msu`
//! 2. rejects file names matching the incompatible-content patterns
//! 3. returns an existing cached copy without touching the network
//! 4. downloads to `<file>.part`, checks the digest, renames into place
//! 5. validates cabinets for the metadata marker (structured, then listing)
//!
//! Transfer and validation failures are recorded in the [`FetchReport`];
//! they never abort the batch.

mod cab;
mod download;
mod inspect;

pub use cab::read_cab_file_names;
pub use inspect::{
    ContainerInspector, ListerKind, ListingInspector, NoOpInspector, StructuredCabInspector,
    listing_contains_marker, parse_listing_output,
};

use crate::cache::CacheLayout;
use crate::config::{Config, UnverifiablePolicy};
use crate::error::{Error, FetchError, Result};
use crate::retry::with_retry;
use crate::types::{
    ContainerFormat, ContentItem, Event, LocalArtifact, UpdateDescriptor, UpdateId, ValidationState,
};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Result of fetching a batch of descriptors
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Artifacts eligible for the apply phase
    pub artifacts: Vec<LocalArtifact>,
    /// Files downloaded in this pass
    pub fetched: usize,
    /// Files already present in the cache
    pub skipped_cached: usize,
    /// Files rejected before any transfer
    pub filtered: usize,
    /// Files deleted by validation
    pub validation_deleted: usize,
    /// Files whose transfer failed
    pub transfer_failed: usize,
    /// Updates excluded from apply because one of their files failed to transfer
    pub failed_updates: Vec<UpdateId>,
    /// Whether the pass stopped early on cancellation
    pub cancelled: bool,
}

/// What happened to one content item
#[derive(Debug)]
enum ItemOutcome {
    Filtered,
    Cached(LocalArtifact),
    Materialized(LocalArtifact),
    Deleted,
    TransferFailed,
}

/// Downloads and validates content into one cache partition
pub struct ContentFetcher {
    config: Arc<Config>,
    layout: CacheLayout,
    client: reqwest::Client,
    incompatible: Vec<Regex>,
    structured: Arc<dyn ContainerInspector>,
    listing: Arc<dyn ContainerInspector>,
    event_tx: broadcast::Sender<Event>,
}

impl ContentFetcher {
    /// Create a fetcher for the partition of the configured target
    pub fn new(
        config: Arc<Config>,
        structured: Arc<dyn ContainerInspector>,
        listing: Arc<dyn ContainerInspector>,
        event_tx: broadcast::Sender<Event>,
    ) -> Result<Self> {
        let incompatible = config
            .fetch
            .incompatible_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    Error::config(
                        "fetch.incompatible_patterns",
                        format!("invalid pattern '{p}': {e}"),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let client = reqwest::Client::builder()
            .timeout(config.fetch.timeout)
            .user_agent(concat!("offline-servicing/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            layout: CacheLayout::partition_for(&config.cache.root, &config.target),
            config,
            client,
            incompatible,
            structured,
            listing,
            event_tx,
        })
    }

    /// Partition this fetcher writes into
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Fetch and validate every content item of every descriptor
    ///
    /// Cancellation is honoured between content items. An update whose
    /// files were only partly processed when cancellation arrived is left
    /// out of the returned artifacts.
    pub async fn fetch_all(
        &self,
        descriptors: &[UpdateDescriptor],
        cancel: &CancellationToken,
    ) -> FetchReport {
        let mut report = FetchReport::default();

        'descriptors: for descriptor in descriptors {
            let mut artifacts = Vec::new();
            let mut transfer_failed = false;

            for item in &descriptor.content {
                if cancel.is_cancelled() {
                    tracing::info!("Fetch cancelled before next content item");
                    report.cancelled = true;
                    break 'descriptors;
                }

                match self.fetch_item(descriptor, item).await {
                    ItemOutcome::Filtered => report.filtered += 1,
                    ItemOutcome::Cached(artifact) => {
                        report.skipped_cached += 1;
                        artifacts.push(artifact);
                    }
                    ItemOutcome::Materialized(artifact) => {
                        report.fetched += 1;
                        artifacts.push(artifact);
                    }
                    ItemOutcome::Deleted => {
                        report.fetched += 1;
                        report.validation_deleted += 1;
                    }
                    ItemOutcome::TransferFailed => {
                        report.transfer_failed += 1;
                        transfer_failed = true;
                    }
                }
            }

            if transfer_failed {
                tracing::warn!(
                    update_id = %descriptor.id,
                    title = %descriptor.title,
                    "Update excluded from apply after transfer failure"
                );
                report.failed_updates.push(descriptor.id.clone());
            } else {
                report.artifacts.extend(artifacts);
            }
        }

        tracing::info!(
            fetched = report.fetched,
            cached = report.skipped_cached,
            filtered = report.filtered,
            validation_deleted = report.validation_deleted,
            transfer_failed = report.transfer_failed,
            "Fetch pass complete"
        );
        report
    }

    async fn fetch_item(&self, descriptor: &UpdateDescriptor, item: &ContentItem) -> ItemOutcome {
        let Some(format) = item.format else {
            tracing::debug!(file = %item.file_name, "Skipping unsupported container format");
            return ItemOutcome::Filtered;
        };

        if let Some(re) = self.incompatible.iter().find(|re| re.is_match(&item.file_name)) {
            tracing::info!(
                file = %item.file_name,
                pattern = re.as_str(),
                "Skipping content incompatible with offline images"
            );
            return ItemOutcome::Filtered;
        }

        if let Some(path) = self
            .layout
            .find_cached(descriptor.classification, &descriptor.title, &item.file_name)
            .await
        {
            tracing::info!(
                update_id = %descriptor.id,
                ?path,
                "Content already cached, skipping download"
            );
            self.event_tx
                .send(Event::CacheHit {
                    update_id: descriptor.id.clone(),
                    path: path.clone(),
                })
                .ok();
            let artifact = self.artifact(descriptor, path, format, ValidationState::Cached);
            return ItemOutcome::Cached(artifact);
        }

        let dest = self
            .layout
            .artifact_path(descriptor.classification, &descriptor.title, &item.file_name);
        if let Err(e) = self.download(descriptor, item, &dest).await {
            tracing::warn!(
                update_id = %descriptor.id,
                file = %item.file_name,
                error = %e,
                "Content transfer failed"
            );
            self.event_tx
                .send(Event::TransferFailed {
                    update_id: descriptor.id.clone(),
                    file_name: item.file_name.clone(),
                    error: e.to_string(),
                })
                .ok();
            return ItemOutcome::TransferFailed;
        }

        let state = match format {
            ContainerFormat::Msu => ValidationState::Exempt,
            ContainerFormat::Cab => self.validate_cab(&dest).await,
        };

        if state == ValidationState::InvalidDeleted {
            self.event_tx
                .send(Event::ValidationFailed {
                    update_id: descriptor.id.clone(),
                    path: dest,
                })
                .ok();
            return ItemOutcome::Deleted;
        }

        self.event_tx
            .send(Event::Fetched {
                update_id: descriptor.id.clone(),
                path: dest.clone(),
                state,
            })
            .ok();
        ItemOutcome::Materialized(self.artifact(descriptor, dest, format, state))
    }

    async fn download(
        &self,
        descriptor: &UpdateDescriptor,
        item: &ContentItem,
        dest: &Path,
    ) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part_path = part_path(dest);

        self.event_tx
            .send(Event::Fetching {
                update_id: descriptor.id.clone(),
                file_name: item.file_name.clone(),
            })
            .ok();
        tracing::debug!(update_id = %descriptor.id, url = %item.locator, "Downloading content");

        let credentials = self.config.fetch.credentials.as_ref();
        let digest = with_retry(&self.config.retry, || {
            download::download_to(&self.client, item, credentials, &part_path)
        })
        .await?;

        if self.config.fetch.verify_digests
            && let Err(e) = download::verify_digest(item, &digest)
        {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(e.into());
        }

        tokio::fs::rename(&part_path, dest).await?;
        Ok(())
    }

    /// Two-tier marker check; deletes the file when it fails
    async fn validate_cab(&self, path: &Path) -> ValidationState {
        let marker = self.config.validation.marker_file.as_str();

        let structured_miss = match self.structured.contains_marker(path, marker).await {
            Ok(true) => {
                return ValidationState::Valid {
                    method: self.structured.method(),
                };
            }
            Ok(false) => true,
            Err(e) => {
                tracing::debug!(
                    ?path,
                    inspector = self.structured.name(),
                    error = %e,
                    "Structured inspection unusable, falling back to listing"
                );
                false
            }
        };

        match self.listing.contains_marker(path, marker).await {
            Ok(true) => ValidationState::Valid {
                method: self.listing.method(),
            },
            Ok(false) => self.delete_invalid(path, marker).await,
            Err(_) if structured_miss => self.delete_invalid(path, marker).await,
            Err(e) => match self.config.validation.unverifiable_policy {
                UnverifiablePolicy::Retain => {
                    tracing::warn!(
                        ?path,
                        error = %e,
                        "No inspection method could examine cabinet, retaining it unverified"
                    );
                    ValidationState::Unverified
                }
                UnverifiablePolicy::Delete => {
                    tracing::warn!(
                        ?path,
                        error = %e,
                        "Cabinet could not be inspected, deleting it"
                    );
                    remove_quietly(path).await;
                    ValidationState::InvalidDeleted
                }
            },
        }
    }

    async fn delete_invalid(&self, path: &Path, marker: &str) -> ValidationState {
        let err = FetchError::MarkerMissing {
            path: path.to_path_buf(),
            marker: marker.to_string(),
        };
        tracing::error!(error = %err, "Cabinet failed validation, deleting it");
        remove_quietly(path).await;
        ValidationState::InvalidDeleted
    }

    fn artifact(
        &self,
        descriptor: &UpdateDescriptor,
        path: PathBuf,
        original_format: ContainerFormat,
        state: ValidationState,
    ) -> LocalArtifact {
        LocalArtifact {
            update_id: descriptor.id.clone(),
            title: descriptor.title.clone(),
            classification: descriptor.classification,
            path,
            original_format,
            state,
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::error!(?path, error = %e, "Failed to delete invalid cabinet");
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CatalogConfig, RetryConfig};
    use crate::types::{Classification, InspectionMethod};
    use async_trait::async_trait;
    use cab::tests::build_cab;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Inspector with a fixed answer
    struct FixedInspector(Option<bool>);

    #[async_trait]
    impl ContainerInspector for FixedInspector {
        async fn contains_marker(&self, _container: &Path, _marker: &str) -> Result<bool> {
            self.0
                .ok_or_else(|| Error::NotSupported("inspection unavailable".into()))
        }

        fn method(&self) -> InspectionMethod {
            InspectionMethod::Listing
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn config(cache_root: &Path) -> Config {
        let mut config = Config {
            catalog: CatalogConfig {
                curated_index_url: Some("https://index.example.com".into()),
                ..Default::default()
            },
            retry: RetryConfig {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
                jitter: false,
                ..Default::default()
            },
            ..Default::default()
        };
        config.cache.root = cache_root.to_path_buf();
        config
    }

    fn fetcher(
        config: Config,
        listing: Option<bool>,
    ) -> (ContentFetcher, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(64);
        let fetcher = ContentFetcher::new(
            Arc::new(config),
            Arc::new(StructuredCabInspector),
            Arc::new(FixedInspector(listing)),
            tx,
        )
        .unwrap();
        (fetcher, rx)
    }

    fn descriptor(id: &str, server: &MockServer, files: &[&str]) -> UpdateDescriptor {
        UpdateDescriptor {
            id: UpdateId::from(id),
            title: format!("Update {id}"),
            product: "Windows 10".into(),
            build: "22H2".into(),
            classification: Classification::CumulativeUpdate,
            superseded: false,
            revised_at: None,
            content: files
                .iter()
                .map(|f| ContentItem {
                    update_id: UpdateId::from(id),
                    file_name: f.to_string(),
                    locator: format!("{}/dl/{f}", server.uri()),
                    format: ContainerFormat::from_file_name(f),
                    sha256: None,
                    size_bytes: None,
                })
                .collect(),
        }
    }

    async fn serve(server: &MockServer, file: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(format!("/dl/{file}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn valid_cabinet_is_materialized_under_classification_and_title() {
        let server = MockServer::start().await;
        serve(&server, "c1.cab", build_cab(&["update.mum"])).await;
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, mut rx) = fetcher(config(dir.path()), Some(false));

        let report = fetcher
            .fetch_all(&[descriptor("U1", &server, &["c1.cab"])], &CancellationToken::new())
            .await;

        assert_eq!(report.fetched, 1);
        assert_eq!(report.artifacts.len(), 1);
        let artifact = &report.artifacts[0];
        assert_eq!(
            artifact.state,
            ValidationState::Valid {
                method: InspectionMethod::Structured
            }
        );
        assert_eq!(
            artifact.path,
            dir.path().join("Windows 10/22H2/x64/CumulativeUpdate/Update U1/c1.cab")
        );
        assert!(artifact.path.exists());
        assert!(!part_path(&artifact.path).exists());

        assert!(matches!(rx.try_recv().unwrap(), Event::Fetching { .. }));
        assert!(matches!(rx.try_recv().unwrap(), Event::Fetched { .. }));
    }

    #[tokio::test]
    async fn second_fetch_hits_cache_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl/c1.cab"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(build_cab(&["update.mum"])))
            .expect(1)
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, _rx) = fetcher(config(dir.path()), None);
        let descriptors = [descriptor("U1", &server, &["c1.cab"])];

        fetcher.fetch_all(&descriptors, &CancellationToken::new()).await;
        let second = fetcher.fetch_all(&descriptors, &CancellationToken::new()).await;

        assert_eq!(second.fetched, 0);
        assert_eq!(second.skipped_cached, 1);
        assert_eq!(second.artifacts[0].state, ValidationState::Cached);
    }

    #[tokio::test]
    async fn cabinet_without_marker_is_deleted() {
        let server = MockServer::start().await;
        serve(&server, "c2.cab", build_cab(&["other.manifest"])).await;
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, _rx) = fetcher(config(dir.path()), None);

        let report = fetcher
            .fetch_all(&[descriptor("U2", &server, &["c2.cab"])], &CancellationToken::new())
            .await;

        assert_eq!(report.validation_deleted, 1);
        assert!(report.artifacts.is_empty());
        let dest = fetcher
            .layout()
            .artifact_path(Classification::CumulativeUpdate, "Update U2", "c2.cab");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn listing_rescues_unparseable_cabinet() {
        let server = MockServer::start().await;
        serve(&server, "c1.cab", b"not a cabinet header at all, but long enough".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, _rx) = fetcher(config(dir.path()), Some(true));

        let report = fetcher
            .fetch_all(&[descriptor("U1", &server, &["c1.cab"])], &CancellationToken::new())
            .await;

        assert_eq!(
            report.artifacts[0].state,
            ValidationState::Valid {
                method: InspectionMethod::Listing
            }
        );
    }

    #[tokio::test]
    async fn uninspectable_cabinet_follows_policy() {
        let server = MockServer::start().await;
        serve(&server, "c1.cab", b"not a cabinet header at all, but long enough".to_vec()).await;

        let dir = tempfile::tempdir().unwrap();
        let (fetcher_retain, _rx) = fetcher(config(dir.path()), None);
        let report = fetcher_retain
            .fetch_all(&[descriptor("U1", &server, &["c1.cab"])], &CancellationToken::new())
            .await;
        assert_eq!(report.artifacts[0].state, ValidationState::Unverified);
        assert!(report.artifacts[0].path.exists());

        let dir = tempfile::tempdir().unwrap();
        let mut strict = config(dir.path());
        strict.validation.unverifiable_policy = UnverifiablePolicy::Delete;
        let (fetcher_delete, _rx) = fetcher(strict, None);
        let report = fetcher_delete
            .fetch_all(&[descriptor("U1", &server, &["c1.cab"])], &CancellationToken::new())
            .await;
        assert!(report.artifacts.is_empty());
        assert_eq!(report.validation_deleted, 1);
    }

    #[tokio::test]
    async fn unsupported_and_incompatible_files_never_hit_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, _rx) = fetcher(config(dir.path()), None);

        let report = fetcher
            .fetch_all(
                &[descriptor(
                    "U1",
                    &server,
                    &[
                        "setup.exe",
                        "windows10.0-kb1-x64_express.cab",
                        "windows10.0-kb1-x64-baseless.msu",
                        "ComponentMetadata.cab",
                    ],
                )],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.filtered, 4);
        assert!(report.artifacts.is_empty());
    }

    #[tokio::test]
    async fn msu_is_exempt_from_inspection() {
        let server = MockServer::start().await;
        serve(&server, "c3.msu", b"MSU payload".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, _rx) = fetcher(config(dir.path()), Some(false));

        let report = fetcher
            .fetch_all(&[descriptor("U3", &server, &["c3.msu"])], &CancellationToken::new())
            .await;

        assert_eq!(report.artifacts[0].state, ValidationState::Exempt);
        assert_eq!(report.artifacts[0].original_format, ContainerFormat::Msu);
    }

    #[tokio::test]
    async fn transfer_failure_excludes_update_and_batch_continues() {
        let server = MockServer::start().await;
        serve(&server, "ok.msu", b"payload".to_vec()).await;
        Mock::given(method("GET"))
            .and(path("/dl/broken.msu"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, mut rx) = fetcher(config(dir.path()), None);

        let report = fetcher
            .fetch_all(
                &[
                    descriptor("U1", &server, &["ok.msu", "broken.msu"]),
                    descriptor("U2", &server, &["ok.msu"]),
                ],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.transfer_failed, 1);
        assert_eq!(report.failed_updates, vec![UpdateId::from("U1")]);
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].update_id, UpdateId::from("U2"));

        let mut saw_failure = false;
        while let Ok(event) = rx.try_recv() {
            saw_failure |= matches!(event, Event::TransferFailed { .. });
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn digest_mismatch_is_a_transfer_failure() {
        let server = MockServer::start().await;
        serve(&server, "c3.msu", b"tampered".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, _rx) = fetcher(config(dir.path()), None);
        let mut d = descriptor("U3", &server, &["c3.msu"]);
        d.content[0].sha256 = Some("00".repeat(32));

        let report = fetcher.fetch_all(&[d], &CancellationToken::new()).await;

        assert_eq!(report.transfer_failed, 1);
        let dest = fetcher
            .layout()
            .artifact_path(Classification::CumulativeUpdate, "Update U3", "c3.msu");
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, _rx) = fetcher(config(dir.path()), None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = fetcher
            .fetch_all(&[descriptor("U1", &server, &["c1.msu"])], &cancel)
            .await;

        assert!(report.cancelled);
        assert!(report.artifacts.is_empty());
    }
}
