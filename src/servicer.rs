//! Batch orchestration
//!
//! [`ImageServicer`] wires the resolver, auditor, fetcher and apply engine
//! together for one configured target and records every batch in the
//! history database.

use crate::apply::{
    ApplyEngine, ApplyStrategy, DismInstaller, NoOpInstaller, PackageInstaller,
};
use crate::cache::{AuditReport, SupersedenceAuditor};
use crate::catalog::{CatalogBackend, CatalogResolver, backend_from_config};
use crate::config::Config;
use crate::db::{Database, NewBatch};
use crate::error::{Error, Result};
use crate::fetch::{
    ContainerInspector, ContentFetcher, FetchReport, ListingInspector, NoOpInspector,
    StructuredCabInspector,
};
use crate::types::{BatchSummary, Event, Stage, UpdateDescriptor};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// External collaborators of a servicer
///
/// [`Components::from_config`] picks real implementations; tests and
/// embedders can substitute their own.
pub struct Components {
    /// Catalog backend answering resolver queries
    pub backend: Arc<dyn CatalogBackend>,
    /// First-tier cabinet inspector
    pub structured: Arc<dyn ContainerInspector>,
    /// Second-tier cabinet inspector
    pub listing: Arc<dyn ContainerInspector>,
    /// Installer adding packages to the mounted image
    pub installer: Arc<dyn PackageInstaller>,
}

impl Components {
    /// Select implementations from the configuration
    ///
    /// Explicit tool paths win; otherwise PATH is searched when
    /// `tools.search_path` is set, and the no-op implementations are used
    /// when nothing is found.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = backend_from_config(&config.catalog)?;

        let listing: Arc<dyn ContainerInspector> =
            if let Some(ref lister_path) = config.tools.cab_lister_path {
                let inspector = ListingInspector::from_binary(lister_path.clone()).ok_or_else(|| {
                    Error::config(
                        "tools.cab_lister_path",
                        format!(
                            "unrecognised cabinet lister '{}' (expected expand, cabextract or 7z)",
                            lister_path.display()
                        ),
                    )
                })?;
                Arc::new(inspector)
            } else if config.tools.search_path {
                ListingInspector::from_path()
                    .map(|i| Arc::new(i) as Arc<dyn ContainerInspector>)
                    .unwrap_or_else(|| Arc::new(NoOpInspector))
            } else {
                Arc::new(NoOpInspector)
            };

        let scratch_dir = config.apply.scratch_dir.clone();
        let installer: Arc<dyn PackageInstaller> = if let Some(ref dism_path) =
            config.tools.dism_path
        {
            Arc::new(DismInstaller::new(dism_path.clone()).with_scratch_dir(scratch_dir))
        } else if config.tools.search_path {
            DismInstaller::from_path()
                .map(|d| Arc::new(d.with_scratch_dir(scratch_dir)) as Arc<dyn PackageInstaller>)
                .unwrap_or_else(|| Arc::new(NoOpInstaller))
        } else {
            Arc::new(NoOpInstaller)
        };

        Ok(Self {
            backend,
            structured: Arc::new(StructuredCabInspector),
            listing,
            installer,
        })
    }
}

/// Output of the resolve, audit and fetch stages
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    /// Descriptors returned by the resolver
    pub descriptors: Vec<UpdateDescriptor>,
    /// Supersedence audit result
    pub audit: AuditReport,
    /// Fetch and validation result, including the artifacts to apply
    pub fetch: FetchReport,
}

impl PreparedBatch {
    /// Summary counts of the stages run so far
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            resolved: self.descriptors.len(),
            fetched: self.fetch.fetched,
            skipped_cached: self.fetch.skipped_cached,
            filtered: self.fetch.filtered,
            validation_deleted: self.fetch.validation_deleted,
            transfer_failed: self.fetch.transfer_failed,
            pruned: self.audit.removed.len(),
            cancelled: self.fetch.cancelled,
            ..Default::default()
        }
    }
}

/// Offline image servicer for one configured target
pub struct ImageServicer {
    config: Arc<Config>,
    db: Database,
    resolver: CatalogResolver,
    auditor: SupersedenceAuditor,
    fetcher: ContentFetcher,
    engine: ApplyEngine,
    strategy: ApplyStrategy,
    event_tx: broadcast::Sender<Event>,
}

impl ImageServicer {
    /// Create a servicer from configuration
    ///
    /// - Validates the configuration
    /// - Creates the cache root
    /// - Opens/creates the history database and runs migrations
    /// - Selects the catalog backend, cabinet lister and installer
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let components = Components::from_config(&config)?;
        Self::with_components(config, components).await
    }

    /// Create a servicer over explicit collaborators
    pub async fn with_components(config: Config, components: Components) -> Result<Self> {
        tokio::fs::create_dir_all(&config.cache.root)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create cache directory '{}': {}",
                        config.cache.root.display(),
                        e
                    ),
                ))
            })?;

        let db = Database::new(&config.persistence.database_path).await?;

        let (event_tx, _rx) = broadcast::channel(1000);
        let config = Arc::new(config);

        let resolver =
            CatalogResolver::new(components.backend, &config.rules, config.retry.clone())?;
        let fetcher = ContentFetcher::new(
            config.clone(),
            components.structured.clone(),
            components.listing.clone(),
            event_tx.clone(),
        )?;
        let engine = ApplyEngine::new(components.installer.clone(), event_tx.clone());
        let strategy = ApplyStrategy::select(config.apply.strategy, &config.target.product);

        tracing::info!(
            backend = resolver.backend_name(),
            structured = components.structured.name(),
            listing = components.listing.name(),
            installer = components.installer.name(),
            ?strategy,
            "Servicer initialized"
        );

        Ok(Self {
            auditor: SupersedenceAuditor::new(config.cache.root.clone()),
            config,
            db,
            resolver,
            fetcher,
            engine,
            strategy,
            event_tx,
        })
    }

    /// Subscribe to batch events
    ///
    /// Each subscriber receives every event. A subscriber more than 1000
    /// events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Servicing history
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Apply strategy chosen for this target
    pub fn strategy(&self) -> ApplyStrategy {
        self.strategy
    }

    /// Run the supersedence audit on the blocking pool
    ///
    /// A refused or failed audit is logged and reported as skipped.
    async fn audit_partition(&self, descriptors: &[UpdateDescriptor]) -> AuditReport {
        let auditor = self.auditor.clone();
        let target = self.config.target.clone();
        let fresh = descriptors.to_vec();

        let result = tokio::task::spawn_blocking(move || auditor.audit(&target, &fresh))
            .await
            .map_err(|e| Error::Other(format!("audit task panicked: {}", e)))
            .and_then(|audit| audit);

        match result {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "Supersedence audit skipped");
                AuditReport {
                    skipped: true,
                    ..Default::default()
                }
            }
        }
    }

    /// Resolve, audit and fetch without touching an image
    ///
    /// Stages a validated cache for the configured target.
    ///
    /// # Errors
    ///
    /// Only catalog failures propagate. Audit problems are logged and the
    /// audit is skipped; per-file fetch problems are counted in the report.
    pub async fn prepare(&self, cancel: &CancellationToken) -> Result<PreparedBatch> {
        let ctx = self.config.context();

        tracing::debug!(stage = ?Stage::Resolve, "Stage starting");
        let descriptors = self.resolver.resolve(&ctx).await?;
        self.event_tx
            .send(Event::Resolved {
                count: descriptors.len(),
            })
            .ok();

        tracing::debug!(stage = ?Stage::Audit, "Stage starting");
        let audit = self.audit_partition(&descriptors).await;
        for path in &audit.removed {
            self.event_tx
                .send(Event::ArtifactPruned { path: path.clone() })
                .ok();
        }

        if cancel.is_cancelled() {
            tracing::info!("Batch cancelled before fetch");
            return Ok(PreparedBatch {
                descriptors,
                audit,
                fetch: FetchReport {
                    cancelled: true,
                    ..Default::default()
                },
            });
        }

        tracing::debug!(stage = ?Stage::Fetch, "Stage starting");
        let fetch = self.fetcher.fetch_all(&descriptors, cancel).await;

        Ok(PreparedBatch {
            descriptors,
            audit,
            fetch,
        })
    }

    /// Run one batch against the image mounted at `mount`
    ///
    /// Resolves, audits, fetches and applies, then records the batch and
    /// its outcomes in the history database.
    ///
    /// # Errors
    ///
    /// Returns an error for catalog failures and for an unusable mount
    /// target ([`Error::is_batch_fatal`]), and if the batch cannot be
    /// recorded at start. Everything else is reported in the summary.
    pub async fn run_batch(
        &self,
        mount: &Path,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let target = &self.config.target;
        self.event_tx
            .send(Event::BatchStarted {
                product: target.product.clone(),
                build: target.build.clone(),
            })
            .ok();

        let batch_id = self
            .db
            .insert_batch(&NewBatch {
                product: target.product.clone(),
                build: target.build.clone(),
                architecture: target.architecture.clone(),
                mount_path: mount.to_path_buf(),
                started_at: chrono::Utc::now().timestamp(),
            })
            .await?;

        let mut summary = BatchSummary::default();
        let result = self.execute(batch_id, mount, cancel, &mut summary).await;

        if let Err(e) = self
            .db
            .finish_batch(batch_id, &summary, chrono::Utc::now().timestamp())
            .await
        {
            tracing::warn!(batch_id, error = %e, "Failed to record batch summary");
        }

        match result {
            Ok(()) => {
                tracing::info!(
                    batch_id,
                    product = %target.product,
                    build = %target.build,
                    %summary,
                    "Batch complete"
                );
                self.event_tx
                    .send(Event::BatchComplete {
                        summary: summary.clone(),
                    })
                    .ok();
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(batch_id, error = %e, "Batch aborted");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        batch_id: i64,
        mount: &Path,
        cancel: &CancellationToken,
        summary: &mut BatchSummary,
    ) -> Result<()> {
        let prepared = self.prepare(cancel).await?;
        *summary = prepared.summary();

        if summary.cancelled {
            return Ok(());
        }

        tracing::debug!(stage = ?Stage::Apply, "Stage starting");
        let report = self
            .engine
            .apply_batch(mount, prepared.fetch.artifacts, self.strategy, cancel)
            .await?;

        summary.record_outcomes(&report.outcomes);
        summary.cancelled = report.cancelled;

        let applied_at = chrono::Utc::now().timestamp();
        for outcome in &report.outcomes {
            if let Err(e) = self.db.insert_outcome(batch_id, outcome, applied_at).await {
                tracing::warn!(
                    batch_id,
                    update_id = %outcome.update_id,
                    error = %e,
                    "Failed to record apply outcome"
                );
            }
        }

        Ok(())
    }

    /// Close the history database
    pub async fn shutdown(self) {
        self.db.close().await;
    }
}
