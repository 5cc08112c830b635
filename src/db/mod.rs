//! Database layer for offline-servicing
//!
//! Handles SQLite persistence of servicing history.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`history`]: Batch and apply-outcome records

use crate::types::{
    ApplyOutcome, ApplyStatus, BatchSummary, Classification, ContainerFormat, UpdateId,
};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod history;
mod migrations;

/// New servicing batch to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewBatch {
    /// Product being serviced
    pub product: String,
    /// Build being serviced
    pub build: String,
    /// Image architecture
    pub architecture: String,
    /// Mount path of the offline image
    pub mount_path: PathBuf,
    /// Unix timestamp when the batch started
    pub started_at: i64,
}

/// Batch record from database
#[derive(Debug, Clone, FromRow)]
pub struct BatchRow {
    /// Unique database ID
    pub id: i64,
    /// Product being serviced
    pub product: String,
    /// Build being serviced
    pub build: String,
    /// Image architecture
    pub architecture: String,
    /// Mount path of the offline image
    pub mount_path: String,
    /// Unix timestamp when the batch started
    pub started_at: i64,
    /// Unix timestamp when the batch finished, if it did
    pub completed_at: Option<i64>,
    /// Descriptors returned by the resolver
    pub resolved: i64,
    /// Files downloaded
    pub fetched: i64,
    /// Files already cached
    pub skipped_cached: i64,
    /// Files rejected before download
    pub filtered: i64,
    /// Files deleted by validation
    pub validation_deleted: i64,
    /// Files whose transfer failed
    pub transfer_failed: i64,
    /// Files pruned by the supersedence audit
    pub pruned: i64,
    /// Artifacts applied on the first attempt
    pub applied_success: i64,
    /// Artifacts applied through the fallback format
    pub applied_fallback: i64,
    /// Artifacts whose apply failed
    pub applied_failed: i64,
    /// Whether the batch was cancelled (0 = no, 1 = yes)
    pub cancelled: i32,
}

impl BatchRow {
    /// Summary counts stored with this batch
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            resolved: self.resolved as usize,
            fetched: self.fetched as usize,
            skipped_cached: self.skipped_cached as usize,
            filtered: self.filtered as usize,
            validation_deleted: self.validation_deleted as usize,
            transfer_failed: self.transfer_failed as usize,
            pruned: self.pruned as usize,
            applied_success: self.applied_success as usize,
            applied_fallback: self.applied_fallback as usize,
            applied_failed: self.applied_failed as usize,
            cancelled: self.cancelled != 0,
        }
    }
}

/// Apply outcome record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct OutcomeRow {
    /// Unique database ID
    pub id: i64,
    /// Batch this outcome belongs to
    pub batch_id: i64,
    /// Owning update
    pub update_id: String,
    /// Classification code (see [`Classification::to_i32`])
    pub classification: i32,
    /// On-disk path after the apply sequence
    pub path: String,
    /// Extension of the last attempt ("cab" or "msu")
    pub format: String,
    /// Status code (see [`ApplyStatus::to_i32`])
    pub status: i32,
    /// Error detail for failures
    pub error: Option<String>,
    /// Unix timestamp when the outcome was recorded
    pub applied_at: i64,
}

impl From<OutcomeRow> for ApplyOutcome {
    fn from(row: OutcomeRow) -> Self {
        let path = PathBuf::from(row.path);
        let format = match row.format.as_str() {
            "msu" => ContainerFormat::Msu,
            _ => ContainerFormat::Cab,
        };

        ApplyOutcome {
            update_id: UpdateId(row.update_id),
            classification: Classification::from_i32(row.classification),
            path,
            format,
            status: ApplyStatus::from_i32(row.status),
            error: row.error,
        }
    }
}

/// Database handle for offline-servicing
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
