//! Servicing history: batches and their apply outcomes.

use crate::types::{ApplyOutcome, BatchSummary};
use crate::{Error, Result};

use super::{BatchRow, Database, NewBatch, OutcomeRow};

impl Database {
    /// Record the start of a servicing batch
    ///
    /// Returns the new batch ID. Summary counts stay zero until
    /// [`finish_batch`](Self::finish_batch).
    pub async fn insert_batch(&self, batch: &NewBatch) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO batches (product, build, architecture, mount_path, started_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&batch.product)
        .bind(&batch.build)
        .bind(&batch.architecture)
        .bind(batch.mount_path.to_string_lossy().into_owned())
        .bind(batch.started_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.last_insert_rowid())
    }

    /// Store the final summary of a batch
    pub async fn finish_batch(
        &self,
        id: i64,
        summary: &BatchSummary,
        completed_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE batches
            SET completed_at = ?, resolved = ?, fetched = ?, skipped_cached = ?,
                filtered = ?, validation_deleted = ?, transfer_failed = ?, pruned = ?,
                applied_success = ?, applied_fallback = ?, applied_failed = ?,
                cancelled = ?
            WHERE id = ?
            "#,
        )
        .bind(completed_at)
        .bind(summary.resolved as i64)
        .bind(summary.fetched as i64)
        .bind(summary.skipped_cached as i64)
        .bind(summary.filtered as i64)
        .bind(summary.validation_deleted as i64)
        .bind(summary.transfer_failed as i64)
        .bind(summary.pruned as i64)
        .bind(summary.applied_success as i64)
        .bind(summary.applied_fallback as i64)
        .bind(summary.applied_failed as i64)
        .bind(i32::from(summary.cancelled))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(())
    }

    /// Record one apply outcome under a batch
    pub async fn insert_outcome(
        &self,
        batch_id: i64,
        outcome: &ApplyOutcome,
        applied_at: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO apply_outcomes (
                batch_id, update_id, classification, path, format,
                status, error, applied_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(batch_id)
        .bind(outcome.update_id.as_str())
        .bind(outcome.classification.to_i32())
        .bind(outcome.path.to_string_lossy().into_owned())
        .bind(outcome.format.extension())
        .bind(outcome.status.to_i32())
        .bind(&outcome.error)
        .bind(applied_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.last_insert_rowid())
    }

    /// List batches, most recent first
    pub async fn list_batches(&self, limit: usize, offset: usize) -> Result<Vec<BatchRow>> {
        let rows = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT id, product, build, architecture, mount_path, started_at, completed_at,
                   resolved, fetched, skipped_cached, filtered, validation_deleted,
                   transfer_failed, pruned, applied_success, applied_fallback,
                   applied_failed, cancelled
            FROM batches
            ORDER BY started_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows)
    }

    /// Apply outcomes of one batch, in the order they were recorded
    pub async fn outcomes_for_batch(&self, batch_id: i64) -> Result<Vec<ApplyOutcome>> {
        let rows = sqlx::query_as::<_, OutcomeRow>(
            r#"
            SELECT id, batch_id, update_id, classification, path, format,
                   status, error, applied_at
            FROM apply_outcomes
            WHERE batch_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(ApplyOutcome::from).collect())
    }

    /// Count recorded batches
    pub async fn count_batches(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM batches")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(count)
    }
}
