use crate::db::*;
use crate::types::{
    ApplyOutcome, ApplyStatus, BatchSummary, Classification, ContainerFormat, UpdateId,
};
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn new_batch(started_at: i64) -> NewBatch {
    NewBatch {
        product: "Windows 10".to_string(),
        build: "22H2".to_string(),
        architecture: "x64".to_string(),
        mount_path: PathBuf::from("/mnt/image"),
        started_at,
    }
}

fn outcome(id: &str, status: ApplyStatus, format: ContainerFormat) -> ApplyOutcome {
    ApplyOutcome {
        update_id: UpdateId::new(id),
        classification: Classification::CumulativeUpdate,
        path: PathBuf::from(format!("/cache/{id}.{}", format.extension())),
        format,
        status,
        error: (status == ApplyStatus::Failure)
            .then(|| "primary: 0x800f081e; fallback: 0x800f081e".to_string()),
    }
}

#[tokio::test]
async fn test_insert_and_finish_batch() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db.insert_batch(&new_batch(1_700_000_000)).await.unwrap();
    assert!(id > 0);

    let pending = db.list_batches(10, 0).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].completed_at.is_none());
    assert_eq!(pending[0].summary(), BatchSummary::default());

    let summary = BatchSummary {
        resolved: 3,
        fetched: 2,
        skipped_cached: 1,
        validation_deleted: 1,
        applied_success: 1,
        applied_fallback: 1,
        ..Default::default()
    };
    db.finish_batch(id, &summary, 1_700_000_600).await.unwrap();

    let batches = db.list_batches(10, 0).await.unwrap();
    assert_eq!(batches[0].completed_at, Some(1_700_000_600));
    assert_eq!(batches[0].summary(), summary);
    assert_eq!(batches[0].product, "Windows 10");
    assert_eq!(batches[0].mount_path, "/mnt/image");

    db.close().await;
}

#[tokio::test]
async fn test_outcomes_round_trip_in_order() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let batch_id = db.insert_batch(&new_batch(1_700_000_000)).await.unwrap();

    let recorded = vec![
        outcome("c1", ApplyStatus::Success, ContainerFormat::Msu),
        outcome("c3", ApplyStatus::FallbackSuccess, ContainerFormat::Cab),
        outcome("c5", ApplyStatus::Failure, ContainerFormat::Cab),
    ];
    for o in &recorded {
        db.insert_outcome(batch_id, o, 1_700_000_100).await.unwrap();
    }

    let loaded = db.outcomes_for_batch(batch_id).await.unwrap();
    assert_eq!(loaded.len(), 3);
    for (got, want) in loaded.iter().zip(&recorded) {
        assert_eq!(got.update_id, want.update_id);
        assert_eq!(got.status, want.status);
        assert_eq!(got.format, want.format);
        assert_eq!(got.path, want.path);
        assert_eq!(got.error, want.error);
        assert_eq!(got.classification, Classification::CumulativeUpdate);
    }

    db.close().await;
}

#[tokio::test]
async fn test_outcome_requires_existing_batch() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let result = db
        .insert_outcome(999, &outcome("c1", ApplyStatus::Success, ContainerFormat::Msu), 0)
        .await;
    assert!(result.is_err(), "foreign key should reject unknown batch");

    db.close().await;
}

#[tokio::test]
async fn test_list_batches_pagination() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    for i in 0..5 {
        db.insert_batch(&new_batch(1_700_000_000 + i)).await.unwrap();
    }
    assert_eq!(db.count_batches().await.unwrap(), 5);

    let first = db.list_batches(2, 0).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].started_at, 1_700_000_004);
    assert_eq!(first[1].started_at, 1_700_000_003);

    let last = db.list_batches(2, 4).await.unwrap();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].started_at, 1_700_000_000);

    db.close().await;
}
