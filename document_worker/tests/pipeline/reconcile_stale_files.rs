use std::{sync::Arc, time::Duration};

use chrono::Utc;
use document_worker::{
    domain::{
        entities::{
            file_record::{FileRecord, FileStatus},
            process_outcome::{ProcessErrorKind, ProcessOutcome},
        },
        services::reconcile_stale_files::{reconcile_stale_files, STALE_FILE_MESSAGE},
    },
    handlers::stale_files_sweeper::run_sweeper,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::helpers::{spawn_pipeline, InMemoryFileRepository, Operation};

fn a_file(status: FileStatus, updated_minutes_ago: i64) -> FileRecord {
    FileRecord {
        status,
        updated_at: Utc::now() - chrono::Duration::minutes(updated_minutes_ago),
        ..FileRecord::uploaded(Uuid::new_v4(), "owner/report.pdf")
    }
}

#[tokio::test]
async fn only_files_stuck_in_processing_should_be_failed() {
    // Arrange
    let file_repository = InMemoryFileRepository::default();
    let stale = a_file(FileStatus::Processing, 90);
    let fresh = a_file(FileStatus::Processing, 5);
    let old_uploaded = a_file(FileStatus::Uploaded, 90);
    let old_completed = a_file(FileStatus::Completed, 90);
    for file in [&stale, &fresh, &old_uploaded, &old_completed] {
        file_repository.insert_file(file.clone());
    }

    // Act
    let nb_failed =
        reconcile_stale_files(&file_repository, Duration::from_secs(30 * 60), Utc::now())
            .await
            .unwrap();

    // Assert
    assert_eq!(nb_failed, 1);

    let swept = file_repository.file(stale.id).unwrap();
    assert_eq!(swept.status, FileStatus::Failed);
    assert_eq!(
        swept.error_message.as_deref(),
        Some("Processing timed out before completion")
    );
    assert!(swept.updated_at > stale.updated_at);

    for file in [&fresh, &old_uploaded, &old_completed] {
        assert_eq!(file_repository.file(file.id).unwrap(), *file);
    }
}

#[tokio::test]
async fn an_unreachable_threshold_should_fail_nothing() {
    // Arrange
    let file_repository = InMemoryFileRepository::default();
    let stale = a_file(FileStatus::Processing, 90);
    file_repository.insert_file(stale.clone());

    // Act
    let nb_failed = reconcile_stale_files(&file_repository, Duration::MAX, Utc::now())
        .await
        .unwrap();

    // Assert
    assert_eq!(nb_failed, 0);
    assert_eq!(file_repository.file(stale.id).unwrap(), stale);
}

#[tokio::test]
async fn a_store_fault_should_be_returned() {
    // Arrange
    let file_repository = InMemoryFileRepository::default();
    file_repository.fail_on(Operation::FailStaleFiles);

    // Act
    let result =
        reconcile_stale_files(&file_repository, Duration::from_secs(60), Utc::now()).await;

    // Assert
    assert!(result.is_err());
}

#[tokio::test]
async fn a_swept_file_should_not_be_processed_again_without_request() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = pipeline.upload("owner/report.pdf", b"a b c");
    let mut stuck = pipeline.file_repository.file(file.id).unwrap();
    stuck.status = FileStatus::Processing;
    stuck.updated_at = Utc::now() - chrono::Duration::hours(2);
    pipeline.file_repository.insert_file(stuck);

    reconcile_stale_files(
        pipeline.file_repository.as_ref(),
        Duration::from_secs(60 * 60),
        Utc::now(),
    )
    .await
    .unwrap();

    // Act
    let outcome = pipeline.processor.process(file.id).await;

    // Assert
    assert_eq!(
        outcome,
        ProcessOutcome::error(ProcessErrorKind::AlreadyFailed, STALE_FILE_MESSAGE)
    );
    assert_eq!(pipeline.file_repository.nb_contents(), 0);
}

#[tokio::test]
async fn the_sweeper_should_sweep_until_cancelled() {
    // Arrange
    let file_repository = Arc::new(InMemoryFileRepository::default());
    let stale = a_file(FileStatus::Processing, 90);
    file_repository.insert_file(stale.clone());
    // Every sweep fails but the sweeper keeps running
    let failing_repository = Arc::new(InMemoryFileRepository::default());
    failing_repository.fail_on(Operation::FailStaleFiles);

    let cancel_token = CancellationToken::new();
    let sweeper = tokio::spawn(run_sweeper(
        file_repository.clone(),
        Duration::from_secs(60),
        Duration::from_millis(10),
        cancel_token.clone(),
    ));
    let failing_sweeper = tokio::spawn(run_sweeper(
        failing_repository.clone(),
        Duration::from_secs(60),
        Duration::from_millis(10),
        cancel_token.clone(),
    ));

    // Act
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel_token.cancel();

    // Assert
    tokio::time::timeout(Duration::from_secs(5), sweeper)
        .await
        .expect("The sweeper did not stop once cancelled")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), failing_sweeper)
        .await
        .expect("The failing sweeper did not stop once cancelled")
        .unwrap();

    assert_eq!(
        file_repository.file(stale.id).unwrap().status,
        FileStatus::Failed
    );
    assert!(failing_repository.nb_writes() > 1);
}
