use document_worker::domain::entities::{
    file_record::{FileRecord, FileStatus},
    process_outcome::{ProcessErrorKind, ProcessOutcome, STATUS_CHANGED_MESSAGE},
};
use uuid::Uuid;

use crate::helpers::spawn_pipeline;

#[tokio::test]
async fn processing_a_completed_file_again_should_change_nothing() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = pipeline.upload("owner/report.pdf", b"a b c");
    pipeline.processor.process(file.id).await;
    let completed = pipeline.file_repository.file(file.id).unwrap();
    let nb_writes = pipeline.file_repository.nb_writes();

    // Act
    let outcome = pipeline.processor.process(file.id).await;

    // Assert
    assert_eq!(outcome, ProcessOutcome::already_completed());
    assert!(outcome.is_success());
    assert_eq!(pipeline.file_repository.file(file.id).unwrap(), completed);
    assert_eq!(pipeline.file_repository.nb_writes(), nb_writes);
    assert_eq!(pipeline.file_repository.nb_content_writes(), 1);
    assert_eq!(pipeline.converter.converted_files().len(), 1);
}

#[tokio::test]
async fn processing_a_failed_file_again_should_report_its_stored_error() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = FileRecord {
        status: FileStatus::Failed,
        error_message: Some("Unsupported format".to_string()),
        ..FileRecord::uploaded(Uuid::new_v4(), "owner/scan.pdf")
    };
    pipeline.file_repository.insert_file(file.clone());
    pipeline.object_store.put(&file.storage_path, b"a b c");

    // Act
    let outcome = pipeline.processor.process(file.id).await;

    // Assert
    assert_eq!(
        outcome,
        ProcessOutcome::error(ProcessErrorKind::AlreadyFailed, "Unsupported format")
    );
    assert_eq!(pipeline.file_repository.file(file.id).unwrap(), file);
    assert_eq!(pipeline.file_repository.nb_writes(), 0);
    assert!(pipeline.converter.converted_files().is_empty());
}

#[tokio::test]
async fn reprocessing_a_completed_file_should_replace_its_content() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = pipeline.upload("owner/report.pdf", b"a b c");
    pipeline.processor.process(file.id).await;
    let first_content = pipeline.file_repository.content(file.id).unwrap();
    pipeline.object_store.put(&file.storage_path, b"a b c d e");

    // Act
    let outcome = pipeline.processor.reprocess(file.id).await;

    // Assert
    assert_eq!(outcome, ProcessOutcome::converted(5));
    assert_eq!(pipeline.file_repository.nb_contents(), 1);

    let content = pipeline.file_repository.content(file.id).unwrap();
    assert_eq!(content.word_count, 5);
    assert_eq!(content.created_at, first_content.created_at);
    assert_eq!(
        pipeline.file_repository.file(file.id).unwrap().status,
        FileStatus::Completed
    );
}

#[tokio::test]
async fn reprocessing_a_failed_file_should_clear_its_error() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = pipeline.upload("owner/report.pdf", b"a b c");
    pipeline.converter.fail_with("Temporary converter outage");
    pipeline.processor.process(file.id).await;

    // Act
    pipeline.converter.recover();
    let retried = pipeline.processor.reprocess(file.id).await;

    // Assert
    assert!(retried.is_success());
    let stored = pipeline.file_repository.file(file.id).unwrap();
    assert_eq!(stored.status, FileStatus::Completed);
    assert_eq!(stored.error_message, None);
}

#[tokio::test]
async fn a_file_left_processing_by_a_dead_run_should_be_taken_over() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = pipeline.upload("owner/report.pdf", b"one two");
    let mut processing = pipeline.file_repository.file(file.id).unwrap();
    processing.status = FileStatus::Processing;
    pipeline.file_repository.insert_file(processing);

    // Act
    let outcome = pipeline.processor.process(file.id).await;

    // Assert
    assert_eq!(outcome, ProcessOutcome::converted(2));
    assert_eq!(
        pipeline.file_repository.file(file.id).unwrap().status,
        FileStatus::Completed
    );
}

#[tokio::test]
async fn a_completion_should_never_overwrite_a_status_set_by_another_process() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = pipeline.upload("owner/report.pdf", b"a b c");
    pipeline
        .file_repository
        .interfere_before(FileStatus::Completed, FileStatus::Failed);

    // Act
    let outcome = pipeline.processor.process(file.id).await;

    // Assert
    assert_eq!(
        outcome,
        ProcessOutcome::error(ProcessErrorKind::Conflict, STATUS_CHANGED_MESSAGE)
    );
    assert!(!outcome.is_retryable());
    assert_eq!(
        pipeline.file_repository.file(file.id).unwrap().status,
        FileStatus::Failed
    );
    assert!(pipeline.scratch_files().is_empty());
}

#[tokio::test]
async fn interleaved_runs_on_the_same_file_should_create_one_content() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = pipeline.upload("owner/report.pdf", b"a b c");
    pipeline.converter.yield_during_conversion();

    // Act
    let (first, second) = tokio::join!(
        pipeline.processor.process(file.id),
        pipeline.processor.process(file.id)
    );

    // Assert
    // Both runs reached the conversion before either one finished
    assert_eq!(pipeline.converter.converted_files().len(), 2);

    let conflict = ProcessOutcome::error(ProcessErrorKind::Conflict, STATUS_CHANGED_MESSAGE);
    let mut outcomes = [first, second];
    outcomes.sort_by_key(|outcome| !outcome.is_success());
    assert_eq!(outcomes, [ProcessOutcome::converted(3), conflict]);

    assert_eq!(pipeline.file_repository.nb_contents(), 1);
    assert_eq!(
        pipeline.file_repository.file(file.id).unwrap().status,
        FileStatus::Completed
    );
    assert!(pipeline.scratch_files().is_empty());
}
