use common::dtos::process_document_job::ProcessDocumentJobDto;
use document_worker::{
    domain::entities::{
        file_record::FileStatus,
        process_outcome::{ProcessErrorKind, ProcessOutcome},
    },
    handlers::handler_process_document_job::{decide_delivery_action, run_request, DeliveryAction},
};

use crate::helpers::{spawn_pipeline, Operation, TestPipeline};

const MAX_ATTEMPTS: u32 = 3;

/// Runs a job like a consumer does, returning the job to publish again if any
async fn handle(
    pipeline: &TestPipeline,
    job: &ProcessDocumentJobDto,
) -> Option<ProcessDocumentJobDto> {
    let outcome = pipeline.processor.run(job.file_id, &run_request(job)).await;

    match decide_delivery_action(&outcome, job, MAX_ATTEMPTS) {
        DeliveryAction::Retry(next_job) => Some(next_job),
        DeliveryAction::Acknowledge | DeliveryAction::GiveUp => None,
    }
}

#[tokio::test]
async fn a_retry_after_a_concurrent_completion_should_change_nothing() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = pipeline.upload("owner/report.pdf", b"a b c");

    // A duplicate delivery hits a store fault, and its fallback failure write is lost too
    pipeline.file_repository.fail_on(Operation::GetFile);
    pipeline
        .file_repository
        .fail_on(Operation::Transition(FileStatus::Failed));
    let retry = handle(&pipeline, &ProcessDocumentJobDto::new(file.id))
        .await
        .expect("A store fault should be retried");
    pipeline.file_repository.clear_faults();

    // The other delivery completes the file
    assert_eq!(
        pipeline.processor.process(file.id).await,
        ProcessOutcome::converted(3)
    );
    let completed = pipeline.file_repository.file(file.id).unwrap();
    let content = pipeline.file_repository.content(file.id).unwrap();

    // Act
    let next_retry = handle(&pipeline, &retry).await;

    // Assert
    assert!(!retry.reprocess);
    assert_eq!(next_retry, None);
    assert_eq!(pipeline.file_repository.file(file.id).unwrap(), completed);
    assert_eq!(pipeline.file_repository.content(file.id).unwrap(), content);
    assert_eq!(pipeline.file_repository.nb_content_writes(), 1);
    assert_eq!(pipeline.converter.converted_files().len(), 1);
}

#[tokio::test]
async fn a_retry_should_resume_the_failure_written_by_its_interrupted_run() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = pipeline.upload("owner/report.pdf", b"a b c");

    pipeline.file_repository.fail_on(Operation::UpsertContent);
    let retry = handle(&pipeline, &ProcessDocumentJobDto::new(file.id))
        .await
        .expect("A store fault should be retried");
    let interrupted = pipeline.file_repository.file(file.id).unwrap();
    assert_eq!(interrupted.status, FileStatus::Failed);
    assert_eq!(interrupted.error_message, retry.interrupted_by);
    pipeline.file_repository.clear_faults();

    // Act
    let next_retry = handle(&pipeline, &retry).await;

    // Assert
    assert_eq!(next_retry, None);
    let stored = pipeline.file_repository.file(file.id).unwrap();
    assert_eq!(stored.status, FileStatus::Completed);
    assert_eq!(stored.error_message, None);
    assert_eq!(pipeline.file_repository.content(file.id).unwrap().word_count, 3);
}

#[tokio::test]
async fn a_retry_should_leave_a_file_failed_by_another_run() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = pipeline.upload("owner/report.pdf", b"a b c");

    pipeline.file_repository.fail_on(Operation::UpsertContent);
    let retry = handle(&pipeline, &ProcessDocumentJobDto::new(file.id))
        .await
        .expect("A store fault should be retried");
    pipeline.file_repository.clear_faults();

    // Another run fails the file for its own reason
    let mut failed_elsewhere = pipeline.file_repository.file(file.id).unwrap();
    failed_elsewhere.error_message = Some("Unsupported format".to_string());
    pipeline.file_repository.insert_file(failed_elsewhere.clone());

    // Act
    let outcome = pipeline.processor.run(file.id, &run_request(&retry)).await;

    // Assert
    assert_eq!(
        outcome,
        ProcessOutcome::error(ProcessErrorKind::AlreadyFailed, "Unsupported format")
    );
    assert_eq!(
        pipeline.file_repository.file(file.id).unwrap(),
        failed_elsewhere
    );
    assert_eq!(pipeline.converter.converted_files().len(), 1);
}

#[tokio::test]
async fn a_job_failing_on_every_attempt_should_stop_at_max_attempts() {
    // Arrange
    let pipeline = spawn_pipeline();
    let file = pipeline.upload("owner/report.pdf", b"a b c");
    pipeline.file_repository.fail_on(Operation::UpsertContent);

    // Act
    let mut job = ProcessDocumentJobDto::new(file.id);
    let mut nb_dispatches = 1;
    while let Some(next_job) = handle(&pipeline, &job).await {
        job = next_job;
        nb_dispatches += 1;
    }

    // Assert
    assert_eq!(nb_dispatches, MAX_ATTEMPTS);
    assert_eq!(pipeline.converter.converted_files().len(), 3);
    assert_eq!(
        pipeline.file_repository.file(file.id).unwrap().status,
        FileStatus::Failed
    );
}
