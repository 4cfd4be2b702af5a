use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use common::helper::error_chain_fmt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            file_record::{FileRecord, FileStatus, StatusTransition},
            markdown_content::MarkdownContent,
            process_outcome::{
                ProcessErrorKind, ProcessOutcome, ALREADY_FAILED_MESSAGE, DOWNLOAD_FAILED_MESSAGE,
                FILE_NOT_FOUND_MESSAGE, STATUS_CHANGED_MESSAGE,
            },
        },
        services::scratch_file::ScratchFile,
    },
    ports::{
        document_converter::DocumentConverter,
        file_repository::{FileRepository, FileRepositoryError},
        object_store::{ObjectStore, ObjectStoreError},
    },
};

/// Errors aborting a processing run outside of its expected failures
#[derive(thiserror::Error)]
pub enum ProcessDocumentError {
    #[error(transparent)]
    FileRepositoryError(#[from] FileRepositoryError),
    #[error(transparent)]
    ObjectStoreError(#[from] ObjectStoreError),
    #[error("Failed to stage the file for conversion: {0}")]
    ScratchFileError(#[from] std::io::Error),
}

impl std::fmt::Debug for ProcessDocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// What a processing run was asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    /// Converts the file unless it already reached a terminal status
    Process,
    /// Converts the file again, whatever its current status
    Reprocess,
    /// Retries a run aborted by an unexpected error
    ///
    /// Only the failure that run wrote is resumed: a file completed or failed by another run is left as is.
    Resume { interrupted_by: String },
}

/// Drives one file through its conversion: status update, download, conversion, persistence
///
/// Holds no state between runs, it can be shared by every consumer.
pub struct DocumentProcessor {
    file_repository: Arc<dyn FileRepository>,
    object_store: Arc<dyn ObjectStore>,
    converter: Arc<dyn DocumentConverter>,
    scratch_directory: PathBuf,
}

impl DocumentProcessor {
    pub fn new(
        file_repository: Arc<dyn FileRepository>,
        object_store: Arc<dyn ObjectStore>,
        converter: Arc<dyn DocumentConverter>,
        scratch_directory: PathBuf,
    ) -> Self {
        Self {
            file_repository,
            object_store,
            converter,
            scratch_directory,
        }
    }

    /// Converts a file, unless it was already processed
    pub async fn process(&self, file_id: Uuid) -> ProcessOutcome {
        self.run(file_id, &RunRequest::Process).await
    }

    /// Converts a file again, whatever its current status
    pub async fn reprocess(&self, file_id: Uuid) -> ProcessOutcome {
        self.run(file_id, &RunRequest::Reprocess).await
    }

    /// Runs the conversion of a file
    ///
    /// Never fails: every error ends up as an error outcome, and the file is left
    /// in a terminal status whenever the metadata store allows it.
    #[tracing::instrument(name = "Processing document", skip(self))]
    pub async fn run(&self, file_id: Uuid, request: &RunRequest) -> ProcessOutcome {
        let outcome = match self.try_run(file_id, request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(?error, "Unexpected error while processing the document");
                let message = error.to_string();
                self.fail_unfinished(file_id, &message).await;

                ProcessOutcome::error(ProcessErrorKind::Persistence, message)
            }
        };

        info!(outcome = %outcome.to_json(), "Document processing finished");
        outcome
    }

    async fn try_run(
        &self,
        file_id: Uuid,
        request: &RunRequest,
    ) -> Result<ProcessOutcome, ProcessDocumentError> {
        let Some(file) = self.file_repository.get_file(file_id).await? else {
            return Ok(ProcessOutcome::error(
                ProcessErrorKind::NotFound,
                FILE_NOT_FOUND_MESSAGE,
            ));
        };

        // Deliveries are at least once: a finished file is only touched again on request
        let begin = match request {
            RunRequest::Process => {
                if let Some(outcome) = already_finished(&file, None) {
                    return Ok(outcome);
                }
                StatusTransition::begin_processing(false, Utc::now())
            }
            RunRequest::Reprocess => StatusTransition::begin_processing(true, Utc::now()),
            RunRequest::Resume { interrupted_by } => {
                if let Some(outcome) = already_finished(&file, Some(interrupted_by.as_str())) {
                    return Ok(outcome);
                }
                StatusTransition::resume_interrupted(interrupted_by, Utc::now())
            }
        };

        if !self.file_repository.transition_file(file_id, &begin).await? {
            warn!("The file could not be moved to processing");
            return Ok(ProcessOutcome::error(
                ProcessErrorKind::Conflict,
                STATUS_CHANGED_MESSAGE,
            ));
        }

        let bytes = match self.object_store.download(&file.storage_path).await? {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => {
                warn!(storage_path = %file.storage_path, "Nothing was downloaded");
                return self
                    .finish(
                        file_id,
                        &StatusTransition::fail(DOWNLOAD_FAILED_MESSAGE, Utc::now()),
                        ProcessOutcome::error(ProcessErrorKind::Transfer, DOWNLOAD_FAILED_MESSAGE),
                    )
                    .await;
            }
        };

        let scratch_file = ScratchFile::stage(&self.scratch_directory, file.extension(), &bytes)?;
        drop(bytes);

        let result = self.convert_and_persist(&file, &scratch_file).await;

        if let Err(error) = scratch_file.release() {
            warn!(?error, "Failed to remove the scratch file");
        }

        result
    }

    #[tracing::instrument(name = "Converting staged file", skip(self, file, scratch_file))]
    async fn convert_and_persist(
        &self,
        file: &FileRecord,
        scratch_file: &ScratchFile,
    ) -> Result<ProcessOutcome, ProcessDocumentError> {
        let text = match self.converter.convert(scratch_file.path()).await {
            Ok(text) => text,
            Err(error) => {
                warn!(?error, "Conversion failed");
                return self
                    .finish(
                        file.id,
                        &StatusTransition::fail(&error.message, Utc::now()),
                        ProcessOutcome::error(ProcessErrorKind::Conversion, error.message),
                    )
                    .await;
            }
        };

        let content = MarkdownContent::new(file, text, Utc::now());
        self.file_repository
            .upsert_markdown_content(&content)
            .await?;
        info!(word_count = content.word_count, "Converted content saved");

        self.finish(
            file.id,
            &StatusTransition::complete(Utc::now()),
            ProcessOutcome::converted(content.word_count),
        )
        .await
    }

    /// Writes the terminal status of the run
    ///
    /// # Returns
    /// The given outcome, or a conflict if another process moved the file in the meantime
    async fn finish(
        &self,
        file_id: Uuid,
        transition: &StatusTransition,
        outcome: ProcessOutcome,
    ) -> Result<ProcessOutcome, ProcessDocumentError> {
        if self
            .file_repository
            .transition_file(file_id, transition)
            .await?
        {
            return Ok(outcome);
        }

        warn!(to = %transition.to, "The file status was changed by another process");
        Ok(ProcessOutcome::error(
            ProcessErrorKind::Conflict,
            STATUS_CHANGED_MESSAGE,
        ))
    }

    /// Best effort: a failure here is only logged
    async fn fail_unfinished(&self, file_id: Uuid, error_message: &str) {
        let transition = StatusTransition::fail_unfinished(error_message, Utc::now());

        match self
            .file_repository
            .transition_file(file_id, &transition)
            .await
        {
            Ok(applied) => info!(applied, "Unfinished file marked as failed"),
            Err(error) => error!(?error, "Failed to mark the unfinished file as failed"),
        }
    }
}

/// The outcome of a file that needs no run, if any
///
/// A file failed with `interrupted_by` still needs a run: its failure was written by an aborted run.
fn already_finished(file: &FileRecord, interrupted_by: Option<&str>) -> Option<ProcessOutcome> {
    match file.status {
        FileStatus::Completed => {
            info!("File already completed, nothing to do");
            Some(ProcessOutcome::already_completed())
        }
        FileStatus::Failed => {
            if interrupted_by.is_some() && file.error_message.as_deref() == interrupted_by {
                info!("Resuming the file failed by an interrupted run");
                return None;
            }

            info!("File already failed, nothing to do");
            let message = file
                .error_message
                .clone()
                .unwrap_or_else(|| ALREADY_FAILED_MESSAGE.to_string());
            Some(ProcessOutcome::error(
                ProcessErrorKind::AlreadyFailed,
                message,
            ))
        }
        FileStatus::Uploaded | FileStatus::Processing => None,
    }
}
