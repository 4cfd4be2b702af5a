use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::helper::error_chain_fmt;

/// Stable name of the document processing task
///
/// Used as the routing key of the job messages on the documents exchange.
pub const PROCESS_DOCUMENT_TASK: &str = "process_document_task.v1";

/// Message asking a worker to convert an uploaded file
///
/// Only the file id travels on the wire: the worker reads everything else from the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcessDocumentJobDto {
    pub file_id: Uuid,

    /// Explicit request to run again on a file that already reached a terminal status
    #[serde(default)]
    pub reprocess: bool,

    /// Number of times the job has already been dispatched after a transient failure
    #[serde(default)]
    pub attempt: u32,

    /// Error message written by the aborted attempt this retry resumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted_by: Option<String>,
}

impl ProcessDocumentJobDto {
    pub fn new(file_id: Uuid) -> Self {
        Self {
            file_id,
            reprocess: false,
            attempt: 0,
            interrupted_by: None,
        }
    }

    /// The job to publish again after a transient failure
    ///
    /// The retry keeps the re-process intent of the original request. It only carries the
    /// error message of the aborted attempt, so that the worker resumes that failure and
    /// nothing else.
    pub fn next_attempt(&self, interrupted_by: &str) -> Self {
        Self {
            file_id: self.file_id,
            reprocess: self.reprocess,
            attempt: self.attempt.saturating_add(1),
            interrupted_by: Some(interrupted_by.to_string()),
        }
    }

    pub fn try_parsing(data: &[u8]) -> Result<Self, ProcessDocumentJobDtoError> {
        let data = std::str::from_utf8(data)?;
        let job = serde_json::from_str(data)
            .map_err(|e| ProcessDocumentJobDtoError::InvalidJsonData(e, data.to_string()))?;

        Ok(job)
    }
}

#[derive(thiserror::Error)]
pub enum ProcessDocumentJobDtoError {
    #[error("Data could not be converted from utf8 u8 vector to string")]
    InvalidStringData(#[from] std::str::Utf8Error),

    #[error("Data did not represent a valid JSON object: {0}. Data: {1}")]
    InvalidJsonData(serde_json::Error, String),
}

impl std::fmt::Debug for ProcessDocumentJobDtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
