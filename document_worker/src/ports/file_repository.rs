use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::helper::error_chain_fmt;
use uuid::Uuid;

use crate::domain::entities::{
    file_record::{FileRecord, StatusTransition},
    markdown_content::MarkdownContent,
};

/// Metadata store of the uploaded files and of their converted content
///
/// Writes on files and on contents are independent, no transaction spans both.
#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn get_file(&self, file_id: Uuid) -> Result<Option<FileRecord>, FileRepositoryError>;

    /// Applies a guarded status write
    ///
    /// # Returns
    /// `false` if the file does not exist or its current status does not allow the transition
    async fn transition_file(
        &self,
        file_id: Uuid,
        transition: &StatusTransition,
    ) -> Result<bool, FileRepositoryError>;

    /// Saves the converted content of a file, replacing the existing one for the same file
    async fn upsert_markdown_content(
        &self,
        content: &MarkdownContent,
    ) -> Result<(), FileRepositoryError>;

    /// Fails every file still `processing` whose last update is older than `older_than`
    ///
    /// # Returns
    /// The number of failed files
    async fn fail_stale_files(
        &self,
        older_than: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, FileRepositoryError>;
}

#[derive(thiserror::Error)]
pub enum FileRepositoryError {
    #[error(transparent)]
    DBError(#[from] sqlx::Error),
    #[error("Invalid file record {0}: {1}")]
    InvalidRecord(Uuid, String),
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),
}

impl std::fmt::Debug for FileRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
