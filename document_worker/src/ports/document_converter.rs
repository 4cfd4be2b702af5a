use std::path::Path;

use async_trait::async_trait;

/// Converts a local file into structured text
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, local_file_path: &Path) -> Result<String, DocumentConverterError>;
}

/// A conversion failure, its message is shown as is to the owner of the file
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DocumentConverterError {
    pub message: String,
}

impl DocumentConverterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
