use async_trait::async_trait;
use common::helper::error_chain_fmt;

/// Store of the raw uploaded files
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Gets the content of a stored file
    ///
    /// # Returns
    /// `None` if there is no object at this path
    async fn download(&self, object_path_name: &str) -> Result<Option<Vec<u8>>, ObjectStoreError>;
}

#[derive(thiserror::Error)]
pub enum ObjectStoreError {
    #[error(transparent)]
    S3Error(#[from] s3::error::S3Error),
    #[error("Object store unavailable: {0}")]
    Unavailable(String),
}

impl std::fmt::Debug for ObjectStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
