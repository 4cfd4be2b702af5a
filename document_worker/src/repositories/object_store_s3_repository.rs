use async_trait::async_trait;
use s3::{error::S3Error, Bucket};
use tracing::info;

use crate::ports::object_store::{ObjectStore, ObjectStoreError};

const NOT_FOUND_STATUS_CODE: u16 = 404;

/// Simple Storage Service (S3) client reading the uploaded files
pub struct ObjectStoreS3Repository {
    // All the uploaded files of an environment are in the same bucket
    bucket: Bucket,
}

impl ObjectStoreS3Repository {
    pub fn new(bucket: Bucket) -> Self {
        Self { bucket }
    }
}

#[async_trait]
impl ObjectStore for ObjectStoreS3Repository {
    /// Gets a file from the bucket
    ///
    /// # Arguments
    /// * `object_path_name` - The path (with the object name) of the file to get
    ///
    /// # Returns
    /// `None` if the object does not exist or is empty
    #[tracing::instrument(name = "Getting file from bucket", skip(self))]
    async fn download(&self, object_path_name: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let response = match self.bucket.get_object(object_path_name).await {
            Ok(response) => response,
            Err(S3Error::Http(NOT_FOUND_STATUS_CODE, _)) => {
                info!("🪣 No object at {}", object_path_name);
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };

        let status_code = response.status_code();
        if status_code == NOT_FOUND_STATUS_CODE {
            info!("🪣 No object at {}", object_path_name);
            return Ok(None);
        }
        if !(200..300).contains(&status_code) {
            return Err(ObjectStoreError::Unavailable(format!(
                "unexpected status code {} for {}",
                status_code, object_path_name
            )));
        }

        let bytes = response.to_vec();
        info!("🪣 Got {} bytes from bucket", bytes.len());

        Ok(Some(bytes).filter(|bytes| !bytes.is_empty()))
    }
}
