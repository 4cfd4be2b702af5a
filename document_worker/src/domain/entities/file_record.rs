use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle status of an uploaded file
///
/// `uploaded` is the initial status, `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploaded => "uploaded",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Failed)
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(FileStatus::Uploaded),
            "processing" => Ok(FileStatus::Processing),
            "completed" => Ok(FileStatus::Completed),
            "failed" => Ok(FileStatus::Failed),
            _ => Err(format!("Invalid FileStatus: {}", s)),
        }
    }
}

/// A file to convert, as stored in the metadata store
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: Uuid,

    /// Owner of the file, copied on the converted content
    pub owner_id: Uuid,

    /// Path of the uploaded file in the object store
    pub storage_path: String,

    pub status: FileStatus,

    /// Only set when the status is `failed`
    pub error_message: Option<String>,

    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// A newly uploaded file, waiting for its conversion
    pub fn uploaded(owner_id: Uuid, storage_path: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            storage_path: storage_path.to_string(),
            status: FileStatus::Uploaded,
            error_message: None,
            processed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Extension of the stored file name, used to name the staged copy
    pub fn extension(&self) -> Option<&str> {
        std::path::Path::new(&self.storage_path)
            .extension()
            .and_then(|extension| extension.to_str())
            .filter(|extension| !extension.is_empty())
    }

    /// Applies a status transition if the current status allows it
    ///
    /// `updated_at` never goes backward.
    ///
    /// # Returns
    /// `true` if the record was modified
    pub fn apply(&mut self, transition: &StatusTransition) -> bool {
        if !transition.applies_to(self.status, self.error_message.as_deref()) {
            return false;
        }

        self.status = transition.to;
        self.error_message = transition.error_message.clone();
        if let Some(processed_at) = transition.processed_at {
            self.processed_at = Some(processed_at);
        }
        self.updated_at = self.updated_at.max(transition.updated_at);

        true
    }
}

const BEGIN_FROM: &[FileStatus] = &[FileStatus::Uploaded, FileStatus::Processing];
const REPROCESS_FROM: &[FileStatus] = &[
    FileStatus::Uploaded,
    FileStatus::Processing,
    FileStatus::Completed,
    FileStatus::Failed,
];
const RESUME_FROM: &[FileStatus] = &[
    FileStatus::Uploaded,
    FileStatus::Processing,
    FileStatus::Failed,
];
const FINISH_FROM: &[FileStatus] = &[FileStatus::Processing];
const UNFINISHED: &[FileStatus] = &[FileStatus::Uploaded, FileStatus::Processing];

/// A guarded write of the status of a file
///
/// The write is only applied when the current status is one of `allowed_from`,
/// which is how the state machine is enforced by every store.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub to: FileStatus,
    pub allowed_from: &'static [FileStatus],
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    /// When set, a `failed` file is only moved if it failed with this error message
    pub failed_with: Option<String>,
}

impl StatusTransition {
    /// `uploaded -> processing`
    ///
    /// A file still `processing` is taken over: its previous run died before finishing.
    /// Terminal files are only restarted on an explicit re-process request.
    pub fn begin_processing(reprocess: bool, now: DateTime<Utc>) -> Self {
        Self {
            to: FileStatus::Processing,
            allowed_from: if reprocess { REPROCESS_FROM } else { BEGIN_FROM },
            error_message: None,
            processed_at: None,
            updated_at: now,
            failed_with: None,
        }
    }

    /// `failed -> processing`, for the retry of a run aborted by an unexpected error
    ///
    /// Only the failure written by that aborted run is resumed: a file failed for any
    /// other reason, or completed in the meantime, is left untouched.
    pub fn resume_interrupted(interrupted_by: &str, now: DateTime<Utc>) -> Self {
        Self {
            to: FileStatus::Processing,
            allowed_from: RESUME_FROM,
            error_message: None,
            processed_at: None,
            updated_at: now,
            failed_with: Some(interrupted_by.to_string()),
        }
    }

    /// `processing -> completed`
    pub fn complete(now: DateTime<Utc>) -> Self {
        Self {
            to: FileStatus::Completed,
            allowed_from: FINISH_FROM,
            error_message: None,
            processed_at: Some(now),
            updated_at: now,
            failed_with: None,
        }
    }

    /// `processing -> failed`
    pub fn fail(error_message: &str, now: DateTime<Utc>) -> Self {
        Self {
            to: FileStatus::Failed,
            allowed_from: FINISH_FROM,
            error_message: Some(error_message.to_string()),
            processed_at: None,
            updated_at: now,
            failed_with: None,
        }
    }

    /// Any non terminal status `-> failed`, used when a run is aborted by an unexpected error
    pub fn fail_unfinished(error_message: &str, now: DateTime<Utc>) -> Self {
        Self {
            allowed_from: UNFINISHED,
            ..Self::fail(error_message, now)
        }
    }

    pub fn applies_to(&self, current: FileStatus, current_error_message: Option<&str>) -> bool {
        if !self.allowed_from.contains(&current) {
            return false;
        }

        match (&self.failed_with, current) {
            (Some(failed_with), FileStatus::Failed) => {
                current_error_message == Some(failed_with.as_str())
            }
            _ => true,
        }
    }

    /// Statuses accepted as source, as strings for SQL queries
    pub fn allowed_from_as_strings(&self) -> Vec<String> {
        self.allowed_from
            .iter()
            .map(|status| status.as_str().to_string())
            .collect()
    }
}
