use serde::Serialize;

pub const FILE_NOT_FOUND_MESSAGE: &str = "File not found";
pub const DOWNLOAD_FAILED_MESSAGE: &str = "Failed to download file from storage";
pub const ALREADY_FAILED_MESSAGE: &str = "File processing already failed";
pub const STATUS_CHANGED_MESSAGE: &str = "File status was changed by another process";

/// Why a document could not be processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessErrorKind {
    /// No file with this id
    NotFound,
    /// The object store returned no bytes
    Transfer,
    /// The converter failed on the file
    Conversion,
    /// The file already failed and no re-process was requested
    AlreadyFailed,
    /// A guarded status write was refused: another process moved the file
    Conflict,
    /// An unexpected error aborted the run, for example a store fault
    Persistence,
}

impl ProcessErrorKind {
    /// Only unexpected faults are worth another dispatch, domain failures are final
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessErrorKind::Persistence)
    }
}

/// Result of one processing run, handed back to the task runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Success {
        /// `None` when the file was already completed and nothing was done
        #[serde(skip_serializing_if = "Option::is_none")]
        word_count: Option<usize>,
    },
    Error {
        kind: ProcessErrorKind,
        message: String,
    },
}

impl ProcessOutcome {
    pub fn converted(word_count: usize) -> Self {
        Self::Success {
            word_count: Some(word_count),
        }
    }

    pub fn already_completed() -> Self {
        Self::Success { word_count: None }
    }

    pub fn error(kind: ProcessErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Success { .. } => false,
            Self::Error { kind, .. } => kind.is_retryable(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::Value::Null)
    }
}
