use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::file_record::FileRecord;

/// Text converted from an uploaded file
///
/// There is at most one per file: it is saved with an upsert keyed by `file_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkdownContent {
    pub file_id: Uuid,
    pub owner_id: Uuid,
    pub content: String,
    pub word_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MarkdownContent {
    pub fn new(file: &FileRecord, content: String, now: DateTime<Utc>) -> Self {
        let word_count = count_words(&content);

        Self {
            file_id: file.id,
            owner_id: file.owner_id,
            content,
            word_count,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Number of whitespace-delimited tokens
pub fn count_words(content: &str) -> usize {
    content.split_whitespace().count()
}
