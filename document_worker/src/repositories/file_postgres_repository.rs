use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::{
    domain::entities::{
        file_record::{FileRecord, FileStatus, StatusTransition},
        markdown_content::MarkdownContent,
    },
    ports::file_repository::{FileRepository, FileRepositoryError},
};

/// Postgres store of the `files` and `markdown_contents` tables
///
/// Each method runs a single statement, status guards are part of the `WHERE` clauses.
#[derive(Clone)]
pub struct FilePostgresRepository {
    connection_pool: PgPool,
}

impl FilePostgresRepository {
    pub fn new(connection_pool: PgPool) -> Self {
        Self { connection_pool }
    }
}

#[async_trait]
impl FileRepository for FilePostgresRepository {
    #[tracing::instrument(name = "Getting file from database", skip(self))]
    async fn get_file(&self, file_id: Uuid) -> Result<Option<FileRecord>, FileRepositoryError> {
        let row = sqlx::query(
            r#"
    SELECT id, owner_id, storage_path, status, error_message, processed_at, updated_at
    FROM files
    WHERE id = $1
            "#,
        )
        .bind(file_id)
        .fetch_optional(&self.connection_pool)
        .await?;

        row.map(|row| file_record_from_row(file_id, &row))
            .transpose()
    }

    #[tracing::instrument(
        name = "Updating file status in database",
        skip(self, transition),
        fields(to = %transition.to)
    )]
    async fn transition_file(
        &self,
        file_id: Uuid,
        transition: &StatusTransition,
    ) -> Result<bool, FileRepositoryError> {
        let result = sqlx::query(
            r#"
    UPDATE files
    SET status = $2,
        error_message = $3,
        processed_at = COALESCE($4, processed_at),
        updated_at = GREATEST(updated_at, $5)
    WHERE id = $1
        AND status = ANY($6)
        AND (status <> 'failed' OR $7::text IS NULL OR error_message = $7)
            "#,
        )
        .bind(file_id)
        .bind(transition.to.as_str())
        .bind(transition.error_message.as_deref())
        .bind(transition.processed_at)
        .bind(transition.updated_at)
        .bind(transition.allowed_from_as_strings())
        .bind(transition.failed_with.as_deref())
        .execute(&self.connection_pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(
        name = "Saving markdown content in database",
        skip(self, content),
        fields(file_id = %content.file_id, word_count = content.word_count)
    )]
    async fn upsert_markdown_content(
        &self,
        content: &MarkdownContent,
    ) -> Result<(), FileRepositoryError> {
        let word_count = i64::try_from(content.word_count).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
    INSERT INTO markdown_contents (id, file_id, owner_id, content, word_count, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (file_id) DO UPDATE
    SET content = EXCLUDED.content,
        word_count = EXCLUDED.word_count,
        updated_at = GREATEST(markdown_contents.updated_at, EXCLUDED.updated_at)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(content.file_id)
        .bind(content.owner_id)
        .bind(&content.content)
        .bind(word_count)
        .bind(content.created_at)
        .bind(content.updated_at)
        .execute(&self.connection_pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(name = "Failing stale files in database", skip(self))]
    async fn fail_stale_files(
        &self,
        older_than: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, FileRepositoryError> {
        let result = sqlx::query(
            r#"
    UPDATE files
    SET status = $1,
        error_message = $2,
        updated_at = GREATEST(updated_at, $3)
    WHERE status = $4 AND updated_at < $5
            "#,
        )
        .bind(FileStatus::Failed.as_str())
        .bind(error_message)
        .bind(now)
        .bind(FileStatus::Processing.as_str())
        .bind(older_than)
        .execute(&self.connection_pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn file_record_from_row(file_id: Uuid, row: &PgRow) -> Result<FileRecord, FileRepositoryError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<FileStatus>()
        .map_err(|error| FileRepositoryError::InvalidRecord(file_id, error))?;

    Ok(FileRecord {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        storage_path: row.try_get("storage_path")?,
        status,
        error_message: row.try_get("error_message")?,
        processed_at: row.try_get("processed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
