use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::ports::file_repository::{FileRepository, FileRepositoryError};

pub const STALE_FILE_MESSAGE: &str = "Processing timed out before completion";

/// Fails the files stuck in `processing` for longer than `stale_after`
///
/// A worker killed during a run leaves its file in `processing`, nothing else would finish it.
///
/// # Returns
/// The number of failed files
#[tracing::instrument(name = "Reconciling stale files", skip(file_repository))]
pub async fn reconcile_stale_files(
    file_repository: &dyn FileRepository,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<u64, FileRepositoryError> {
    let Some(older_than) = chrono::Duration::from_std(stale_after)
        .ok()
        .and_then(|stale_after| now.checked_sub_signed(stale_after))
    else {
        return Ok(0);
    };

    let nb_failed = file_repository
        .fail_stale_files(older_than, STALE_FILE_MESSAGE, now)
        .await?;

    if nb_failed > 0 {
        info!(nb_failed, "Stale files marked as failed");
    }

    Ok(nb_failed)
}
