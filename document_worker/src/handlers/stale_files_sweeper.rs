use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    domain::services::reconcile_stale_files::reconcile_stale_files,
    ports::file_repository::FileRepository,
};

/// Periodically fails the files stuck in `processing` until cancelled
///
/// The first sweep happens right away. A failing sweep is logged and the next one still runs.
#[tracing::instrument(name = "Running stale files sweeper", skip(file_repository, cancel_token))]
pub async fn run_sweeper(
    file_repository: Arc<dyn FileRepository>,
    stale_after: Duration,
    sweep_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut interval = tokio::time::interval(sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("🧹 Sweeping stale files every {:?}", sweep_interval);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Stale files sweeper cancelled");
                return;
            }
            _ = interval.tick() => {}
        }

        if let Err(error) =
            reconcile_stale_files(file_repository.as_ref(), stale_after, Utc::now()).await
        {
            error!(?error, "Failed to sweep stale files");
        }
    }
}
