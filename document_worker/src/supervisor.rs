use std::{fmt::Debug, future::Future, time::Duration};

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The long-lived tasks of the worker, started at boot and stopped together
///
/// Every listener is expected to stop by itself once the shared token is cancelled.
pub struct BackgroundListeners<E> {
    cancel_token: CancellationToken,
    listeners: Vec<(String, JoinHandle<Result<(), E>>)>,
}

/// How the listeners ended during a shutdown
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: usize,
    pub failed: usize,
    pub aborted: usize,
}

impl<E> BackgroundListeners<E>
where
    E: Debug + Send + 'static,
{
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            cancel_token,
            listeners: vec![],
        }
    }

    /// Token to give to the listeners, cancelled on shutdown
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, listener: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let name = name.into();
        info!("Starting background listener {}", name);

        self.listeners.push((name, tokio::spawn(listener)));
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Cancels every listener, then waits for them during the grace period
    ///
    /// Errors, panics and timeouts are logged, never returned.
    /// The listeners still running at the end of the grace period are aborted.
    #[tracing::instrument(name = "Stopping background listeners", skip(self))]
    pub async fn shutdown(self, grace_period: Duration) -> ShutdownReport {
        self.cancel_token.cancel();

        let deadline = Instant::now() + grace_period;
        let mut report = ShutdownReport::default();

        for (name, mut listener) in self.listeners {
            match tokio::time::timeout_at(deadline, &mut listener).await {
                Ok(Ok(Ok(()))) => {
                    info!("Background listener {} stopped", name);
                    report.stopped += 1;
                }
                Ok(Ok(Err(error))) => {
                    error!(?error, "Background listener {} failed", name);
                    report.failed += 1;
                }
                Ok(Err(error)) => {
                    error!(?error, "Background listener {} panicked", name);
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(
                        "Background listener {} still running after {:?}, aborting it",
                        name, grace_period
                    );
                    listener.abort();
                    report.aborted += 1;
                }
            }
        }

        report
    }
}
