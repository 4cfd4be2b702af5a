use std::time::Duration;

use common::telemetry::{get_tracing_subscriber, init_tracing_subscriber};
use document_worker::supervisor::{BackgroundListeners, ShutdownReport};
use once_cell::sync::Lazy;
use tokio_util::sync::CancellationToken;

// Ensures that the `tracing` stack is only initialized once using `once_cell`
static TRACING: Lazy<()> = Lazy::new(|| {
    let result = if std::env::var("TEST_LOG").is_ok() {
        init_tracing_subscriber(get_tracing_subscriber(
            "test".into(),
            "info".into(),
            std::io::stdout,
        ))
    } else {
        init_tracing_subscriber(get_tracing_subscriber(
            "test".into(),
            "info".into(),
            std::io::sink,
        ))
    };

    if let Err(error) = result {
        eprintln!("Failed to initialize tracing: {:?}", error);
    }
});

async fn cooperative_listener(cancel_token: CancellationToken) -> Result<(), String> {
    cancel_token.cancelled().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_should_cancel_and_wait_for_every_listener() {
    // Arrange
    Lazy::force(&TRACING);
    let mut listeners = BackgroundListeners::<String>::new(CancellationToken::new());
    for index in 0..3 {
        let cancel_token = listeners.cancel_token();
        listeners.spawn(
            format!("consumer {}", index),
            cooperative_listener(cancel_token),
        );
    }
    let cancel_token = listeners.cancel_token();
    assert_eq!(listeners.len(), 3);

    // Act
    let report = listeners.shutdown(Duration::from_secs(5)).await;

    // Assert
    assert!(cancel_token.is_cancelled());
    assert_eq!(
        report,
        ShutdownReport {
            stopped: 3,
            failed: 0,
            aborted: 0,
        }
    );
}

#[tokio::test]
async fn failing_and_panicking_listeners_should_not_stop_the_shutdown() {
    // Arrange
    Lazy::force(&TRACING);
    let mut listeners = BackgroundListeners::<String>::new(CancellationToken::new());

    let cancel_token = listeners.cancel_token();
    listeners.spawn("failing", async move {
        cancel_token.cancelled().await;
        Err("connection lost".to_string())
    });

    let cancel_token = listeners.cancel_token();
    listeners.spawn("panicking", async move {
        cancel_token.cancelled().await;
        if cancel_token.is_cancelled() {
            panic!("listener panicked during teardown");
        }
        Ok(())
    });

    let cancel_token = listeners.cancel_token();
    listeners.spawn("healthy", cooperative_listener(cancel_token));

    // Act
    let report = listeners.shutdown(Duration::from_secs(5)).await;

    // Assert
    assert_eq!(
        report,
        ShutdownReport {
            stopped: 1,
            failed: 2,
            aborted: 0,
        }
    );
}

#[tokio::test]
async fn listeners_ignoring_the_cancellation_should_be_aborted_after_the_grace_period() {
    // Arrange
    Lazy::force(&TRACING);
    let mut listeners = BackgroundListeners::<String>::new(CancellationToken::new());
    listeners.spawn("stubborn", async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    });
    let cancel_token = listeners.cancel_token();
    listeners.spawn("cooperative", cooperative_listener(cancel_token));

    // Act
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        listeners.shutdown(Duration::from_millis(100)),
    )
    .await
    .expect("The shutdown did not respect its grace period");

    // Assert
    assert_eq!(
        report,
        ShutdownReport {
            stopped: 1,
            failed: 0,
            aborted: 1,
        }
    );
}

#[tokio::test]
async fn a_listener_stopped_by_itself_should_be_reported_as_stopped() {
    // Arrange
    Lazy::force(&TRACING);
    let mut listeners = BackgroundListeners::<String>::new(CancellationToken::new());
    listeners.spawn("short lived", async { Ok(()) });
    tokio::task::yield_now().await;

    // Act
    let report = listeners.shutdown(Duration::from_millis(100)).await;

    // Assert
    assert_eq!(report.stopped, 1);
}
