use std::{sync::Arc, time::Duration};

use common::{
    helper::error_chain_fmt, messaging::rabbitmq_message_repository::RabbitMQMessageRepository,
};
use futures::{FutureExt, TryFutureExt};
use lapin::Connection as RabbitMQConnection;
use s3::{creds::Credentials, Bucket, BucketConfiguration, Region};
use secrecy::ExposeSecret;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    adapters::pdf_document_converter::PdfDocumentConverter,
    ai_client::{GenerativeAiClient, GenerativeAiClientError},
    configuration::{DatabaseSettings, ObjectStorageSettings, RabbitMQSettings, Settings},
    domain::services::process_document::DocumentProcessor,
    handlers::{
        handler_process_document_job::{
            self, RegisterHandlerProcessDocumentJobError, RunHandlerProcessDocumentJobError,
        },
        stale_files_sweeper,
    },
    ports::file_repository::FileRepository,
    repositories::{
        file_postgres_repository::FilePostgresRepository,
        object_store_s3_repository::ObjectStoreS3Repository,
    },
    supervisor::BackgroundListeners,
};

/// Holds the connections of the worker and its running background listeners
pub struct Application {
    // Closed once the listeners are stopped
    rabbitmq_publishing_connection: Arc<RabbitMQConnection>,
    db_pool: PgPool,

    ai_client: GenerativeAiClient,

    listeners: BackgroundListeners<ApplicationError>,
    shutdown_grace_period: Duration,
}

impl Application {
    /// Connects to every store and starts the background listeners
    ///
    /// Fails as soon as one of them can't be set up: no listener is started in that case.
    #[tracing::instrument(name = "Building worker application", skip(settings))]
    pub async fn build(settings: Settings) -> Result<Self, ApplicationError> {
        let ai_client = GenerativeAiClient::try_new(&settings.ai)?;

        let db_pool = get_connection_pool(&settings.database);
        if settings.database.run_migrations {
            info!("Running database migrations");
            sqlx::migrate!("./migrations").run(&db_pool).await?;
        }

        let s3_bucket = set_up_s3(&settings.object_storage).await?;

        // One connection for consuming messages, one for publishing messages
        let rabbitmq_consuming_connection =
            Arc::new(get_rabbitmq_connection(&settings.rabbitmq).await?);
        let rabbitmq_publishing_connection =
            Arc::new(get_rabbitmq_connection(&settings.rabbitmq).await?);

        let rabbitmq_documents_exchange_name = settings.rabbitmq.documents_exchange_name();

        let message_repository = RabbitMQMessageRepository::new(
            rabbitmq_publishing_connection.clone(),
            &rabbitmq_documents_exchange_name,
        );

        let file_repository: Arc<dyn FileRepository> =
            Arc::new(FilePostgresRepository::new(db_pool.clone()));

        // Shared by every consumer
        let processor = Arc::new(DocumentProcessor::new(
            file_repository.clone(),
            Arc::new(ObjectStoreS3Repository::new(s3_bucket)),
            Arc::new(PdfDocumentConverter::new()),
            settings.conversion.scratch_directory(),
        ));

        // Registers every consumer before starting any
        let mut handlers = vec![];
        for _ in 0..settings.worker.nb_consumers.max(1) {
            let handler = handler_process_document_job::register_handler(
                rabbitmq_consuming_connection.clone(),
                rabbitmq_documents_exchange_name.clone(),
                settings.rabbitmq.queue_name_prefix.clone(),
                message_repository.clone(),
                processor.clone(),
                settings.worker.max_attempts,
            )
            .await?;

            handlers.push(handler);
        }

        let mut listeners: BackgroundListeners<ApplicationError> =
            BackgroundListeners::new(CancellationToken::new());

        for (index, handler) in handlers.into_iter().enumerate() {
            let cancel_token = listeners.cancel_token();
            listeners.spawn(
                format!("process document consumer {}", index),
                handler.run(cancel_token).map_err(ApplicationError::from),
            );
        }

        match settings.reconciler.schedule() {
            Some((stale_after, sweep_interval)) => {
                let cancel_token = listeners.cancel_token();
                listeners.spawn(
                    "stale files sweeper",
                    stale_files_sweeper::run_sweeper(
                        file_repository,
                        stale_after,
                        sweep_interval,
                        cancel_token,
                    )
                    .map(Ok),
                );
            }
            None => info!("Stale files sweeper disabled"),
        }

        info!("🦄 {} background listeners started", listeners.len());

        Ok(Self {
            rabbitmq_publishing_connection,
            db_pool,
            ai_client,
            listeners,
            shutdown_grace_period: settings.worker.shutdown_grace_period(),
        })
    }

    /// Runs the application until a shutdown signal (Ctrl-C, SIGTERM) or until cancelled
    ///
    /// The background listeners are then stopped, waiting at most the shutdown grace period.
    ///
    /// # Parameters
    /// - `cancel_token`: to stop the application without a signal
    pub async fn run_until_stopped(
        self,
        cancel_token: CancellationToken,
    ) -> Result<(), ApplicationError> {
        info!("📡 running until stopped");

        tokio::select! {
            _ = shutdown_signal() => info!("Shutdown signal received"),
            _ = cancel_token.cancelled() => info!("Application cancelled"),
        }

        let report = self.listeners.shutdown(self.shutdown_grace_period).await;
        info!(?report, "Background listeners stopped");

        if let Err(error) = self
            .rabbitmq_publishing_connection
            .close(200, "Worker stopped")
            .await
        {
            error!(?error, "Failed to close the RabbitMQ publishing connection");
        }
        self.db_pool.close().await;

        info!("👋 Bye!");
        Ok(())
    }

    pub fn ai_client(&self) -> &GenerativeAiClient {
        &self.ai_client
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(?error, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(?error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Create a connection to RabbitMQ
pub async fn get_rabbitmq_connection(
    config: &RabbitMQSettings,
) -> Result<RabbitMQConnection, lapin::Error> {
    RabbitMQConnection::connect(&config.get_uri(), config.get_connection_properties()).await
}

/// Lazy pool: connections are only opened on the first query
pub fn get_connection_pool(settings: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(settings.with_db())
}

/// Sets up the S3 object storage
///
/// Each environment will use 1 bucket.
/// This bucket is created if it does not exist yet.
///
/// # Returns
/// An initialized bucket
#[tracing::instrument(name = "Setting up S3 object store")]
pub async fn set_up_s3(settings: &ObjectStorageSettings) -> Result<Bucket, ApplicationError> {
    let region = Region::Custom {
        region: settings.region.to_owned(),
        endpoint: settings.endpoint(),
    };

    let credentials = Credentials::new(
        Some(&settings.username),
        Some(settings.password.expose_secret()),
        None,
        None,
        None,
    )?;

    let bucket =
        Bucket::new(&settings.bucket_name, region.clone(), credentials.clone())?.with_path_style();

    // Only a missing bucket (404) is created, any other error stops the setup
    if let Err(error) = bucket.head_object("/").await {
        match error {
            s3::error::S3Error::Http(404, _) => {}
            _ => return Err(ApplicationError::S3Error(error)),
        }

        info!(
            "🪣 Unknown bucket {}, creating it ...",
            settings.bucket_name
        );

        Bucket::create_with_path_style(
            &settings.bucket_name,
            region,
            credentials,
            BucketConfiguration::default(),
        )
        .await?;
    }

    info!(
        "🪣 Bucket {} has been correctly instantiated",
        settings.bucket_name
    );
    Ok(bucket)
}

#[derive(thiserror::Error)]
pub enum ApplicationError {
    #[error(transparent)]
    AiClientError(#[from] GenerativeAiClientError),
    #[error("S3 credentials error: {0}")]
    S3CredentialsError(#[from] s3::creds::error::CredentialsError),
    #[error(transparent)]
    S3Error(#[from] s3::error::S3Error),
    #[error("Database migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    RabbitMQError(#[from] lapin::Error),
    #[error(transparent)]
    RegisterHandlerError(#[from] RegisterHandlerProcessDocumentJobError),
    #[error(transparent)]
    RunHandlerError(#[from] RunHandlerProcessDocumentJobError),
}

impl std::fmt::Debug for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
