use std::sync::Arc;

use common::{
    dtos::process_document_job::{ProcessDocumentJobDto, PROCESS_DOCUMENT_TASK},
    helper::error_chain_fmt,
    messaging::rabbitmq_message_repository::{
        RabbitMQMessageRepository, RabbitMQMessageRepositoryError,
    },
};
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    Connection as RabbitMQConnection, Consumer, ExchangeKind,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::domain::{
    entities::process_outcome::ProcessOutcome,
    services::process_document::{DocumentProcessor, RunRequest},
};

pub const ROUTING_KEY: &str = PROCESS_DOCUMENT_TASK;
const QUEUE_NAME: &str = "process_document";

/// Each consumer only holds one unacknowledged job at a time
const PREFETCH_COUNT: u16 = 1;

#[derive(thiserror::Error)]
pub enum RegisterHandlerProcessDocumentJobError {
    #[error(transparent)]
    RabbitMQError(#[from] lapin::Error),
    #[error(transparent)]
    RabbitMQMessageRepositoryError(#[from] RabbitMQMessageRepositoryError),
}

impl std::fmt::Debug for RegisterHandlerProcessDocumentJobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(thiserror::Error)]
pub enum RunHandlerProcessDocumentJobError {
    #[error("The consumer of queue {0} stopped unexpectedly")]
    ConsumerStopped(String),
}

impl std::fmt::Debug for RunHandlerProcessDocumentJobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

pub fn queue_name(queue_name_prefix: &str) -> String {
    format!("{}_{}", queue_name_prefix, QUEUE_NAME)
}

/// What to do with a delivery once its job was run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryAction {
    /// The run reached a final outcome
    Acknowledge,
    /// Transient failure: publish the next attempt, then acknowledge
    Retry(ProcessDocumentJobDto),
    /// Transient failure on the last allowed attempt
    GiveUp,
}

/// The run asked for by a job
///
/// Only an explicit request re-processes a finished file, a retry only resumes its own failure.
pub fn run_request(job: &ProcessDocumentJobDto) -> RunRequest {
    match (&job.interrupted_by, job.reprocess) {
        (_, true) => RunRequest::Reprocess,
        (Some(interrupted_by), false) => RunRequest::Resume {
            interrupted_by: interrupted_by.clone(),
        },
        (None, false) => RunRequest::Process,
    }
}

/// Only unexpected faults are retried, and at most `max_attempts` dispatches happen per job
pub fn decide_delivery_action(
    outcome: &ProcessOutcome,
    job: &ProcessDocumentJobDto,
    max_attempts: u32,
) -> DeliveryAction {
    let ProcessOutcome::Error { kind, message } = outcome else {
        return DeliveryAction::Acknowledge;
    };

    if !kind.is_retryable() {
        return DeliveryAction::Acknowledge;
    }

    if job.attempt.saturating_add(1) < max_attempts {
        DeliveryAction::Retry(job.next_attempt(message))
    } else {
        DeliveryAction::GiveUp
    }
}

/// A registered consumer of document processing jobs, ready to run
pub struct ProcessDocumentJobHandler {
    consumer: Consumer,
    exchange_name: String,
    queue_name: String,
    // Initialized for this handler only, a channel is not shared between consumers
    message_repository: RabbitMQMessageRepository,
    processor: Arc<DocumentProcessor>,
    max_attempts: u32,
}

/// Registers a consumer of the document processing jobs
///
/// It declares the durable queue and binds it to the given exchange with the task routing key.
/// Every consumer of the worker shares the same queue, each on its own channel,
/// so the jobs are spread between them.
#[tracing::instrument(
    name = "Register message handler",
    skip(rabbitmq_consuming_connection, message_repository, processor)
)]
pub async fn register_handler(
    rabbitmq_consuming_connection: Arc<RabbitMQConnection>,
    exchange_name: String,
    queue_name_prefix: String,
    message_repository: RabbitMQMessageRepository,
    processor: Arc<DocumentProcessor>,
    max_attempts: u32,
) -> Result<ProcessDocumentJobHandler, RegisterHandlerProcessDocumentJobError> {
    let channel = rabbitmq_consuming_connection.create_channel().await?;

    channel
        .exchange_declare(
            &exchange_name,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    let queue_name = queue_name(&queue_name_prefix);

    channel
        .queue_declare(
            &queue_name,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_bind(
            &queue_name,
            &exchange_name,
            ROUTING_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(
        "Declared queue {} on exchange {}, binding on {}",
        queue_name, exchange_name, ROUTING_KEY
    );

    channel
        .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
        .await?;

    let consumer_options = BasicConsumeOptions {
        no_ack: false,
        ..BasicConsumeOptions::default()
    };

    let consumer = channel
        .basic_consume(&queue_name, "", consumer_options, FieldTable::default())
        .await?;

    let message_repository = message_repository.try_init().await?;

    Ok(ProcessDocumentJobHandler {
        consumer,
        exchange_name,
        queue_name,
        message_repository,
        processor,
        max_attempts,
    })
}

impl ProcessDocumentJobHandler {
    /// Handles the jobs one by one until cancelled
    ///
    /// A job being handled is never interrupted: cancellation is only checked between jobs.
    pub async fn run(
        mut self,
        cancel_token: CancellationToken,
    ) -> Result<(), RunHandlerProcessDocumentJobError> {
        info!(
            "📡 Handler consuming from queue {}, bound to {} with {}, waiting for messages ...",
            self.queue_name, self.exchange_name, ROUTING_KEY,
        );

        loop {
            let delivery = tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Handler of queue {} cancelled", self.queue_name);
                    return Ok(());
                }
                delivery = self.consumer.next() => delivery,
            };

            let Some(delivery) = delivery else {
                return Err(RunHandlerProcessDocumentJobError::ConsumerStopped(
                    self.queue_name.clone(),
                ));
            };

            let delivery = match delivery {
                // Carries the delivery alongside its channel
                Ok(delivery) => delivery,
                // Carries the error and is always followed by the end of the stream
                Err(error) => {
                    error!(
                        ?error,
                        "Failed to consume queue message on queue {}", self.queue_name
                    );
                    continue;
                }
            };

            self.handle_delivery(&delivery)
                .instrument(info_span!(
                    "Handling consumed message",
                    routing_key = ROUTING_KEY,
                    exchange = %self.exchange_name,
                    queue = %self.queue_name,
                    message_id = %uuid::Uuid::new_v4(),
                ))
                .await;
        }
    }

    async fn handle_delivery(&self, delivery: &Delivery) {
        let job = match ProcessDocumentJobDto::try_parsing(&delivery.data) {
            Ok(job) => job,
            Err(error) => {
                error!(?error, "Rejecting unreadable process document job message");
                let options = BasicRejectOptions { requeue: false };
                if let Err(error) = delivery.reject(options).await {
                    error!(?error, "Failed to reject process document job message");
                }
                return;
            }
        };

        info!(?job, "Received process document job");
        let outcome = self.processor.run(job.file_id, &run_request(&job)).await;

        match decide_delivery_action(&outcome, &job, self.max_attempts) {
            DeliveryAction::Acknowledge => {}
            DeliveryAction::GiveUp => {
                error!(
                    ?job,
                    max_attempts = self.max_attempts,
                    "Giving up on process document job"
                );
            }
            DeliveryAction::Retry(next_job) => {
                warn!(?next_job, "Publishing the next attempt of the job");

                if let Err(error) = self
                    .message_repository
                    .publish_process_document_job(&next_job)
                    .await
                {
                    error!(?error, "Failed to publish the next attempt of the job");

                    info!(
                        "Not acknowledging message with delivery tag {}",
                        delivery.delivery_tag
                    );
                    let options = BasicNackOptions {
                        requeue: true,
                        ..BasicNackOptions::default()
                    };
                    if let Err(error) = delivery.nack(options).await {
                        error!(?error, "Failed to nack process document job message");
                    }
                    return;
                }
            }
        }

        info!(
            "Acknowledging message with delivery tag {}",
            delivery.delivery_tag
        );
        if let Err(error) = delivery.ack(BasicAckOptions::default()).await {
            error!(?error, "Failed to ack process document job message");
        }
    }
}
