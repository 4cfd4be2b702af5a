use std::sync::Arc;

use chrono::Utc;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions},
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ExchangeKind,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    dtos::process_document_job::{ProcessDocumentJobDto, PROCESS_DOCUMENT_TASK},
    helper::error_chain_fmt,
};

/// AMQP delivery mode of messages that survive a broker restart
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Message repository implemented with RabbitMQ
///
/// Publishes messages to a given topic exchange.
///
/// The enum gatekeeps publishing while the repository is not initialized: a channel must
/// not be shared between threads, so each thread clones the idle repository and calls `try_init`.
pub enum RabbitMQMessageRepository {
    Ready {
        connection: Arc<Connection>,
        channel: Channel,
        exchange_name: String,
    },
    Idle {
        connection: Arc<Connection>,
        exchange_name: String,
    },
}

/// Only clones the connection and the exchange name, the clone is idle
impl Clone for RabbitMQMessageRepository {
    fn clone(&self) -> Self {
        match self {
            Self::Idle {
                connection,
                exchange_name,
            }
            | Self::Ready {
                connection,
                exchange_name,
                ..
            } => Self::Idle {
                connection: connection.clone(),
                exchange_name: exchange_name.clone(),
            },
        }
    }
}

impl RabbitMQMessageRepository {
    /// Builds an idle repository, no channel is created and no exchange is declared yet
    pub fn new(connection: Arc<Connection>, exchange_name: &str) -> Self {
        Self::Idle {
            connection,
            exchange_name: exchange_name.to_string(),
        }
    }

    /// Creates the channel of the repository and declares its durable topic exchange
    ///
    /// Publisher confirms are enabled on the channel: each publication waits for the broker ack.
    /// Declaring the exchange is idempotent, consumers declare it too.
    #[tracing::instrument(name = "Initializing RabbitMQMessageRepository", skip(self))]
    pub async fn try_init(self) -> Result<Self, RabbitMQMessageRepositoryError> {
        match self {
            Self::Ready { .. } => {
                info!("Already initialized");
                Ok(self)
            }

            Self::Idle {
                connection,
                exchange_name,
            } => {
                let channel = connection.create_channel().await?;
                channel
                    .confirm_select(ConfirmSelectOptions::default())
                    .await?;

                let exchange_declare_options = ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                };

                channel
                    .exchange_declare(
                        exchange_name.as_str(),
                        ExchangeKind::Topic,
                        exchange_declare_options,
                        FieldTable::default(),
                    )
                    .await?;

                info!(
                    "Successfully declared exchange {} with properties: {:?}",
                    exchange_name, exchange_declare_options
                );

                Ok(Self::Ready {
                    connection,
                    channel,
                    exchange_name,
                })
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Publishes a persistent message with a given routing key
    ///
    /// Waits for the broker confirmation of the publication: a nack is an error.
    #[tracing::instrument(name = "Publishing message", skip(self, data))]
    pub async fn publish(
        &self,
        routing_key: &str,
        data: &[u8],
    ) -> Result<(), RabbitMQMessageRepositoryError> {
        let Self::Ready {
            channel,
            exchange_name,
            ..
        } = self
        else {
            return Err(RabbitMQMessageRepositoryError::NotInitialized(
                "Cannot publish message, repository is not initialized".to_string(),
            ));
        };

        let current_time_ms = Utc::now().timestamp_millis() as u64;

        let confirmation = channel
            .basic_publish(
                exchange_name,
                routing_key,
                BasicPublishOptions::default(),
                data,
                BasicProperties::default()
                    .with_timestamp(current_time_ms)
                    .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
                    .with_content_type("application/json".to_string().into())
                    .with_message_id(Uuid::new_v4().to_string().into()),
            )
            .await?
            .await?;

        check_confirmation(confirmation)
    }

    /// Enqueues a document processing job by file id
    #[tracing::instrument(name = "Publishing process document job", skip(self))]
    pub async fn publish_process_document_job(
        &self,
        job: &ProcessDocumentJobDto,
    ) -> Result<(), RabbitMQMessageRepositoryError> {
        let data = serde_json::to_vec(job)?;

        self.publish(PROCESS_DOCUMENT_TASK, &data).await
    }
}

fn check_confirmation(confirmation: Confirmation) -> Result<(), RabbitMQMessageRepositoryError> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(RabbitMQMessageRepositoryError::NotConfirmed(
            "The broker refused the message".to_string(),
        )),
        Confirmation::NotRequested => Err(RabbitMQMessageRepositoryError::NotConfirmed(
            "Publisher confirms are not enabled on the channel".to_string(),
        )),
    }
}

#[derive(thiserror::Error)]
pub enum RabbitMQMessageRepositoryError {
    #[error(transparent)]
    RabbitMQError(#[from] lapin::Error),
    #[error("Error while serializing the message data: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("{0}")]
    NotInitialized(String),
    #[error("Message not confirmed: {0}")]
    NotConfirmed(String),
}

impl std::fmt::Debug for RabbitMQMessageRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
