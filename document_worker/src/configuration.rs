use std::{path::PathBuf, time::Duration};

use lapin::ConnectionProperties;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_aux::field_attributes::{
    deserialize_number_from_string, deserialize_option_number_from_string,
};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub worker: WorkerSettings,
    pub database: DatabaseSettings,
    pub object_storage: ObjectStorageSettings,
    pub rabbitmq: RabbitMQSettings,
    #[serde(default)]
    pub conversion: ConversionSettings,
    #[serde(default)]
    pub reconciler: ReconcilerSettings,
    pub ai: AiSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub name: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    /// Number of jobs processed concurrently, one RabbitMQ consumer each
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub nb_consumers: u16,
    /// Maximum number of dispatches of a job failing on transient errors
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_attempts: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub shutdown_grace_period_secs: u64,
}

impl WorkerSettings {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub require_ssl: bool,
    /// Runs the embedded migrations when the worker starts
    #[serde(default)]
    pub run_migrations: bool,
}

impl DatabaseSettings {
    pub fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
    }

    pub fn with_db(&self) -> PgConnectOptions {
        self.without_db().database(&self.database_name)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ObjectStorageSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub region: String,
    /// A bucket for each environment
    pub bucket_name: String,
}

impl ObjectStorageSettings {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RabbitMQSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    /// Useful to create parallel exchanges during tests for example.
    pub exchange_name_prefix: String,
    /// Useful to create parallel queues during tests for example.
    pub queue_name_prefix: String,
    pub documents_exchange: String,
}

impl RabbitMQSettings {
    pub fn get_uri(&self) -> String {
        format!("amqp://{}:{}", &self.host, &self.port)
    }

    pub fn documents_exchange_name(&self) -> String {
        format!("{}_{}", self.exchange_name_prefix, self.documents_exchange)
    }

    pub fn get_connection_properties(&self) -> ConnectionProperties {
        ConnectionProperties::default()
            // Use tokio executor and reactor.
            // At the moment the reactor is only available for unix.
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConversionSettings {
    /// Where downloaded files are staged before conversion, the system temp dir if unset
    pub scratch_directory: Option<String>,
}

impl ConversionSettings {
    pub fn scratch_directory(&self) -> PathBuf {
        match &self.scratch_directory {
            Some(directory) if !directory.trim().is_empty() => PathBuf::from(directory),
            _ => std::env::temp_dir(),
        }
    }
}

/// Sweep of files stuck in `processing`, disabled unless both durations are set
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReconcilerSettings {
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub stale_after_secs: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub sweep_interval_secs: Option<u64>,
}

impl ReconcilerSettings {
    /// Returns `(stale_after, sweep_interval)` when the sweeper is enabled
    pub fn schedule(&self) -> Option<(Duration, Duration)> {
        match (self.stale_after_secs, self.sweep_interval_secs) {
            (Some(stale_after), Some(interval)) if stale_after > 0 && interval > 0 => Some((
                Duration::from_secs(stale_after),
                Duration::from_secs(interval),
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiSettings {
    pub api_key: Secret<String>,
}

/// Extracts app settings from configuration files and env variables
///
/// `base.yaml` should contain shared settings for all environments.
/// A specific env file should be created for each environment: `develop.yaml`,`local.yaml` and `production.yaml`
/// The environment is set with the env var `APP_ENVIRONMENT`.
/// If `APP_ENVIRONMENT` is not set, `develop.yaml` is the default.
///
/// Settings are also taken from environment variables: with a prefix of APP and '__' as separator
/// For ex: `APP_WORKER__NB_CONSUMERS=4` would set `Settings.worker.nb_consumers`
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("No current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    // Defaults to `develop` if unspecified.
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "develop".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(environment_filename),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

/// The possible runtime environment for our application.
#[derive(Debug, PartialEq, Eq)]
pub enum Environment {
    Develop,
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Develop => "develop",
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "develop" => Ok(Self::Develop),
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `develop`, `local` or `production`.",
                other
            )),
        }
    }
}
