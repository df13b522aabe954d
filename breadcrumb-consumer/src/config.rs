use std::str::FromStr;
use std::time;

use breadcrumb_common::pairing::{AnchorPolicy, DEFAULT_MAX_SPEED};
use breadcrumb_common::retry::ReconnectPolicy;
use breadcrumb_common::rows::NullRowPolicy;
use breadcrumb_common::writer::WriterConfig;
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "10")]
    pub idle_timeout_secs: u64,

    #[envconfig(default = "1000")]
    pub idle_poll_interval: EnvMsDuration,

    #[envconfig(default = "500")]
    pub flush_threshold: usize,

    #[envconfig(default = "45.0")]
    pub max_speed: f64,

    #[envconfig(default = "true")]
    pub drop_null_rows: bool,

    #[envconfig(default = "preserve")]
    pub anchor_on_reject: AnchorPolicy,

    // Stage records that failed validation as well, like the earliest loader did.
    #[envconfig(default = "false")]
    pub persist_invalid: bool,

    #[envconfig(nested = true)]
    pub reconnect: ReconnectConfig,

    #[envconfig(default = "false")]
    pub dry_run: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> time::Duration {
        time::Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            flush_threshold: self.flush_threshold,
            null_rows: NullRowPolicy::from_drop_flag(self.drop_null_rows),
            reconnect: self.reconnect.policy(),
        }
    }

    /// Speed ceiling, falling back to the default for non-positive or non-finite values.
    pub fn max_speed(&self) -> f64 {
        if self.max_speed.is_finite() && self.max_speed > 0.0 {
            self.max_speed
        } else {
            DEFAULT_MAX_SPEED
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct DatabaseConfig {
    /// Takes precedence over the split connection parameters below.
    pub database_url: Option<String>,

    #[envconfig(from = "DB_NAME", default = "trimet")]
    pub name: String,

    #[envconfig(from = "DB_USER", default = "postgres")]
    pub user: String,

    #[envconfig(from = "DB_PASSWORD", default = "123456")]
    pub password: String,

    #[envconfig(from = "DB_HOST", default = "localhost")]
    pub host: String,

    #[envconfig(from = "DB_PORT", default = "5432")]
    pub port: u16,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        match &self.database_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.name
            ),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "breadcrumbs")]
    pub kafka_topic: NonEmptyString,

    #[envconfig(default = "breadcrumb-consumer")]
    pub kafka_consumer_group: NonEmptyString,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest
}

#[derive(Envconfig, Clone)]
pub struct ReconnectConfig {
    #[envconfig(from = "RECONNECT_ATTEMPTS", default = "5")]
    pub attempts: u32,

    #[envconfig(from = "RECONNECT_INTERVAL", default = "1000")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(from = "RECONNECT_MAXIMUM_INTERVAL", default = "30000")]
    pub maximum_interval: EnvMsDuration,
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.attempts.max(1),
            2,
            self.initial_interval.0,
            Some(self.maximum_interval.0),
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
