use crate::event::DEFAULT_EVENT_TYPE;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for `publisher.retries`, the last retry already waits
/// `base_delay * 2^9`.
pub const MAX_PUBLISH_RETRIES: u32 = 10;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("{0} port must not be 0")]
    InvalidPort(&'static str),
    #[error("publisher.group_id must not be empty")]
    EmptyGroupId,
    #[error("publisher.url must not be empty")]
    EmptyPublisherUrl,
    #[error("publisher.retries must not exceed {MAX_PUBLISH_RETRIES}")]
    TooManyRetries,
    #[error("handler.read_timeout_secs must be greater than 0")]
    ZeroReadTimeout,
    #[error("handler.backoff.initial_delay_ms must be greater than 0")]
    ZeroInitialDelay,
    #[error("handler.backoff.multiplier must be at least 1")]
    InvalidMultiplier,
    #[error("handler.backoff.initial_delay_ms must not exceed max_delay_ms")]
    InvalidDelays,
    #[error("handler.backoff.jitter must be between 0 and 1")]
    InvalidJitter,
    #[error("replica index could not be derived from name {0:?}")]
    InvalidReplicaName(String),
    #[error("either replica.index or replica.name must be set")]
    MissingReplica,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    fn with_port(port: u16) -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port,
        }
    }

    fn default_api() -> Self {
        Self::with_port(8080)
    }

    fn default_admin() -> Self {
        Self::with_port(8081)
    }
}

/// Identity of this process within the fleet. The index is either given
/// directly or taken from the numeric suffix of a name like `wsfeed-2`.
#[derive(Clone, Deserialize, Debug, Default, PartialEq)]
pub struct Replica {
    pub index: Option<u32>,
    pub name: Option<String>,
}

impl Replica {
    pub fn resolve_index(&self) -> Result<u32, ValidationError> {
        if let Some(index) = self.index {
            return Ok(index);
        }
        let name = self.name.as_deref().ok_or(ValidationError::MissingReplica)?;
        name.rsplit('-')
            .next()
            .and_then(|suffix| suffix.parse().ok())
            .ok_or_else(|| ValidationError::InvalidReplicaName(name.to_string()))
    }
}

#[derive(Clone, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StorageConfig {
    #[default]
    Memory,
    Filesystem { path: PathBuf },
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct PublisherConfig {
    /// Base URL of the publish API, `/events` is appended.
    pub url: String,
    pub group_id: String,
    pub user_agent: String,
    pub retries: u32,
    pub base_delay_ms: Option<u64>,
    pub timeout_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            url: String::new(),
            group_id: "default".into(),
            user_agent: "Awakari".into(),
            retries: 3,
            base_delay_ms: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct EventsConfig {
    #[serde(default = "default_event_type")]
    pub r#type: String,
}

fn default_event_type() -> String {
    DEFAULT_EVENT_TYPE.into()
}

impl Default for EventsConfig {
    fn default() -> Self {
        EventsConfig {
            r#type: default_event_type(),
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay added or subtracted at random.
    pub jitter: f64,
}

impl BackoffConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct HandlerConfig {
    pub read_timeout_secs: u64,
    pub backoff: BackoffConfig,
}

impl HandlerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig {
            read_timeout_secs: 60,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Messages whose top-level `field` equals `value` are dropped before
/// conversion, e.g. heartbeats or subscription confirmations.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct DropRule {
    pub field: String,
    pub value: serde_json::Value,
}

#[derive(Clone, Deserialize, Debug, Default, PartialEq)]
pub struct InterceptorsConfig {
    #[serde(default)]
    pub drop: Vec<DropRule>,
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default = "Listener::default_api")]
    pub listener: Listener,
    #[serde(default = "Listener::default_admin")]
    pub admin_listener: Listener,
    #[serde(default)]
    pub replica: Replica,
    #[serde(default)]
    pub storage: StorageConfig,
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub handler: HandlerConfig,
    #[serde(default)]
    pub interceptors: InterceptorsConfig,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.listener.port == 0 {
            return Err(ValidationError::InvalidPort("listener"));
        }
        if self.admin_listener.port == 0 {
            return Err(ValidationError::InvalidPort("admin_listener"));
        }
        if self.publisher.url.is_empty() {
            return Err(ValidationError::EmptyPublisherUrl);
        }
        if self.publisher.group_id.is_empty() {
            return Err(ValidationError::EmptyGroupId);
        }
        if self.publisher.retries > MAX_PUBLISH_RETRIES {
            return Err(ValidationError::TooManyRetries);
        }
        if self.handler.read_timeout_secs == 0 {
            return Err(ValidationError::ZeroReadTimeout);
        }
        let backoff = &self.handler.backoff;
        if backoff.initial_delay_ms == 0 {
            return Err(ValidationError::ZeroInitialDelay);
        }
        if backoff.multiplier < 1.0 {
            return Err(ValidationError::InvalidMultiplier);
        }
        if backoff.initial_delay_ms > backoff.max_delay_ms {
            return Err(ValidationError::InvalidDelays);
        }
        if !(0.0..=1.0).contains(&backoff.jitter) {
            return Err(ValidationError::InvalidJitter);
        }
        self.replica.resolve_index()?;
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
