const BASE_DELAY: u64 = 500;

use crate::config::PublisherConfig;
use crate::event::CanonicalEvent;
use crate::metrics_defs::{EVENTS_PUBLISHED, PUBLISH_DURATION};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use shared::{counter, histogram};
use std::time::Instant;
use tokio::time::{Duration, sleep};

pub const GROUP_ID_HEADER: &str = "X-Awakari-Group-Id";
pub const USER_ID_HEADER: &str = "X-Awakari-User-Id";

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("event not acknowledged after {attempts} attempts, last status {status}")]
    NoAck { attempts: u32, status: StatusCode },
    #[error("publish failed: {0}")]
    Failed(String),
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        PublishError::Failed(err.to_string())
    }
}

/// Delivers canonical events downstream. Implementations retry transient
/// failures themselves.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn write(
        &self,
        event: &CanonicalEvent,
        group_id: &str,
        user_id: &str,
    ) -> Result<(), PublishError>;
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    events: [&'a CanonicalEvent; 1],
}

pub struct HttpPublisher {
    client: reqwest::Client,
    full_url: String,
    retries: u32,
    base_delay: Duration,
}

impl HttpPublisher {
    pub fn new(config: &PublisherConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(HttpPublisher {
            client,
            full_url: format!("{}/{}", config.url.trim_end_matches('/'), "events"),
            retries: config.retries,
            base_delay: Duration::from_millis(config.base_delay_ms.unwrap_or(BASE_DELAY)),
        })
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn write(
        &self,
        event: &CanonicalEvent,
        group_id: &str,
        user_id: &str,
    ) -> Result<(), PublishError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let body = PublishRequest { events: [event] };
        let start = Instant::now();
        let mut retries = 0;

        loop {
            let response = self
                .client
                .post(&self.full_url)
                .header(GROUP_ID_HEADER, group_id)
                .header(USER_ID_HEADER, user_id)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                counter!(EVENTS_PUBLISHED).increment(1);
                histogram!(PUBLISH_DURATION).record(start.elapsed().as_secs_f64());
                return Ok(());
            }

            if !RETRIABLE_STATUS_CODES.contains(&status) {
                return Err(PublishError::Failed(format!(
                    "publish API responded with {status}"
                )));
            }

            if retries >= self.retries {
                return Err(PublishError::NoAck {
                    attempts: retries + 1,
                    status,
                });
            }

            // Backoff between retries
            let delay = self.base_delay.saturating_mul(2_u32.saturating_pow(retries));
            tracing::warn!(
                event_id = %event.id,
                %status,
                retry = retries + 1,
                delay_ms = delay.as_millis() as u64,
                "Publish not acknowledged, retrying"
            );
            sleep(delay).await;
            retries += 1;
        }
    }
}
