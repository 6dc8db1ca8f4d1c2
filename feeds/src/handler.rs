//! One long-lived WebSocket connection per feed.
//!
//! A handler dials its endpoint, sends the optional initial request and then
//! feeds every message to the interceptor chain. Anything but a conversion
//! failure or a close request ends the session and the handler reconnects
//! after an exponential backoff. Only [`Handler::close`] stops it for good.

use crate::backoff::Backoff;
use crate::config::HandlerConfig;
use crate::interceptor::{Chain, InterceptError};
use crate::metrics_defs::{HANDLER_CONNECTS, HANDLER_RECONNECTS, MESSAGES_RECEIVED, MESSAGES_SKIPPED};
use crate::types::{Feed, FeedId};
use futures::future::BoxFuture;
use futures::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::{self, Message};

const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerState {
    Connecting,
    Streaming,
    Reconnecting,
    Closed,
}

#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error("dial failed: {0}")]
    Dial(tungstenite::Error),
    #[error("no activity within {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(tungstenite::Error),
    #[error("message is not a JSON object: {0}")]
    Decode(String),
    #[error("connection closed by peer")]
    Disconnected,
    #[error(transparent)]
    Intercept(InterceptError),
    #[error("malformed initial request: {0}")]
    MalformedRequest(serde_json::Error),
}

impl HandlerError {
    /// Fatal errors would repeat on every reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HandlerError::MalformedRequest(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            HandlerError::Dial(_) => "dial",
            HandlerError::Timeout(_) => "timeout",
            HandlerError::Transport(_) => "transport",
            HandlerError::Decode(_) => "decode",
            HandlerError::Disconnected => "disconnected",
            HandlerError::Intercept(_) => "intercept",
            HandlerError::MalformedRequest(_) => "malformed_request",
        }
    }
}

pub trait Handler: Send + Sync {
    /// Drives the handler until it is closed (`Ok`) or hits a fatal error.
    fn run(self: Arc<Self>) -> BoxFuture<'static, Result<(), HandlerError>>;

    /// Requests a permanent stop. Aborts any dial, read or backoff sleep in
    /// flight. Idempotent.
    fn close(&self);

    fn state(&self) -> HandlerState;
}

pub trait HandlerFactory: Send + Sync {
    fn create(&self, id: &str, feed: &Feed) -> Arc<dyn Handler>;
}

pub struct FeedHandlerFactory {
    config: HandlerConfig,
    chain: Arc<Chain>,
}

impl FeedHandlerFactory {
    pub fn new(config: HandlerConfig, chain: Arc<Chain>) -> Self {
        FeedHandlerFactory { config, chain }
    }
}

impl HandlerFactory for FeedHandlerFactory {
    fn create(&self, id: &str, feed: &Feed) -> Arc<dyn Handler> {
        Arc::new(FeedHandler::new(
            id,
            feed.initial_request().map(String::from),
            self.config.clone(),
            self.chain.clone(),
        ))
    }
}

pub struct FeedHandler {
    id: FeedId,
    initial_request: Option<String>,
    config: HandlerConfig,
    chain: Arc<Chain>,
    state: Mutex<HandlerState>,
    close_tx: watch::Sender<bool>,
}

async fn closed(rx: &mut watch::Receiver<bool>) {
    // A dropped sender counts as closed as well.
    let _ = rx.wait_for(|closed| *closed).await;
}

impl FeedHandler {
    pub fn new(
        id: &str,
        initial_request: Option<String>,
        config: HandlerConfig,
        chain: Arc<Chain>,
    ) -> Self {
        FeedHandler {
            id: id.to_string(),
            initial_request,
            config,
            chain,
            state: Mutex::new(HandlerState::Connecting),
            close_tx: watch::Sender::new(false),
        }
    }

    fn set_state(&self, state: HandlerState) {
        *self.state.lock() = state;
    }

    async fn run_loop(&self) -> Result<(), HandlerError> {
        let mut close_rx = self.close_tx.subscribe();
        let mut backoff = Backoff::new(self.config.backoff.clone());

        while !*close_rx.borrow() {
            self.set_state(HandlerState::Connecting);

            let cause = match self.session(&mut close_rx, &mut backoff).await {
                Ok(()) => break,
                Err(e) if e.is_fatal() => {
                    self.set_state(HandlerState::Closed);
                    tracing::error!(feed = %self.id, error = %e, "Feed handler failed permanently");
                    return Err(e);
                }
                Err(e) => e,
            };

            self.set_state(HandlerState::Reconnecting);
            let delay = backoff.next_delay();
            counter!(HANDLER_RECONNECTS, "cause" => cause.kind()).increment(1);
            tracing::warn!(
                feed = %self.id,
                error = %cause,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Feed connection lost, reconnecting"
            );

            tokio::select! {
                _ = closed(&mut close_rx) => break,
                _ = sleep(delay) => {}
            }
        }

        self.set_state(HandlerState::Closed);
        tracing::info!(feed = %self.id, "Feed handler closed");
        Ok(())
    }

    /// One connection from dial to failure. `Ok` means a close was requested.
    async fn session(
        &self,
        close_rx: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> Result<(), HandlerError> {
        let read_timeout = self.config.read_timeout();

        let dialed = tokio::select! {
            _ = closed(close_rx) => return Ok(()),
            dialed = timeout(read_timeout, tokio_tungstenite::connect_async(self.id.as_str())) => dialed,
        };
        let (ws, _) = dialed
            .map_err(|_| HandlerError::Timeout(read_timeout))?
            .map_err(HandlerError::Dial)?;
        let (mut write, mut read) = ws.split();

        if let Some(request) = &self.initial_request {
            let payload: Value =
                serde_json::from_str(request).map_err(HandlerError::MalformedRequest)?;
            write
                .send(Message::text(payload.to_string()))
                .await
                .map_err(HandlerError::Transport)?;
        }

        self.set_state(HandlerState::Streaming);
        backoff.reset();
        counter!(HANDLER_CONNECTS).increment(1);
        tracing::info!(feed = %self.id, "Connected to feed");

        loop {
            let next = tokio::select! {
                _ = closed(close_rx) => return self.send_close(&mut write).await,
                next = timeout(read_timeout, read.next()) => next,
            };

            let message = match next {
                Err(_) => return Err(HandlerError::Timeout(read_timeout)),
                Ok(None) => return Err(HandlerError::Disconnected),
                Ok(Some(Err(e))) => return Err(HandlerError::Transport(e)),
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(_) | Message::Binary(_) => {
                    let payload = message.into_data();
                    // A publish may be retrying for a while, close must not wait for it.
                    tokio::select! {
                        _ = closed(close_rx) => return self.send_close(&mut write).await,
                        dispatched = self.dispatch(&payload) => dispatched?,
                    }
                }
                Message::Ping(data) => write
                    .send(Message::Pong(data))
                    .await
                    .map_err(HandlerError::Transport)?,
                Message::Close(_) => return Err(HandlerError::Disconnected),
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn send_close<S>(&self, write: &mut S) -> Result<(), HandlerError>
    where
        S: Sink<Message> + Unpin,
    {
        if timeout(CLOSE_FRAME_TIMEOUT, write.send(Message::Close(None)))
            .await
            .is_err()
        {
            tracing::debug!(feed = %self.id, "Close frame not sent in time");
        }
        Ok(())
    }

    async fn dispatch(&self, payload: &[u8]) -> Result<(), HandlerError> {
        counter!(MESSAGES_RECEIVED).increment(1);

        let raw: Map<String, Value> =
            serde_json::from_slice(payload).map_err(|e| HandlerError::Decode(e.to_string()))?;

        match self.chain.handle(&self.id, &raw).await {
            Ok(_) => Ok(()),
            Err(InterceptError::Conversion(e)) => {
                counter!(MESSAGES_SKIPPED).increment(1);
                tracing::debug!(feed = %self.id, failures = e.failures.len(), "Skipped message");
                Ok(())
            }
            Err(e) => Err(HandlerError::Intercept(e)),
        }
    }
}

impl Handler for FeedHandler {
    fn run(self: Arc<Self>) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(async move { self.run_loop().await })
    }

    fn close(&self) {
        self.close_tx.send_replace(true);
    }

    fn state(&self) -> HandlerState {
        *self.state.lock()
    }
}
