use crate::event::CanonicalEvent;
use crate::handler::{Handler, HandlerError, HandlerFactory, HandlerState};
use crate::publisher::{PublishError, Publisher};
use crate::types::{Feed, FeedId};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Debug)]
pub struct Published {
    pub event: CanonicalEvent,
    pub group_id: String,
    pub user_id: String,
}

/// Accepts everything except user ids `fail` and `noack`.
#[derive(Default)]
pub struct MockPublisher {
    published: Mutex<Vec<Published>>,
}

impl MockPublisher {
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn write(
        &self,
        event: &CanonicalEvent,
        group_id: &str,
        user_id: &str,
    ) -> Result<(), PublishError> {
        match user_id {
            "fail" => Err(PublishError::Failed("fail".into())),
            "noack" => Err(PublishError::NoAck {
                attempts: 1,
                status: StatusCode::SERVICE_UNAVAILABLE,
            }),
            _ => {
                self.published.lock().push(Published {
                    event: event.clone(),
                    group_id: group_id.into(),
                    user_id: user_id.into(),
                });
                Ok(())
            }
        }
    }
}

/// Local WebSocket feed. Every connection receives `messages` in order and
/// is then closed by the server when `close_after` is set, or held open.
pub struct TestFeedServer {
    pub url: String,
    connections: Arc<AtomicUsize>,
    received: mpsc::UnboundedReceiver<String>,
    task: JoinHandle<()>,
}

impl TestFeedServer {
    pub async fn spawn(messages: Vec<String>, close_after: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let (tx, received) = mpsc::unbounded_channel();

        let counter = connections.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let (mut write, mut read) = ws.split();
                let messages = messages.clone();
                let tx = tx.clone();

                tokio::spawn(async move {
                    while let Some(Ok(msg)) = read.next().await {
                        if let Message::Text(text) = msg {
                            let _ = tx.send(text.as_str().to_owned());
                        }
                    }
                });
                tokio::spawn(async move {
                    for m in messages {
                        if write.send(Message::text(m)).await.is_err() {
                            return;
                        }
                    }
                    if close_after {
                        let _ = write.send(Message::Close(None)).await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                });
            }
        });

        TestFeedServer {
            url,
            connections,
            received,
            task,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Next text frame sent by a client.
    pub async fn next_received(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for TestFeedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Runs until closed. Feeds whose id contains `fatal` fail right away.
pub struct MockHandler {
    fatal: bool,
    state: Mutex<HandlerState>,
    close_tx: watch::Sender<bool>,
}

impl Handler for MockHandler {
    fn run(self: Arc<Self>) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(async move {
            if self.fatal {
                *self.state.lock() = HandlerState::Closed;
                let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
                return Err(HandlerError::MalformedRequest(err));
            }
            *self.state.lock() = HandlerState::Streaming;
            let mut rx = self.close_tx.subscribe();
            let _ = rx.wait_for(|closed| *closed).await;
            *self.state.lock() = HandlerState::Closed;
            Ok(())
        })
    }

    fn close(&self) {
        self.close_tx.send_replace(true);
    }

    fn state(&self) -> HandlerState {
        *self.state.lock()
    }
}

#[derive(Default)]
pub struct MockHandlerFactory {
    created: Mutex<Vec<(FeedId, Arc<MockHandler>)>>,
}

impl MockHandlerFactory {
    pub fn created_ids(&self) -> Vec<FeedId> {
        self.created.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    /// The most recently created handler for `id`.
    pub fn handler(&self, id: &str) -> Option<Arc<MockHandler>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|(created, _)| created == id)
            .map(|(_, handler)| handler.clone())
    }
}

impl HandlerFactory for MockHandlerFactory {
    fn create(&self, id: &str, _feed: &Feed) -> Arc<dyn Handler> {
        let handler = Arc::new(MockHandler {
            fatal: id.contains("fatal"),
            state: Mutex::new(HandlerState::Connecting),
            close_tx: watch::Sender::new(false),
        });
        self.created.lock().push((id.to_string(), handler.clone()));
        handler
    }
}
