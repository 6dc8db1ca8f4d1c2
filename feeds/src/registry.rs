//! The set of feed handlers running on this replica.
//!
//! Every registration is persisted with the index of the replica that
//! created it, and only that replica ever runs its handler. A handler task
//! removes its own entry when it exits; entries carry a generation number so
//! a late exit never removes a newer handler for the same feed.

use crate::errors::{Result, ServiceError};
use crate::handler::{Handler, HandlerError, HandlerFactory, HandlerState};
use crate::metrics_defs::{HANDLERS_ACTIVE, RESUME_DURATION};
use crate::storage::{Storage, StorageError};
use crate::types::{Feed, FeedId, Filter, Order};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shared::{gauge, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

const RESUME_PAGE_SIZE: u32 = 100;

/// A handler that stopped on an error it cannot recover from.
#[derive(Debug)]
pub struct FatalHandlerError {
    pub id: FeedId,
    pub error: HandlerError,
}

struct Entry {
    handler: Arc<dyn Handler>,
    feed: Feed,
    generation: u64,
    task: JoinHandle<()>,
}

type Entries = Arc<Mutex<HashMap<FeedId, Entry>>>;

pub struct Registry {
    replica: u32,
    storage: Arc<dyn Storage>,
    factory: Arc<dyn HandlerFactory>,
    entries: Entries,
    /// Held across a storage write and the matching map update so register,
    /// unregister and resume never interleave.
    lifecycle: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    fatal_tx: mpsc::UnboundedSender<FatalHandlerError>,
}

impl Registry {
    /// The receiver yields handlers that failed permanently.
    pub fn new(
        replica: u32,
        storage: Arc<dyn Storage>,
        factory: Arc<dyn HandlerFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<FatalHandlerError>) {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let registry = Registry {
            replica,
            storage,
            factory,
            entries: Arc::new(Mutex::new(HashMap::new())),
            lifecycle: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            fatal_tx,
        };
        (registry, fatal_rx)
    }

    pub fn replica(&self) -> u32 {
        self.replica
    }

    pub async fn register(
        &self,
        id: &str,
        auth: &str,
        group_id: &str,
        user_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        validate_id(id)?;
        if group_id.is_empty() || user_id.is_empty() {
            return Err(ServiceError::InvalidInput(
                "group_id and user_id are required".into(),
            ));
        }

        let feed = Feed {
            auth: auth.to_string(),
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            created_at,
            replica: self.replica,
        };
        if let Some(request) = feed.initial_request() {
            serde_json::from_str::<serde_json::Value>(request).map_err(|e| {
                ServiceError::InvalidInput(format!("auth is not a JSON document: {e}"))
            })?;
        }

        let _lifecycle = self.lifecycle.lock().await;
        self.storage.create(id, &feed).await?;
        self.start(id, feed);
        Ok(())
    }

    pub async fn unregister(&self, id: &str, group_id: &str, user_id: &str) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.storage.delete(id, group_id, user_id).await?;

        // The handler may live on another replica, which is fine.
        let removed = {
            let mut entries = self.entries.lock();
            let removed = entries.remove(id);
            gauge!(HANDLERS_ACTIVE).set(entries.len() as f64);
            removed
        };
        if let Some(entry) = removed {
            entry.handler.close();
            tracing::info!(feed = id, "Feed unregistered, handler closed");
        }
        Ok(())
    }

    /// Starts a handler for every stored feed owned by this replica and
    /// returns how many were started. Never writes to storage.
    pub async fn resume(&self) -> Result<usize> {
        let start = Instant::now();
        let mut cursor = String::new();
        let mut started = 0;

        loop {
            let ids = self
                .storage
                .list(RESUME_PAGE_SIZE, &Filter::default(), Order::Asc, &cursor)
                .await?;
            let Some(last) = ids.last() else {
                break;
            };
            cursor = last.clone();

            for id in &ids {
                let _lifecycle = self.lifecycle.lock().await;
                let feed = match self.storage.read(id).await {
                    Ok(feed) => feed,
                    // Deleted since the page was listed
                    Err(StorageError::NotFound(_)) => continue,
                    Err(e) => return Err(e.into()),
                };
                if feed.replica == self.replica && self.start(id, feed) {
                    started += 1;
                }
            }

            if ids.len() < RESUME_PAGE_SIZE as usize {
                break;
            }
        }

        histogram!(RESUME_DURATION).record(start.elapsed().as_secs_f64());
        tracing::info!(replica = self.replica, started, "Resumed feed handlers");
        Ok(started)
    }

    pub async fn lookup(&self, id: &str) -> Result<Feed> {
        Ok(self.storage.read(id).await?)
    }

    pub async fn list(
        &self,
        limit: u32,
        filter: &Filter,
        order: Order,
        cursor: &str,
    ) -> Result<Vec<FeedId>> {
        Ok(self.storage.list(limit, filter, order, cursor).await?)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self, id: &str) -> Option<HandlerState> {
        self.entries.lock().get(id).map(|entry| entry.handler.state())
    }

    /// The registration a running handler was started from.
    pub fn running_feed(&self, id: &str) -> Option<Feed> {
        self.entries.lock().get(id).map(|entry| entry.feed.clone())
    }

    /// Closes every handler and waits for their tasks, at most `deadline`.
    pub async fn shutdown(&self, deadline: Duration) {
        let drained: Vec<Entry> = {
            let mut entries = self.entries.lock();
            gauge!(HANDLERS_ACTIVE).set(0.0);
            entries.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();

        let mut tasks = Vec::with_capacity(count);
        for entry in drained {
            entry.handler.close();
            tasks.push(entry.task);
        }
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();

        match tokio::time::timeout(deadline, futures::future::join_all(tasks)).await {
            Ok(_) => tracing::info!(handlers = count, "All feed handlers stopped"),
            Err(_) => {
                tracing::warn!(handlers = count, ?deadline, "Feed handlers did not stop in time, aborting");
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }

    /// Spawns a handler unless one is already running for `id`.
    fn start(&self, id: &str, feed: Feed) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return false;
        }

        let handler = self.factory.create(id, &feed);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(supervise(
            id.to_string(),
            handler.clone(),
            generation,
            self.entries.clone(),
            self.fatal_tx.clone(),
        ));

        // The task cannot retire before this insert since it needs the lock.
        entries.insert(
            id.to_string(),
            Entry {
                handler,
                feed,
                generation,
                task,
            },
        );
        gauge!(HANDLERS_ACTIVE).set(entries.len() as f64);
        true
    }
}

async fn supervise(
    id: FeedId,
    handler: Arc<dyn Handler>,
    generation: u64,
    entries: Entries,
    fatal_tx: mpsc::UnboundedSender<FatalHandlerError>,
) {
    let result = handler.run().await;

    {
        let mut entries = entries.lock();
        if entries.get(&id).is_some_and(|entry| entry.generation == generation) {
            entries.remove(&id);
            gauge!(HANDLERS_ACTIVE).set(entries.len() as f64);
        }
    }

    if let Err(error) = result {
        let _ = fatal_tx.send(FatalHandlerError { id, error });
    }
}

fn validate_id(id: &str) -> Result<()> {
    let url = Url::parse(id).map_err(|e| ServiceError::InvalidInput(format!("invalid feed id {id:?}: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        scheme => Err(ServiceError::InvalidInput(format!(
            "unsupported scheme {scheme:?}, expected ws or wss"
        ))),
    }
}
