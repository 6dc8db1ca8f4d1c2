use super::{Index, Storage, StorageError};
use crate::types::{Feed, FeedId, Filter, Order};
use async_trait::async_trait;
use parking_lot::RwLock;

/// Keeps registrations in process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    index: RwLock<Index>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create(&self, id: &str, feed: &Feed) -> Result<(), StorageError> {
        self.index.write().insert(id, feed)
    }

    async fn read(&self, id: &str) -> Result<Feed, StorageError> {
        self.index.read().get(id)
    }

    async fn delete(&self, id: &str, group_id: &str, user_id: &str) -> Result<(), StorageError> {
        self.index.write().remove(id, group_id, user_id).map(|_| ())
    }

    async fn list(
        &self,
        limit: u32,
        filter: &Filter,
        order: Order,
        cursor: &str,
    ) -> Result<Vec<FeedId>, StorageError> {
        self.index.read().list(limit, filter, order, cursor)
    }
}
