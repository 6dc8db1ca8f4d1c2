//! Persistence for feed registrations.
//!
//! Feeds are keyed by id and listed with keyset pagination, so every backend
//! keeps them ordered by id.

mod filesystem;
mod memory;

pub use filesystem::FilesystemStorage;
pub use memory::MemoryStorage;

use crate::types::{Feed, FeedId, Filter, Order};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::io;
use std::ops::Bound;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("feed already exists: {0}")]
    Conflict(String),

    #[error("feed not found: {0}")]
    NotFound(String),

    #[error("invalid id pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Fails with `Conflict` when the id is already registered.
    async fn create(&self, id: &str, feed: &Feed) -> Result<(), StorageError>;

    async fn read(&self, id: &str) -> Result<Feed, StorageError>;

    /// Only deletes when both owner fields match, otherwise `NotFound`.
    async fn delete(&self, id: &str, group_id: &str, user_id: &str) -> Result<(), StorageError>;

    /// Returns up to `limit` ids strictly after (ascending) or before
    /// (descending) `cursor`. A zero limit means no limit.
    async fn list(
        &self,
        limit: u32,
        filter: &Filter,
        order: Order,
        cursor: &str,
    ) -> Result<Vec<FeedId>, StorageError>;
}

/// Ordered in-memory index shared by the storage backends.
#[derive(Debug, Default)]
pub(crate) struct Index {
    feeds: BTreeMap<FeedId, Feed>,
}

impl Index {
    pub(crate) fn from_feeds(feeds: BTreeMap<FeedId, Feed>) -> Self {
        Index { feeds }
    }

    pub(crate) fn feeds(&self) -> &BTreeMap<FeedId, Feed> {
        &self.feeds
    }

    pub(crate) fn insert(&mut self, id: &str, feed: &Feed) -> Result<(), StorageError> {
        if self.feeds.contains_key(id) {
            return Err(StorageError::Conflict(id.to_string()));
        }
        self.feeds.insert(id.to_string(), feed.clone());
        Ok(())
    }

    pub(crate) fn get(&self, id: &str) -> Result<Feed, StorageError> {
        self.feeds
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    pub(crate) fn remove(
        &mut self,
        id: &str,
        group_id: &str,
        user_id: &str,
    ) -> Result<Feed, StorageError> {
        match self.feeds.get(id) {
            Some(feed) if feed.group_id == group_id && feed.user_id == user_id => self
                .feeds
                .remove(id)
                .ok_or_else(|| StorageError::NotFound(id.to_string())),
            _ => Err(StorageError::NotFound(id.to_string())),
        }
    }

    pub(crate) fn list(
        &self,
        limit: u32,
        filter: &Filter,
        order: Order,
        cursor: &str,
    ) -> Result<Vec<FeedId>, StorageError> {
        let pattern = match filter.pattern.as_str() {
            "" => None,
            p => Some(Regex::new(p)?),
        };
        let limit = match limit {
            0 => usize::MAX,
            n => n as usize,
        };
        let keep = |(id, feed): &(&FeedId, &Feed)| matches(filter, pattern.as_ref(), id, feed);

        let ids = match order {
            Order::Asc => self
                .feeds
                .range::<str, _>((Bound::Excluded(cursor), Bound::Unbounded))
                .filter(keep)
                .take(limit)
                .map(|(id, _)| id.clone())
                .collect(),
            // No cursor yet: start from the greatest id.
            Order::Desc if cursor.is_empty() => self
                .feeds
                .iter()
                .rev()
                .filter(keep)
                .take(limit)
                .map(|(id, _)| id.clone())
                .collect(),
            Order::Desc => self
                .feeds
                .range::<str, _>((Bound::Unbounded, Bound::Excluded(cursor)))
                .rev()
                .filter(keep)
                .take(limit)
                .map(|(id, _)| id.clone())
                .collect(),
        };

        Ok(ids)
    }
}

fn matches(filter: &Filter, pattern: Option<&Regex>, id: &str, feed: &Feed) -> bool {
    if !filter.user_id.is_empty()
        && (feed.group_id != filter.group_id || feed.user_id != filter.user_id)
    {
        return false;
    }
    pattern.is_none_or(|p| p.is_match(id))
}
