//! Registrations kept in memory and snapshotted to a single file after every
//! change. The snapshot is bincode encoded and zstd compressed.

use super::{Index, Storage, StorageError};
use crate::types::{Feed, FeedId, Filter, Order};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

struct Codec {
    // zstd compression level
    level: i32,
    config: bincode::config::Configuration,
}

impl Codec {
    fn new(level: i32) -> Self {
        Codec {
            level,
            // standard defaults to little-endian + varint
            config: bincode::config::standard(),
        }
    }

    fn write<W: Write>(
        &self,
        writer: &mut W,
        feeds: &BTreeMap<FeedId, Feed>,
    ) -> Result<usize, StorageError> {
        let mut encoder = zstd::stream::write::Encoder::new(writer, self.level)?;
        let size = bincode::serde::encode_into_std_write(feeds, &mut encoder, self.config)?;
        encoder.finish()?;
        Ok(size)
    }

    fn read<R: Read>(&self, reader: R) -> Result<BTreeMap<FeedId, Feed>, StorageError> {
        let mut decoder = zstd::stream::read::Decoder::new(reader)?;
        let feeds = bincode::serde::decode_from_std_read(&mut decoder, self.config)?;
        Ok(feeds)
    }
}

pub struct FilesystemStorage {
    path: PathBuf,
    codec: Codec,
    // Held for writing across the snapshot so snapshots land in change order.
    index: RwLock<Index>,
}

impl FilesystemStorage {
    /// Loads the snapshot at `path`, starting empty when there is none yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let codec = Codec::new(1);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let feeds = match tokio::fs::read(&path).await {
            Ok(bytes) => codec.read(bytes.as_slice())?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = %path.display(), feeds = feeds.len(), "Loaded feed snapshot");

        Ok(FilesystemStorage {
            path,
            codec,
            index: RwLock::new(Index::from_feeds(feeds)),
        })
    }

    async fn persist(&self, index: &Index) -> Result<(), StorageError> {
        let mut buffer = Vec::new();
        let size = self.codec.write(&mut buffer, index.feeds())?;

        // Write aside and rename so a crash never leaves a truncated snapshot.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &buffer).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), bytes = size, "Stored feed snapshot");
        Ok(())
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn create(&self, id: &str, feed: &Feed) -> Result<(), StorageError> {
        let mut index = self.index.write().await;
        index.insert(id, feed)?;
        if let Err(e) = self.persist(&index).await {
            let _ = index.remove(id, &feed.group_id, &feed.user_id);
            return Err(e);
        }
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Feed, StorageError> {
        self.index.read().await.get(id)
    }

    async fn delete(&self, id: &str, group_id: &str, user_id: &str) -> Result<(), StorageError> {
        let mut index = self.index.write().await;
        let removed = index.remove(id, group_id, user_id)?;
        if let Err(e) = self.persist(&index).await {
            let _ = index.insert(id, &removed);
            return Err(e);
        }
        Ok(())
    }

    async fn list(
        &self,
        limit: u32,
        filter: &Filter,
        order: Order,
        cursor: &str,
    ) -> Result<Vec<FeedId>, StorageError> {
        self.index.read().await.list(limit, filter, order, cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::feed;

    #[test]
    fn test_codec() {
        let codec = Codec::new(3);
        let feeds = BTreeMap::from([
            ("wss://a.example".to_string(), feed("group0", "user1", 0)),
            ("wss://b.example".to_string(), feed("group0", "user2", 1)),
        ]);

        let mut buffer: Vec<u8> = Vec::new();
        codec.write(&mut buffer, &feeds).unwrap();
        let decoded = codec.read(buffer.as_slice()).unwrap();
        assert_eq!(feeds, decoded);
    }

    #[tokio::test]
    async fn test_filesystem_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("feeds.bin");

        let storage = FilesystemStorage::open(&path).await.unwrap();
        storage
            .create("wss://a.example", &feed("group0", "user1", 0))
            .await
            .unwrap();
        storage
            .create("wss://b.example", &feed("group0", "user1", 0))
            .await
            .unwrap();
        storage
            .delete("wss://a.example", "group0", "user1")
            .await
            .unwrap();
        drop(storage);

        let reopened = FilesystemStorage::open(&path).await.unwrap();
        let ids = reopened
            .list(0, &Filter::default(), Order::Asc, "")
            .await
            .unwrap();
        assert_eq!(ids, vec!["wss://b.example"]);
        assert_eq!(
            reopened.read("wss://b.example").await.unwrap(),
            feed("group0", "user1", 0)
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_filesystem_rejects_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.bin");
        std::fs::write(&path, b"not a snapshot").unwrap();

        assert!(FilesystemStorage::open(&path).await.is_err());
    }
}
