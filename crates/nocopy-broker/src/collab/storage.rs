//! Object storage seam.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

use nocopy_core::{Error, Result};

use super::not_found;

pub type Reader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Store everything `reader` yields under `key`; returns the bytes written.
    /// `size_hint` is the expected length, negative when unknown.
    async fn store(&self, key: &str, size_hint: i64, reader: Reader) -> Result<i64>;

    async fn load(&self, key: &str) -> Result<Reader>;

    /// Remove `key`. Missing keys are not an error.
    async fn purge(&self, key: &str) -> Result<()>;

    async fn shutdown(&self);
}

#[derive(Default)]
pub struct MemoryStorage {
    objects: DashMap<String, Bytes>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn store(&self, key: &str, size_hint: i64, mut reader: Reader) -> Result<i64> {
        let mut buf = Vec::with_capacity(usize::try_from(size_hint).unwrap_or(0));
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::Internal(format!("store {key}: {e}")))?;
        let n = i64::try_from(buf.len()).map_err(|e| Error::Internal(e.to_string()))?;
        self.objects.insert(key.to_owned(), Bytes::from(buf));
        Ok(n)
    }

    async fn load(&self, key: &str) -> Result<Reader> {
        let bytes = self
            .objects
            .get(key)
            .map(|b| b.value().clone())
            .ok_or_else(|| not_found(key))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn purge(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn shutdown(&self) {
        self.objects.clear();
    }
}
