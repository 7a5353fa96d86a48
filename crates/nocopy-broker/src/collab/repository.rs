//! File/chain/block repository seam.
//!
//! A file points at one chain, a chain is an ordered list of blocks, and a
//! block may be shared by many chains once deduplicated. Blocks carry a
//! reference count; operations that drop references report the blocks that
//! became unreferenced so the caller can purge them from storage.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use uuid::Uuid;

use nocopy_core::Result;

use super::not_found;

/// Block as produced by the chain service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: Uuid,
    pub hash: Vec<u8>,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub id: Uuid,
    pub version: u64,
    pub modified: SystemTime,
    pub length: i64,
    /// Block ids in file order.
    pub blocks: Vec<Uuid>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Register `path`, or bump its version if it exists. Returns the file id.
    async fn put(&self, path: &str) -> Result<Uuid>;

    async fn get(&self, path: &str) -> Result<FileInfo>;

    /// Blocks other than `except` with the same hash and size.
    async fn lookup(&self, except: Uuid, hash: &[u8], size: i64) -> Result<Vec<Uuid>>;

    /// Make `chain` use the existing block `to` in place of `from`.
    async fn link(&self, chain: Uuid, from: Uuid, to: Uuid) -> Result<()>;

    /// Drop `chain`. Returns the blocks left without references.
    async fn break_chain(&self, chain: Uuid) -> Result<Vec<Uuid>>;

    /// Attach a new chain of `blocks` to `file`. Returns the new chain and the
    /// one it replaced.
    async fn update(&self, file: Uuid, blocks: Vec<Block>) -> Result<(Uuid, Option<Uuid>)>;

    /// Remove `path`. Returns the blocks left without references.
    async fn delete(&self, path: &str) -> Result<Vec<Uuid>>;

    async fn shutdown(&self);
}

struct FileRow {
    id: Uuid,
    version: u64,
    modified: SystemTime,
    chain: Option<Uuid>,
}

struct BlockRow {
    hash: Vec<u8>,
    size: i64,
    refer: u32,
}

#[derive(Default)]
struct State {
    files: HashMap<String, FileRow>,
    chains: HashMap<Uuid, Vec<Uuid>>,
    blocks: HashMap<Uuid, BlockRow>,
}

impl State {
    /// Drop one reference; true when the block is gone.
    fn release(&mut self, block: Uuid) -> bool {
        let Some(row) = self.blocks.get_mut(&block) else {
            return false;
        };
        row.refer = row.refer.saturating_sub(1);
        if row.refer == 0 {
            self.blocks.remove(&block);
            return true;
        }
        false
    }

    fn break_chain(&mut self, chain: Uuid) -> Vec<Uuid> {
        let links = self.chains.remove(&chain).unwrap_or_default();
        links.into_iter().filter(|b| self.release(*b)).collect()
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live reference count of `block` (0 when unknown).
    pub fn references(&self, block: Uuid) -> u32 {
        self.state().blocks.get(&block).map(|b| b.refer).unwrap_or(0)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn put(&self, path: &str) -> Result<Uuid> {
        let mut st = self.state();
        let row = st.files.entry(path.to_owned()).or_insert_with(|| FileRow {
            id: Uuid::new_v4(),
            version: 0,
            modified: SystemTime::now(),
            chain: None,
        });
        row.version += 1;
        row.modified = SystemTime::now();
        Ok(row.id)
    }

    async fn get(&self, path: &str) -> Result<FileInfo> {
        let st = self.state();
        let file = st.files.get(path).ok_or_else(|| not_found(path))?;
        let chain = file.chain.ok_or_else(|| not_found(path))?;
        let blocks = st.chains.get(&chain).cloned().unwrap_or_default();
        let length = blocks
            .iter()
            .filter_map(|b| st.blocks.get(b))
            .map(|b| b.size)
            .sum();
        Ok(FileInfo {
            id: file.id,
            version: file.version,
            modified: file.modified,
            length,
            blocks,
        })
    }

    async fn lookup(&self, except: Uuid, hash: &[u8], size: i64) -> Result<Vec<Uuid>> {
        let st = self.state();
        let mut found: Vec<Uuid> = st
            .blocks
            .iter()
            .filter(|(id, b)| **id != except && b.size == size && b.hash == hash)
            .map(|(id, _)| *id)
            .collect();
        found.sort_unstable();
        Ok(found)
    }

    async fn link(&self, chain: Uuid, from: Uuid, to: Uuid) -> Result<()> {
        let mut st = self.state();
        let st = &mut *st;
        let target = st.blocks.get_mut(&to).ok_or_else(|| not_found("block"))?;
        let links = st.chains.get_mut(&chain).ok_or_else(|| not_found("chain"))?;
        let mut relinked = 0;
        for b in links.iter_mut().filter(|b| **b == from) {
            *b = to;
            relinked += 1;
        }
        target.refer += relinked;
        for _ in 0..relinked {
            st.release(from);
        }
        Ok(())
    }

    async fn break_chain(&self, chain: Uuid) -> Result<Vec<Uuid>> {
        Ok(self.state().break_chain(chain))
    }

    async fn update(&self, file: Uuid, blocks: Vec<Block>) -> Result<(Uuid, Option<Uuid>)> {
        let mut st = self.state();
        if !st.files.values().any(|f| f.id == file) {
            return Err(not_found("file"));
        }

        let chain = Uuid::new_v4();
        let mut links = Vec::with_capacity(blocks.len());
        for b in blocks {
            st.blocks
                .entry(b.id)
                .and_modify(|row| row.refer += 1)
                .or_insert(BlockRow {
                    hash: b.hash,
                    size: b.size,
                    refer: 1,
                });
            links.push(b.id);
        }
        st.chains.insert(chain, links);

        let row = st
            .files
            .values_mut()
            .find(|f| f.id == file)
            .ok_or_else(|| not_found("file"))?;
        let previous = row.chain.replace(chain);
        row.modified = SystemTime::now();
        Ok((chain, previous))
    }

    async fn delete(&self, path: &str) -> Result<Vec<Uuid>> {
        let mut st = self.state();
        let Some(row) = st.files.remove(path) else {
            return Ok(Vec::new());
        };
        Ok(row.chain.map(|c| st.break_chain(c)).unwrap_or_default())
    }

    async fn shutdown(&self) {
        *self.state() = State::default();
    }
}
