use crate::block::Block;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("block already stored at height {0}")]
    HeightOccupied(u64),

    #[error("storage write failed: {0}")]
    WriteFailed(String),
}

/// Block storage collaborator.
///
/// The consensus core treats these operations as the only ones that may
/// suspend; a failure aborts the calling operation and is surfaced to the
/// caller without retry.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// The block at the current chain tip, or None for an empty chain.
    async fn latest_block(&self) -> Result<Option<Block>, StorageError>;

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StorageError>;

    async fn block_by_height(&self, height: u64) -> Result<Option<Block>, StorageError>;

    async fn store_block(&self, block: Block) -> Result<(), StorageError>;

    /// Remove a block by hash. Missing blocks are reported as errors so a
    /// reorganization cannot silently skip a revert step.
    async fn remove_block(&self, hash: &str) -> Result<(), StorageError>;

    async fn balance(&self, account: &str) -> Result<f64, StorageError>;

    /// Apply a signed delta to an account balance, creating the account on
    /// first credit. Balances saturate at zero rather than going negative.
    async fn adjust_balance(&self, account: &str, delta: f64) -> Result<f64, StorageError>;
}

#[derive(Default)]
struct MemoryStoreInner {
    by_hash: HashMap<String, Block>,
    by_height: BTreeMap<u64, String>,
    balances: HashMap<String, f64>,
}

/// In-memory `BlockStore` used by tests and in-process deployments.
#[derive(Default)]
pub struct MemoryBlockStore {
    inner: RwLock<MemoryStoreInner>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn latest_block(&self) -> Result<Option<Block>, StorageError> {
        let inner = self.inner.read();
        let hash = match inner.by_height.values().next_back() {
            Some(hash) => hash,
            None => return Ok(None),
        };
        Ok(inner.by_hash.get(hash).cloned())
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StorageError> {
        Ok(self.inner.read().by_hash.get(hash).cloned())
    }

    async fn block_by_height(&self, height: u64) -> Result<Option<Block>, StorageError> {
        let inner = self.inner.read();
        let hash = match inner.by_height.get(&height) {
            Some(hash) => hash,
            None => return Ok(None),
        };
        Ok(inner.by_hash.get(hash).cloned())
    }

    async fn store_block(&self, block: Block) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_height.get(&block.height) {
            if existing != &block.hash {
                return Err(StorageError::HeightOccupied(block.height));
            }
        }
        inner.by_height.insert(block.height, block.hash.clone());
        inner.by_hash.insert(block.hash.clone(), block);
        Ok(())
    }

    async fn remove_block(&self, hash: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        let block = inner
            .by_hash
            .remove(hash)
            .ok_or_else(|| StorageError::BlockNotFound(hash.to_string()))?;
        if inner.by_height.get(&block.height) == Some(&block.hash) {
            inner.by_height.remove(&block.height);
        }
        Ok(())
    }

    async fn balance(&self, account: &str) -> Result<f64, StorageError> {
        Ok(self.inner.read().balances.get(account).copied().unwrap_or(0.0))
    }

    async fn adjust_balance(&self, account: &str, delta: f64) -> Result<f64, StorageError> {
        let mut inner = self.inner.write();
        let balance = inner.balances.entry(account.to_string()).or_insert(0.0);
        *balance = (*balance + delta).max(0.0);
        Ok(*balance)
    }
}
