//! The sled-backed header database.

use kestrel_chain::block::{self, StoredBlock};

use crate::format::{HeightKey, TreeExt};
use crate::{ChainError, Config};

/// Raw header storage: every attached header by hash, the best-chain index
/// by height, and the best-chain tip marker.
pub(crate) struct HeaderDb {
    header_by_hash: sled::Tree,
    hash_by_height: sled::Tree,
    meta: sled::Tree,
}

const TIP_KEY: [u8; 4] = *b"tip\0";

impl HeaderDb {
    pub fn open(config: &Config) -> Result<HeaderDb, ChainError> {
        let db = if config.ephemeral {
            sled::Config::new().temporary(true).open()?
        } else {
            sled::Config::new()
                .path(config.cache_dir.join("headers"))
                .open()?
        };

        Ok(HeaderDb {
            header_by_hash: db.open_tree(b"header_by_hash")?,
            hash_by_height: db.open_tree(b"hash_by_height")?,
            meta: db.open_tree(b"meta")?,
        })
    }

    /// Store a block record. Idempotent: re-inserting an identical record
    /// is a no-op.
    pub fn put(&self, block: &StoredBlock) -> Result<(), ChainError> {
        self.header_by_hash.st_insert(&block.hash(), block)?;
        metrics::counter!("store.headers.count", 1);
        Ok(())
    }

    pub fn get(&self, hash: &block::Hash) -> Result<Option<StoredBlock>, ChainError> {
        self.header_by_hash.st_get(hash)
    }

    pub fn contains(&self, hash: &block::Hash) -> Result<bool, ChainError> {
        Ok(self.get(hash)?.is_some())
    }

    /// The best-chain tip.
    pub fn tip(&self) -> Result<Option<StoredBlock>, ChainError> {
        let hash: Option<block::Hash> = self.meta.st_get(&TIP_KEY)?;
        match hash {
            Some(hash) => self.get(&hash),
            None => Ok(None),
        }
    }

    pub fn set_tip(&self, block: &StoredBlock) -> Result<(), ChainError> {
        self.meta.st_insert(&TIP_KEY, &block.hash())?;
        metrics::gauge!("sync.tip.height", block.height.0 as f64);
        Ok(())
    }

    /// The best-chain hash at `height`, if the best chain reaches it.
    pub fn main_chain_hash_at(&self, height: block::Height) -> Result<Option<block::Hash>, ChainError> {
        self.hash_by_height.st_get(&HeightKey(height.0))
    }

    /// Mark `block` as the best-chain block at its height.
    pub fn index_main_chain(&self, block: &StoredBlock) -> Result<(), ChainError> {
        self.hash_by_height
            .st_insert(&HeightKey(block.height.0), &block.hash())
    }

    /// Remove the best-chain index entry at `height` (during reorgs).
    pub fn unindex_main_chain(&self, height: block::Height) -> Result<(), ChainError> {
        self.hash_by_height.st_remove(&HeightKey(height.0))
    }

    /// Walk back `steps` parents from `from`, returning the ancestor.
    pub fn ancestor(
        &self,
        from: &StoredBlock,
        steps: u32,
    ) -> Result<Option<StoredBlock>, ChainError> {
        let mut cursor = *from;
        for _ in 0..steps {
            if cursor.height == block::Height(0) {
                return Ok(None);
            }
            cursor = match self.get(&cursor.header.previous_block_hash)? {
                Some(parent) => parent,
                None => return Err(ChainError::Corrupt("missing ancestor header")),
            };
        }
        Ok(Some(cursor))
    }
}
