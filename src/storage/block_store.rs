// Durable byte store behind the chain. The chain decides what the bytes mean;
// a store only keeps blocks by hash plus the single checkpoint record.

use crate::error::{BlockchainError, Result};
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

const BLOCKS_TREE: &str = "blocks";
const DATA_TREE: &str = "data";
const CHECKPOINT_KEY: &str = "checkpoint";

pub trait Storage: Send + Sync {
    fn get_checkpoint(&self) -> Result<Option<Vec<u8>>>;

    fn save_checkpoint(&self, data: &[u8]) -> Result<()>;

    /// `BlockchainError::BlockNotFound` when nothing is stored under `hash`
    fn find_block(&self, hash: &str) -> Result<Vec<u8>>;

    fn save_block(&self, hash: &str, data: &[u8]) -> Result<()>;

    fn clear_blocks(&self) -> Result<()>;
}

/// Sled-backed store, one tree for blocks and one for node metadata
pub struct SledStorage {
    db: Db,
    blocks: Tree,
    data: Tree,
}

impl SledStorage {
    pub fn open(path: &Path) -> Result<SledStorage> {
        let db = sled::open(path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;
        let data = db
            .open_tree(DATA_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open data tree: {e}")))?;
        Ok(SledStorage { db, blocks, data })
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| BlockchainError::Database(format!("Failed to flush database: {e}")))?;
        Ok(())
    }
}

impl Storage for SledStorage {
    fn get_checkpoint(&self) -> Result<Option<Vec<u8>>> {
        let data = self
            .data
            .get(CHECKPOINT_KEY)
            .map_err(|e| BlockchainError::Database(format!("Failed to get checkpoint: {e}")))?;
        Ok(data.map(|bytes| bytes.to_vec()))
    }

    fn save_checkpoint(&self, data: &[u8]) -> Result<()> {
        self.data
            .insert(CHECKPOINT_KEY, data)
            .map_err(|e| BlockchainError::Database(format!("Failed to save checkpoint: {e}")))?;
        Ok(())
    }

    fn find_block(&self, hash: &str) -> Result<Vec<u8>> {
        self.blocks
            .get(hash)
            .map_err(|e| BlockchainError::Database(format!("Failed to get block: {e}")))?
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| BlockchainError::BlockNotFound(hash.to_string()))
    }

    fn save_block(&self, hash: &str, data: &[u8]) -> Result<()> {
        self.blocks
            .insert(hash, data)
            .map_err(|e| BlockchainError::Database(format!("Failed to save block: {e}")))?;
        Ok(())
    }

    fn clear_blocks(&self) -> Result<()> {
        self.blocks
            .clear()
            .map_err(|e| BlockchainError::Database(format!("Failed to clear blocks: {e}")))?;
        Ok(())
    }
}

/// In-memory store for tests and throwaway nodes
#[derive(Default)]
pub struct MemoryStorage {
    checkpoint: RwLock<Option<Vec<u8>>>,
    blocks: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }

    pub fn block_count(&self) -> usize {
        self.blocks
            .read()
            .expect("Failed to acquire read lock on blocks - this should never happen")
            .len()
    }
}

impl Storage for MemoryStorage {
    fn get_checkpoint(&self) -> Result<Option<Vec<u8>>> {
        Ok(self
            .checkpoint
            .read()
            .expect("Failed to acquire read lock on checkpoint - this should never happen")
            .clone())
    }

    fn save_checkpoint(&self, data: &[u8]) -> Result<()> {
        *self
            .checkpoint
            .write()
            .expect("Failed to acquire write lock on checkpoint - this should never happen") =
            Some(data.to_vec());
        Ok(())
    }

    fn find_block(&self, hash: &str) -> Result<Vec<u8>> {
        self.blocks
            .read()
            .expect("Failed to acquire read lock on blocks - this should never happen")
            .get(hash)
            .cloned()
            .ok_or_else(|| BlockchainError::BlockNotFound(hash.to_string()))
    }

    fn save_block(&self, hash: &str, data: &[u8]) -> Result<()> {
        self.blocks
            .write()
            .expect("Failed to acquire write lock on blocks - this should never happen")
            .insert(hash.to_string(), data.to_vec());
        Ok(())
    }

    fn clear_blocks(&self) -> Result<()> {
        self.blocks
            .write()
            .expect("Failed to acquire write lock on blocks - this should never happen")
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(storage: &dyn Storage) {
        assert_eq!(storage.get_checkpoint().unwrap(), None);
        assert!(matches!(
            storage.find_block("abc"),
            Err(BlockchainError::BlockNotFound(_))
        ));

        storage.save_block("abc", b"block-bytes").unwrap();
        storage.save_checkpoint(b"abc").unwrap();
        assert_eq!(storage.find_block("abc").unwrap(), b"block-bytes".to_vec());
        assert_eq!(storage.get_checkpoint().unwrap(), Some(b"abc".to_vec()));

        storage.clear_blocks().unwrap();
        assert!(storage.find_block("abc").is_err());
        // clearing blocks leaves the checkpoint alone
        assert_eq!(storage.get_checkpoint().unwrap(), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_memory_storage_contract() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn test_sled_storage_contract() {
        let dir = tempdir().unwrap();
        exercise(&SledStorage::open(&dir.path().join("db")).unwrap());
    }

    #[test]
    fn test_sled_storage_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let storage = SledStorage::open(&path).unwrap();
            storage.save_block("abc", b"block-bytes").unwrap();
            storage.save_checkpoint(b"abc").unwrap();
            storage.flush().unwrap();
        }

        let storage = SledStorage::open(&path).unwrap();
        assert_eq!(storage.find_block("abc").unwrap(), b"block-bytes".to_vec());
        assert_eq!(storage.get_checkpoint().unwrap(), Some(b"abc".to_vec()));
    }
}
