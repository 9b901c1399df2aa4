use crate::core::Transaction;
use std::collections::HashMap;
use std::sync::RwLock;

/// ( K -> tx id, V => Transaction )
pub struct MemoryPool {
    inner: RwLock<HashMap<String, Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts or overwrites by id
    pub fn submit(&self, tx: Transaction) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.insert(tx.get_id().to_string(), tx);
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.get(id).cloned(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                None
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.contains_key(id),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                false
            }
        }
    }

    pub fn remove(&self, id: &str) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.remove(id);
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    /// True if a pending transaction already spends output `index` of `tx_id`
    pub fn contains_spend(&self, tx_id: &str, index: i64) -> bool {
        match self.inner.read() {
            Ok(pool) => pool
                .values()
                .flat_map(|tx| tx.get_tx_ins())
                .any(|input| input.references(tx_id, index)),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                0
            }
        }
    }

    /// Current entries, pool untouched
    pub fn snapshot(&self) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.values().cloned().collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                Vec::new()
            }
        }
    }

    /// Empties the pool and hands back what it held, under one lock acquisition
    pub fn take_all(&self) -> Vec<Transaction> {
        match self.inner.write() {
            Ok(mut pool) => pool.drain().map(|(_, tx)| tx).collect(),
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                Vec::new()
            }
        }
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.clear();
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.is_empty(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TxIn, TxOut};

    fn spend(tx_id: &str, index: i64, amount: u64) -> Transaction {
        Transaction::new(
            vec![TxIn::new("alice", tx_id, index)],
            vec![TxOut::new("bob", amount)],
        )
        .unwrap()
    }

    #[test]
    fn test_submit_is_idempotent_by_id() {
        let pool = MemoryPool::new();
        let tx = spend("abc", 0, 5);

        pool.submit(tx.clone());
        pool.submit(tx.clone());

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(tx.get_id()), Some(tx));
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let pool = MemoryPool::new();
        pool.submit(spend("abc", 0, 5));
        pool.remove("does-not-exist");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_contains_spend_matches_exact_output() {
        let pool = MemoryPool::new();
        pool.submit(spend("abc", 1, 5));

        assert!(pool.contains_spend("abc", 1));
        assert!(!pool.contains_spend("abc", 0));
        assert!(!pool.contains_spend("abd", 1));
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let pool = MemoryPool::new();
        pool.submit(spend("abc", 0, 5));
        pool.submit(spend("abc", 1, 6));

        assert_eq!(pool.snapshot().len(), 2);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_take_all_empties_pool() {
        let pool = MemoryPool::new();
        pool.submit(spend("abc", 0, 5));
        pool.submit(spend("abc", 1, 6));

        let taken = pool.take_all();
        assert_eq!(taken.len(), 2);
        assert!(pool.is_empty());
    }
}
