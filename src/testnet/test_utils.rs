//! In-process nodes for unit tests

use crate::config::ChainParams;
use crate::core::{Block, Blockchain, Transaction};
use crate::storage::{MemoryPool, MemoryStorage, UTXOSet};
use crate::wallet::{KeyWallet, Wallet};
use std::sync::Arc;

/// Chain parameters that keep mining instant
pub fn test_params() -> ChainParams {
    ChainParams {
        default_difficulty: 1,
        ..ChainParams::default()
    }
}

/// A node without networking: chain, pool, and a fresh key
pub struct TestNode {
    pub blockchain: Blockchain,
    pub mempool: Arc<MemoryPool>,
    pub wallet: Arc<dyn Wallet>,
    pub utxo_set: UTXOSet,
}

impl TestNode {
    pub fn new() -> TestNode {
        Self::with_storage(Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(storage: Arc<MemoryStorage>) -> TestNode {
        let blockchain = Blockchain::open(storage, test_params()).unwrap();
        let mempool = Arc::new(MemoryPool::new());
        let utxo_set = UTXOSet::new(blockchain.clone(), mempool.clone());
        TestNode {
            blockchain,
            mempool,
            wallet: Arc::new(KeyWallet::generate().unwrap()),
            utxo_set,
        }
    }

    pub fn address(&self) -> String {
        self.wallet.address()
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.utxo_set.balance(address).unwrap()
    }

    /// Mines the pool into a block paying this node's wallet
    pub fn mine(&self) -> Block {
        self.blockchain
            .append_local(&self.utxo_set, &self.address())
            .unwrap()
    }

    /// Builds a signed transfer from this node's wallet and puts it in the pool
    pub fn send_to(&self, to: &str, amount: u64) -> Transaction {
        let tx = self
            .utxo_set
            .build_transaction(self.wallet.as_ref(), to, amount)
            .unwrap();
        self.mempool.submit(tx.clone());
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_are_isolated() {
        let first = TestNode::new();
        let second = TestNode::new();
        first.mine();

        assert_ne!(first.address(), second.address());
        assert_eq!(first.blockchain.height().unwrap(), 1);
        assert_eq!(second.blockchain.height().unwrap(), 0);
    }

    #[test]
    fn test_send_to_lands_in_pool() {
        let node = TestNode::new();
        node.mine();
        let tx = node.send_to("recipient", 1);
        assert!(node.mempool.contains(tx.get_id()));
    }
}
