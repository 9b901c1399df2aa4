//! Request-layer boundary
//!
//! What an outer layer (HTTP routes, the CLI) is allowed to ask of a running
//! node. Every call goes through the same chain, pool, and peer registry the
//! P2P server uses, and anything that changes local state is gossiped.

use crate::core::{Block, Transaction, UTxOut};
use crate::error::Result;
use crate::network::{peer_key, Server};
use crate::storage::UTXOSet;
use crate::wallet::Wallet;
use log::{info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Clone)]
pub struct NodeApi {
    server: Server,
    utxo_set: UTXOSet,
    wallet: Arc<dyn Wallet>,
}

impl NodeApi {
    pub fn new(server: Server, wallet: Arc<dyn Wallet>) -> NodeApi {
        let utxo_set = UTXOSet::new(
            server.get_blockchain().clone(),
            Arc::clone(server.get_mempool()),
        );
        NodeApi {
            server,
            utxo_set,
            wallet,
        }
    }

    pub fn get_server(&self) -> &Server {
        &self.server
    }

    pub fn my_address(&self) -> String {
        self.wallet.address()
    }

    /// Signs a transfer from this node's wallet, pools it, and gossips it
    pub fn submit_transaction(&self, to: &str, amount: u64) -> Result<Transaction> {
        let tx = self
            .utxo_set
            .build_transaction(self.wallet.as_ref(), to, amount)?;
        self.server.get_mempool().submit(tx.clone());
        let reached = self.server.broadcast_tx(&tx)?;
        info!("Submitted transaction {} ({reached} peers notified)", tx.get_id());
        Ok(tx)
    }

    /// Mines the pool into a new block paying this node, then gossips the block
    pub fn mine_block(&self) -> Result<Block> {
        let block = self
            .server
            .get_blockchain()
            .append_local(&self.utxo_set, &self.my_address())?;
        self.announce(&block);
        Ok(block)
    }

    /// One mining attempt that yields to blocks arriving from peers. `None`
    /// means a peer's block won the race.
    pub fn try_mine_block(&self) -> Result<Option<Block>> {
        let interrupt = self.server.get_mining_interrupt();
        interrupt.store(false, Ordering::SeqCst);

        let mined = self.server.get_blockchain().append_local_cancellable(
            &self.utxo_set,
            &self.my_address(),
            interrupt,
        )?;
        match &mined {
            Some(block) => self.announce(block),
            None => info!("Mining attempt abandoned for a block from a peer"),
        }
        Ok(mined)
    }

    fn announce(&self, block: &Block) {
        if let Err(e) = self.server.broadcast_block(block) {
            warn!("Failed to broadcast block {}: {e}", block.get_hash());
        }
    }

    pub fn get_balance(&self, address: &str) -> Result<u64> {
        self.utxo_set.balance(address)
    }

    pub fn get_spendable_outputs(&self, address: &str) -> Result<Vec<UTxOut>> {
        self.utxo_set.compute_spendable_outputs(address)
    }

    /// Newest first
    pub fn get_chain(&self) -> Result<Vec<Block>> {
        self.server.get_blockchain().all_blocks()
    }

    /// `BlockchainError::BlockNotFound` when the hash is unknown
    pub fn get_block(&self, hash: &str) -> Result<Block> {
        self.server.get_blockchain().find_block(hash)
    }

    pub fn list_mempool(&self) -> Vec<Transaction> {
        self.server.get_mempool().snapshot()
    }

    pub fn connect_peer(&self, address: &str, port: u16) -> Result<()> {
        self.server.connect_peer(address, port)
    }

    /// `address:port` of every connected peer
    pub fn peers(&self) -> Vec<String> {
        self.server
            .get_peers()
            .list()
            .iter()
            .map(|(address, port)| peer_key(address, *port))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockchainError;
    use crate::testnet::test_utils::TestNode;

    fn api(node: &TestNode) -> NodeApi {
        let server =
            Server::start(node.blockchain.clone(), node.mempool.clone(), "127.0.0.1:0").unwrap();
        NodeApi::new(server, node.wallet.clone())
    }

    #[test]
    fn test_submit_then_mine() {
        let node = TestNode::new();
        let api = api(&node);
        let genesis = api.mine_block().unwrap();

        let tx = api.submit_transaction("recipient", 3).unwrap();
        assert_eq!(api.list_mempool(), vec![tx.clone()]);

        let block = api.mine_block().unwrap();
        assert_eq!(block.get_prev_hash(), genesis.get_hash());
        assert!(block.get_transactions().contains(&tx));
        assert!(api.list_mempool().is_empty());
        assert_eq!(api.get_balance("recipient").unwrap(), 3);
        assert_eq!(api.get_chain().unwrap().len(), 2);
    }

    #[test]
    fn test_get_block() {
        let node = TestNode::new();
        let api = api(&node);
        let block = api.mine_block().unwrap();

        assert_eq!(api.get_block(block.get_hash()).unwrap(), block);
        assert!(matches!(
            api.get_block("missing"),
            Err(BlockchainError::BlockNotFound(_))
        ));
    }

    #[test]
    fn test_submit_without_funds() {
        let node = TestNode::new();
        let api = api(&node);
        assert!(matches!(
            api.submit_transaction("recipient", 1),
            Err(BlockchainError::InsufficientFunds { .. })
        ));
        assert!(api.list_mempool().is_empty());
    }

    #[test]
    fn test_try_mine_without_interruption() {
        let node = TestNode::new();
        let api = api(&node);
        let block = api.try_mine_block().unwrap();
        assert!(block.is_some());
        assert_eq!(
            api.get_spendable_outputs(&api.my_address()).unwrap().len(),
            1
        );
        assert!(api.peers().is_empty());
    }
}
