// The ledger's state machine. The only mutable record is the tip hash; the
// chain itself is reconstructed by following prev_hash through storage, so a
// restart only needs the checkpoint to resume.

use crate::config::ChainParams;
use crate::core::{Block, DifficultyAdjustment, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{MemoryPool, Storage, UTXOSet};
use crate::utils::{deserialize, serialize};
use log::info;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Persisted pointer to the tip
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
struct Checkpoint {
    last_hash: String,
}

#[derive(Clone)]
pub struct Blockchain {
    // empty string means no genesis yet; readers hold it across a whole walk
    // so a replacement is never seen half done
    tip_hash: Arc<RwLock<String>>,
    // held for the whole of an append or replacement so two blocks never extend the same tip
    append_lock: Arc<Mutex<()>>,
    storage: Arc<dyn Storage>,
    params: ChainParams,
}

impl Blockchain {
    /// Opens the chain stored in `storage`, resuming from its checkpoint if any
    pub fn open(storage: Arc<dyn Storage>, params: ChainParams) -> Result<Blockchain> {
        let tip_hash = match storage.get_checkpoint()? {
            Some(bytes) => {
                let checkpoint: Checkpoint = deserialize(&bytes).map_err(|e| {
                    BlockchainError::StorageCorruption(format!("Unreadable checkpoint: {e}"))
                })?;
                info!("Restored chain at tip {}", checkpoint.last_hash);
                checkpoint.last_hash
            }
            None => String::new(),
        };

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            append_lock: Arc::new(Mutex::new(())),
            storage,
            params,
        })
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn last_hash(&self) -> String {
        self.read_tip().clone()
    }

    fn read_tip(&self) -> RwLockReadGuard<'_, String> {
        self.tip_hash
            .read()
            .expect("Failed to acquire read lock on tip_hash - this should never happen")
    }

    fn write_tip(&self) -> RwLockWriteGuard<'_, String> {
        self.tip_hash
            .write()
            .expect("Failed to acquire write lock on tip_hash - this should never happen")
    }

    fn set_tip_hash(&self, new_tip_hash: &str) -> Result<()> {
        let mut tip_hash = self.write_tip();
        *tip_hash = new_tip_hash.to_string();
        self.persist_checkpoint(new_tip_hash)
    }

    fn persist_checkpoint(&self, last_hash: &str) -> Result<()> {
        let checkpoint = Checkpoint {
            last_hash: last_hash.to_string(),
        };
        self.storage.save_checkpoint(&serialize(&checkpoint)?)
    }

    fn persist_block(&self, block: &Block) -> Result<()> {
        self.storage.save_block(block.get_hash(), &block.serialize()?)
    }

    fn lock_appends(&self) -> std::sync::MutexGuard<'_, ()> {
        self.append_lock
            .lock()
            .expect("Failed to acquire append lock - this should never happen")
    }

    /// `BlockchainError::BlockNotFound` when the hash is unknown
    pub fn find_block(&self, hash: &str) -> Result<Block> {
        let bytes = self.storage.find_block(hash)?;
        Block::deserialize(&bytes).map_err(|e| {
            BlockchainError::StorageCorruption(format!("Block {hash} does not decode: {e}"))
        })
    }

    // Blocks reachable from the tip must exist; a miss here is corruption, not "not found"
    fn load_reachable(&self, hash: &str) -> Result<Block> {
        match self.find_block(hash) {
            Err(BlockchainError::BlockNotFound(missing)) => Err(
                BlockchainError::StorageCorruption(format!(
                    "Block {missing} is reachable from the tip but missing from storage"
                )),
            ),
            other => other,
        }
    }

    pub fn tip(&self) -> Result<Option<Block>> {
        let tip_hash = self.read_tip();
        if tip_hash.is_empty() {
            return Ok(None);
        }
        self.load_reachable(&tip_hash).map(Some)
    }

    pub fn height(&self) -> Result<u64> {
        Ok(self.tip()?.map(|block| block.get_height()).unwrap_or(0))
    }

    /// Tip back to genesis, newest first
    pub fn all_blocks(&self) -> Result<Vec<Block>> {
        let tip_hash = self.read_tip();
        self.blocks_from(&tip_hash)
    }

    // Callers hold the tip lock
    fn blocks_from(&self, tip_hash: &str) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        let mut hash_cursor = tip_hash.to_string();
        while !hash_cursor.is_empty() {
            let block = self.load_reachable(&hash_cursor)?;
            hash_cursor = block.get_prev_hash().to_string();
            blocks.push(block);
        }
        Ok(blocks)
    }

    pub fn find_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        for block in self.all_blocks()? {
            if let Some(tx) = block.get_transactions().iter().find(|tx| tx.get_id() == id) {
                return Ok(Some(tx.clone()));
            }
        }
        Ok(None)
    }

    /// Difficulty the next mined block must meet
    pub fn difficulty(&self) -> Result<u32> {
        let tip_hash = self.read_tip();
        if tip_hash.is_empty() {
            return Ok(self.params.default_difficulty);
        }
        let tip = self.load_reachable(&tip_hash)?;
        if tip.get_height() % self.params.difficulty_interval != 0 {
            return Ok(tip.get_difficulty());
        }
        DifficultyAdjustment::next_difficulty(&self.params, &self.blocks_from(&tip_hash)?)
    }

    /// Mines the next block from the pending pool and makes it the new tip
    pub fn append_local(&self, utxo_set: &UTXOSet, miner_address: &str) -> Result<Block> {
        let never = AtomicBool::new(false);
        self.append_local_cancellable(utxo_set, miner_address, &never)?
            .ok_or_else(|| BlockchainError::Mining("Nonce space exhausted".to_string()))
    }

    /// `append_local` that gives up once `stop` is raised. A cancelled attempt
    /// returns `None` and puts the selected transactions back in the pool.
    pub fn append_local_cancellable(
        &self,
        utxo_set: &UTXOSet,
        miner_address: &str,
        stop: &AtomicBool,
    ) -> Result<Option<Block>> {
        let _guard = self.lock_appends();

        let prev_hash = self.last_hash();
        let height = self.height()? + 1;
        let difficulty = self.difficulty()?;
        let transactions =
            utxo_set.select_confirmable(miner_address, self.params.miner_reward, height)?;

        let candidate = Block::unmined(prev_hash, height, difficulty, transactions)?;
        let block = match ProofOfWork::new_proof_of_work(candidate.clone()).run_cancellable(stop)? {
            Some(block) => block,
            None => {
                for tx in candidate.get_transactions().iter().filter(|tx| !tx.is_coinbase()) {
                    utxo_set.get_mempool().submit(tx.clone());
                }
                return Ok(None);
            }
        };
        self.persist_block(&block)?;
        self.set_tip_hash(block.get_hash())?;

        info!(
            "Mined block {} at height {height} with {} transactions (difficulty: {difficulty})",
            block.get_hash(),
            block.get_transactions().len()
        );
        Ok(Some(block))
    }

    /// Stores a block mined elsewhere and drops its transactions from the pool.
    /// Returns `false`, storing nothing, when the block does not extend the
    /// tip as it stands once the append lock is held.
    pub fn append_from_peer(&self, block: &Block, mempool: &MemoryPool) -> Result<bool> {
        {
            let _guard = self.lock_appends();
            let (tip_hash, tip_height) = self
                .tip()?
                .map(|tip| (tip.get_hash().to_string(), tip.get_height()))
                .unwrap_or_default();
            if block.get_prev_hash() != tip_hash || block.get_height() != tip_height + 1 {
                info!(
                    "Block {} from peer does not extend tip {tip_hash}, ignoring it",
                    block.get_hash()
                );
                return Ok(false);
            }
            self.persist_block(block)?;
            self.set_tip_hash(block.get_hash())?;
        }

        for tx in block.get_transactions() {
            mempool.remove(tx.get_id());
        }
        info!(
            "Appended block {} at height {} from peer",
            block.get_hash(),
            block.get_height()
        );
        Ok(true)
    }

    /// Swaps the stored chain for `blocks` (newest first). No validation happens
    /// here; callers decide whether the chain deserves to win.
    pub fn replace_chain(&self, blocks: &[Block]) -> Result<()> {
        let new_tip = match blocks.first() {
            Some(block) => block,
            None => return Ok(()),
        };

        let _guard = self.lock_appends();
        let mut tip_hash = self.write_tip();
        self.storage.clear_blocks()?;
        for block in blocks {
            self.persist_block(block)?;
        }
        *tip_hash = new_tip.get_hash().to_string();
        self.persist_checkpoint(&tip_hash)?;
        drop(tip_hash);

        info!(
            "Replaced chain: new tip {} at height {}",
            new_tip.get_hash(),
            new_tip.get_height()
        );
        Ok(())
    }

    /// Structural check of a chain received from elsewhere (newest first):
    /// it must end at a genesis block, each block must link to the next by
    /// hash and height, and every block must carry valid proof-of-work.
    pub fn validate_chain(blocks: &[Block]) -> Result<()> {
        let genesis = match blocks.last() {
            Some(block) => block,
            None => return Err(BlockchainError::InvalidBlock("Chain is empty".to_string())),
        };
        if !genesis.is_genesis() || genesis.get_height() != 1 {
            return Err(BlockchainError::InvalidBlock(format!(
                "Chain ends at {} (height {}) instead of a genesis block",
                genesis.get_hash(),
                genesis.get_height()
            )));
        }

        for pair in blocks.windows(2) {
            let (child, parent) = (&pair[0], &pair[1]);
            if child.get_prev_hash() != parent.get_hash()
                || child.get_height() != parent.get_height() + 1
            {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Block {} does not follow {}",
                    child.get_hash(),
                    parent.get_hash()
                )));
            }
        }

        if let Some(block) = blocks.iter().find(|block| !ProofOfWork::validate(block)) {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} fails proof-of-work",
                block.get_hash()
            )));
        }
        Ok(())
    }
}
