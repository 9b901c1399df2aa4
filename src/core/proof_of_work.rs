use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::current_timestamp;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};

const MAX_NONCE: u64 = u64::MAX;

pub struct ProofOfWork {
    block: Block,
    difficulty: u32,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: Block) -> ProofOfWork {
        let difficulty = block.get_difficulty();
        ProofOfWork { block, difficulty }
    }

    /// `hash` starts with `difficulty` hexadecimal zero characters
    pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
        let zeros = difficulty as usize;
        hash.len() >= zeros && hash.bytes().take(zeros).all(|c| c == b'0')
    }

    /// Recomputes the hash and checks it against the block's own difficulty
    pub fn validate(block: &Block) -> bool {
        match block.calculate_hash() {
            Ok(hash) => {
                hash == block.get_hash() && Self::meets_difficulty(&hash, block.get_difficulty())
            }
            Err(_) => false,
        }
    }

    /// Searches nonces until one satisfies the difficulty. Blocks the caller.
    pub fn run(self) -> Result<Block> {
        let never = AtomicBool::new(false);
        self.run_cancellable(&never)?
            .ok_or_else(|| BlockchainError::Mining("Nonce space exhausted".to_string()))
    }

    /// Same search, but gives up with `None` once `stop` is raised. The flag is
    /// checked between nonce attempts.
    pub fn run_cancellable(mut self, stop: &AtomicBool) -> Result<Option<Block>> {
        let height = self.block.get_height();
        info!(
            "Mining block at height {height} with difficulty {}",
            self.difficulty
        );

        let mut nonce = 0;
        while nonce < MAX_NONCE {
            if stop.load(Ordering::Relaxed) {
                info!("Mining at height {height} cancelled after {nonce} attempts");
                return Ok(None);
            }

            self.block.set_attempt(nonce, current_timestamp()?);
            let hash = self.block.calculate_hash()?;
            if Self::meets_difficulty(&hash, self.difficulty) {
                debug!("Found nonce {nonce} for height {height}: {hash}");
                self.block.set_hash(hash);
                return Ok(Some(self.block));
            }
            nonce += 1;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    fn create_test_block(difficulty: u32) -> Block {
        let coinbase_tx = Transaction::new_coinbase("test-miner", 10, 1).unwrap();
        Block::mine(String::new(), 1, difficulty, vec![coinbase_tx]).unwrap()
    }

    #[test]
    fn test_mined_hash_has_required_prefix() {
        for difficulty in 0..=2 {
            let block = create_test_block(difficulty);
            let prefix = "0".repeat(difficulty as usize);
            assert!(block.get_hash().starts_with(&prefix));
            assert!(ProofOfWork::validate(&block));
        }
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(ProofOfWork::meets_difficulty("00ab", 2));
        assert!(!ProofOfWork::meets_difficulty("0a0b", 2));
        assert!(ProofOfWork::meets_difficulty("abcd", 0));
        assert!(!ProofOfWork::meets_difficulty("0", 2));
    }

    #[test]
    fn test_validation_rejects_tampered_block() {
        let block = create_test_block(1);
        let mut tampered = block.clone();
        tampered.set_attempt(block.get_nonce() + 1, block.get_timestamp());
        assert!(!ProofOfWork::validate(&tampered));
    }

    #[test]
    fn test_validation_rejects_insufficient_work() {
        // hash matches the contents, but nobody searched for 64 zeros
        let block = Block::new_test_block(1_000, "", 1, 64);
        assert_eq!(block.calculate_hash().unwrap(), block.get_hash());
        assert!(!ProofOfWork::validate(&block));
    }

    #[test]
    fn test_cancelled_search_returns_none() {
        let coinbase_tx = Transaction::new_coinbase("test-miner", 10, 1).unwrap();
        // 64 zeros cannot be found
        let block = Block::unmined(String::new(), 1, 64, vec![coinbase_tx]).unwrap();
        let stop = AtomicBool::new(true);

        let result = ProofOfWork::new_proof_of_work(block)
            .run_cancellable(&stop)
            .unwrap();
        assert!(result.is_none());
    }
}
