use crate::core::{ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_hex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    hash: String,
    #[serde(default)]
    prev_hash: String, // empty only for genesis
    height: u64,
    difficulty: u32, // leading hex zeros required when this block was mined
    nonce: u64,
    timestamp: i64, // seconds, refreshed on every mining attempt
    transactions: Vec<Transaction>,
}

impl Block {
    /// Runs proof-of-work until a hash with `difficulty` leading zeros is found
    pub fn mine(
        prev_hash: String,
        height: u64,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Result<Block> {
        let block = Self::unmined(prev_hash, height, difficulty, transactions)?;
        ProofOfWork::new_proof_of_work(block).run()
    }

    /// Header fields filled in, nonce at zero and no hash yet
    pub fn unmined(
        prev_hash: String,
        height: u64,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        Ok(Block {
            hash: String::new(),
            prev_hash,
            height,
            difficulty,
            nonce: 0,
            timestamp: current_timestamp()?,
            transactions,
        })
    }

    /// SHA-256 over every field but the hash itself
    pub fn calculate_hash(&self) -> Result<String> {
        let preimage = (
            self.prev_hash.as_str(),
            self.height,
            self.difficulty,
            self.nonce,
            self.timestamp,
            self.transactions.as_slice(),
        );
        Ok(sha256_hex(&serialize(&preimage)?))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_prev_hash(&self) -> &str {
        &self.prev_hash
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> u64 {
        self.height
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub(crate) fn set_attempt(&mut self, nonce: u64, timestamp: i64) {
        self.nonce = nonce;
        self.timestamp = timestamp;
    }

    pub(crate) fn set_hash(&mut self, hash: String) {
        self.hash = hash;
    }

    /// Block with a fixed timestamp and a hash computed without any work
    #[cfg(test)]
    pub fn new_test_block(
        timestamp: i64,
        prev_hash: &str,
        height: u64,
        difficulty: u32,
    ) -> Block {
        let coinbase = Transaction::new_coinbase("test-miner", 10, height)
            .expect("coinbase creation should not fail in tests");
        let mut block = Block {
            hash: String::new(),
            prev_hash: prev_hash.to_string(),
            height,
            difficulty,
            nonce: 0,
            timestamp,
            transactions: vec![coinbase],
        };
        block.hash = block
            .calculate_hash()
            .expect("hashing should not fail in tests");
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_block_rejected() {
        let result = Block::unmined(String::new(), 1, 1, vec![]);
        assert!(matches!(result, Err(BlockchainError::InvalidBlock(_))));
    }

    #[test]
    fn test_storage_round_trip() {
        let block = Block::mine(
            String::new(),
            1,
            1,
            vec![Transaction::new_coinbase("miner", 10, 1).unwrap()],
        )
        .unwrap();

        let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.calculate_hash().unwrap(), block.get_hash());
    }

    #[test]
    fn test_hash_depends_on_nonce_and_timestamp() {
        let mut block = Block::new_test_block(1_000, "", 1, 0);
        let original = block.calculate_hash().unwrap();

        block.set_attempt(1, 1_000);
        let by_nonce = block.calculate_hash().unwrap();
        block.set_attempt(0, 1_001);
        let by_timestamp = block.calculate_hash().unwrap();

        assert_ne!(original, by_nonce);
        assert_ne!(original, by_timestamp);
        assert_ne!(by_nonce, by_timestamp);
    }

    #[test]
    fn test_json_omits_nothing_needed_for_replay() {
        let block = Block::new_test_block(1_000, "", 1, 0);
        let json = serde_json::to_string(&block).unwrap();
        let decoded: Block = serde_json::from_str(&json).unwrap();

        assert!(json.contains("\"prevHash\""));
        assert_eq!(decoded, block);
    }
}
