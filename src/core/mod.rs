//! Core ledger functionality
//!
//! Blocks, transactions, proof-of-work, difficulty adjustment, and the chain
//! state machine that ties them to storage.

pub mod block;
pub mod blockchain;
pub mod difficulty;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::Blockchain;
pub use difficulty::DifficultyAdjustment;
pub use proof_of_work::ProofOfWork;
pub use transaction::{Transaction, TxIn, TxOut, UTxOut, COINBASE_INDEX, COINBASE_MARKER};
