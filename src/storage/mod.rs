//! Data storage and persistence
//!
//! Block and checkpoint persistence, the pending-transaction pool, and the
//! spendable-output view computed from both.

pub mod block_store;
pub mod memory_pool;
pub mod utxo_set;

pub use block_store::{MemoryStorage, SledStorage, Storage};
pub use memory_pool::MemoryPool;
pub use utxo_set::UTXOSet;
