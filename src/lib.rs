//! # pow-ledger
//!
//! A small proof-of-work ledger node: an append-only chain of blocks carrying
//! signed transfers, mined under a difficulty that adjusts every few blocks,
//! with balances derived from unspent outputs and a gossip protocol that
//! keeps peers on the longest chain.
//!
//! ## Layout
//! - `core/`: blocks, transactions, proof-of-work, difficulty, and the chain state machine
//! - `storage/`: the byte-store boundary (sled and in-memory), the pending pool, the UTXO view
//! - `wallet/`: the signing boundary and the file-backed ECDSA P-256 wallet
//! - `network/`: wire messages, the peer registry, and the TCP server
//! - `api/`: what an outer layer may ask of a running node
//! - `config/`: node settings and chain parameters
//! - `utils/`: hashing, signatures, timestamps, bincode helpers
//! - `cli/`: argument parsing for the binary
//!
//! Nothing is global: the entry point builds one chain, one pool, one peer
//! registry, and one wallet, and hands them to whatever needs them.

pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

pub use api::NodeApi;
pub use cli::{Command, Opt, PeerArg};
pub use config::{ChainParams, Config};
pub use core::{
    Block, Blockchain, DifficultyAdjustment, ProofOfWork, Transaction, TxIn, TxOut, UTxOut,
};
pub use error::{BlockchainError, Result};
pub use network::{Message, MessageKind, PeerRegistry, Server};
pub use storage::{MemoryPool, MemoryStorage, SledStorage, Storage, UTXOSet};
pub use utils::{current_timestamp, sha256_digest, sha256_hex};
pub use wallet::{verify, KeyWallet, Wallet};
