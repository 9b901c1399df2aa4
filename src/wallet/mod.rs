//! Wallet boundary
//!
//! The ledger only needs three things from a wallet: the node's own address,
//! a signature over a transaction id, and a way to check someone else's
//! signature against their address. Key material never leaves the wallet.

#[allow(clippy::module_inception)]
pub mod wallet;

pub use wallet::{verify, KeyWallet, Wallet};
