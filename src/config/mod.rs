//! Configuration management
//!
//! This module handles the settings a node starts with: where it listens,
//! where it keeps its database and key, and the chain parameters that drive
//! difficulty adjustment and the mining reward.

pub mod settings;

pub use settings::{ChainParams, Config};
