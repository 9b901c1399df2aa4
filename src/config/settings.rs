use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_DB_PATH: &str = "data";
const DEFAULT_WALLET_PATH: &str = "node.wallet";

const NODE_PORT_KEY: &str = "NODE_PORT";
const NODE_DB_PATH_KEY: &str = "NODE_DB_PATH";
const NODE_WALLET_PATH_KEY: &str = "NODE_WALLET_PATH";

/// Parameters that shape the chain itself and must agree across nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    /// Difficulty used for genesis and whenever no adjustment applies
    pub default_difficulty: u32,
    /// Difficulty is recalculated when the height is a multiple of this
    pub difficulty_interval: u64,
    pub target_minutes_per_block: i64,
    pub tolerance_minutes: i64,
    pub miner_reward: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            default_difficulty: 2,
            difficulty_interval: 5,
            target_minutes_per_block: 2,
            tolerance_minutes: 1,
            miner_reward: 10,
        }
    }
}

/// Node configuration, built once by the entry point and passed down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    pub wallet_path: String,
    pub chain: ChainParams,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            db_path: String::from(DEFAULT_DB_PATH),
            wallet_path: String::from(DEFAULT_WALLET_PATH),
            chain: ChainParams::default(),
        }
    }
}

impl Config {
    /// Defaults overlaid with a TOML file (when present) and then the environment
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_toml_str(&fs::read_to_string(path)?)?,
            _ => Config::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Config> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = env::var(NODE_PORT_KEY) {
            self.port = port
                .parse()
                .map_err(|e| BlockchainError::Config(format!("Invalid {NODE_PORT_KEY}: {e}")))?;
        }
        if let Ok(path) = env::var(NODE_DB_PATH_KEY) {
            self.db_path = path;
        }
        if let Ok(path) = env::var(NODE_WALLET_PATH_KEY) {
            self.wallet_path = path;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.chain.difficulty_interval < 2 {
            return Err(BlockchainError::Config(
                "difficulty_interval must be at least 2".to_string(),
            ));
        }
        if self.chain.tolerance_minutes < 0 {
            return Err(BlockchainError::Config(
                "tolerance_minutes must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Database directory for this node; the port keeps several local nodes apart
    pub fn node_db_path(&self) -> String {
        Path::new(&self.db_path)
            .join(format!("node_{}", self.port))
            .to_string_lossy()
            .to_string()
    }
}
