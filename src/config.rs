// Node configuration

use crate::consensus::pow::{DEFAULT_DIFFICULTY_BITS, MAX_DIFFICULTY_BITS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Holds the chain database and the keystore
    pub data_dir: PathBuf,
    /// Address this node listens on and advertises to peers
    pub listen_addr: String,
    /// Peers known at startup; the first one is contacted on start
    pub peers: Vec<String>,
    pub difficulty_bits: u32,
    /// Pooled transactions that trigger mining on a miner node
    pub mine_threshold: usize,
    pub sync_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            listen_addr: "127.0.0.1:3000".to_string(),
            peers: Vec::new(),
            difficulty_bits: DEFAULT_DIFFICULTY_BITS,
            mine_threshold: 2,
            sync_timeout_secs: 10,
            connect_timeout_secs: 5,
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file; absent fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_DIFFICULTY_BITS).contains(&self.difficulty_bits) {
            return Err(ConfigError::Invalid(format!(
                "difficulty_bits must be in 1..={}, got {}",
                MAX_DIFFICULTY_BITS, self.difficulty_bits
            )));
        }
        if self.sync_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        if self.mine_threshold == 0 {
            return Err(ConfigError::Invalid("mine_threshold must be at least 1".to_string()));
        }
        if self.listen_addr.is_empty() {
            return Err(ConfigError::Invalid("listen_addr is empty".to_string()));
        }
        Ok(())
    }

    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join("chain")
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join("wallets.json")
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
