// Proof-of-work UTXO ledger with a peer-to-peer sync protocol

pub mod core;
pub mod consensus;
pub mod storage;
pub mod network;
pub mod wallet;
pub mod config;
pub mod cli;

// Re-exports for convenience
pub use crate::core::{Block, Hash256, Transaction, TxInput, TxOutput};
pub use consensus::{CancelFlag, ProofOfWork, BlockValidator, ValidationError};
pub use storage::{BlockchainDB, Ledger, LedgerError};
pub use network::{Message, Node, NetworkError};
pub use wallet::{Address, KeyPair, Keystore, TransactionBuilder, WalletError};
pub use config::{ConfigError, NodeConfig};
pub use cli::{Cli, CliHandler};
