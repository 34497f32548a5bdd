// Storage layer: block store, chain ledger and UTXO queries

mod blockchain_db;
mod ledger;
mod utxo;

pub use blockchain_db::BlockchainDB;
pub use ledger::{coinbase_data, ChainIter, Ledger, GENESIS_COINBASE_DATA};
pub use utxo::{OutPoint, SpendableOutputs, UnspentOutput};

use crate::consensus::ValidationError;
use crate::core::{CodecError, Hash256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("stored data is unreadable: {0}")]
    Codec(#[from] CodecError),

    #[error("stored data is corrupted: {0}")]
    Corrupted(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no existing chain found, create one first")]
    NoChain,

    #[error("block {0} not found")]
    BlockNotFound(Hash256),

    #[error("transaction {0} not found")]
    TransactionNotFound(Hash256),

    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("mining was cancelled")]
    MiningCancelled,
}
