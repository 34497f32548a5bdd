// Wallet: addresses, keys and transaction building

mod address;
mod keystore;
mod tx_builder;

pub use address::{Address, ADDRESS_VERSION};
pub use keystore::{KeyPair, Keystore};
pub use tx_builder::TransactionBuilder;

use crate::storage::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("address {0} is not in the keystore")]
    UnknownAddress(Address),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(#[from] secp256k1::Error),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("keystore file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("keystore format error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
