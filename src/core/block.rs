// Block data structures

use crate::consensus::ValidationError;
use crate::core::{sha256, Hash256, Transaction, Serializable, CodecError, SUBSIDY};
use super::serialize::{write_varint, read_count, read_array, read_hash};
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

/// Block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Height in the chain, genesis is 0
    pub index: u64,
    /// Unix seconds at creation
    pub timestamp: i64,
    /// Hash of the predecessor, zero for genesis
    pub prev_hash: Hash256,
    /// Proof-of-work nonce
    pub nonce: u64,
    pub transactions: Vec<Transaction>,
    /// Proof-of-work hash, set when the block is sealed
    pub hash: Hash256,
}

impl Block {
    /// Unsealed block on top of `prev_hash`, stamped with the current time
    pub fn candidate(index: u64, prev_hash: Hash256, transactions: Vec<Transaction>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default();

        Self {
            index,
            timestamp,
            prev_hash,
            nonce: 0,
            transactions,
            hash: Hash256::zero(),
        }
    }

    /// SHA256 over the concatenated transaction ids
    pub fn hash_transactions(&self) -> Hash256 {
        let mut ids = Vec::with_capacity(self.transactions.len() * 32);
        for tx in &self.transactions {
            ids.extend_from_slice(tx.id.as_bytes());
        }
        sha256(&ids)
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_zero()
    }

    /// Structural checks that need no chain context: exactly one coinbase, in
    /// first position and paying at most the subsidy, and every transaction id
    /// matching its contents
    pub fn check_transactions(&self) -> Result<(), ValidationError> {
        let Some(first) = self.transactions.first() else {
            return Err(ValidationError::NoTransactions);
        };
        if !first.is_coinbase() {
            return Err(ValidationError::MissingCoinbase);
        }
        let reward = first.total_output_value()?;
        if reward > SUBSIDY {
            return Err(ValidationError::ExcessiveCoinbase {
                value: reward,
                max: SUBSIDY,
            });
        }
        if self.transactions[1..].iter().any(Transaction::is_coinbase) {
            return Err(ValidationError::CoinbaseNotFirst);
        }
        for tx in &self.transactions {
            tx.check_id()?;
        }
        Ok(())
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&self.index.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(self.hash.as_bytes());

        write_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.serialize());
        }

        buf
    }

    fn from_reader<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        let index = u64::from_le_bytes(read_array(reader)?);
        let timestamp = i64::from_le_bytes(read_array(reader)?);
        let prev_hash = read_hash(reader)?;
        let nonce = u64::from_le_bytes(read_array(reader)?);
        let hash = read_hash(reader)?;

        let tx_count = read_count(reader)?;
        let mut transactions = Vec::with_capacity(tx_count.min(1024));
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(reader)?);
        }

        Ok(Self {
            index,
            timestamp,
            prev_hash,
            nonce,
            transactions,
            hash,
        })
    }
}
