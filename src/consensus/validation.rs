// Block and transaction validation

use crate::consensus::pow::ProofOfWork;
use crate::core::{Block, Hash256, Transaction};
use thiserror::Error;

/// Blocks stamped further than this into the future are refused
const MAX_FUTURE_DRIFT_SECS: i64 = 2 * 60 * 60;

/// Why a block or transaction was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("block hash does not meet the proof-of-work target")]
    InvalidProofOfWork,

    #[error("declared hash {declared} does not match computed {computed}")]
    HashMismatch { declared: Hash256, computed: Hash256 },

    #[error("block index {index} does not follow parent index {parent}")]
    InvalidIndex { index: u64, parent: u64 },

    #[error("genesis block must have index 0, got {0}")]
    InvalidGenesis(u64),

    #[error("chain is not linked at block {0}")]
    BrokenLink(Hash256),

    #[error("block timestamp is too far in the future")]
    InvalidTimestamp,

    #[error("block has no transactions")]
    NoTransactions,

    #[error("first transaction is not a coinbase")]
    MissingCoinbase,

    #[error("coinbase transaction outside first position")]
    CoinbaseNotFirst,

    #[error("transaction has no inputs or outputs")]
    EmptyTransaction,

    #[error("coinbase transaction cannot be relayed")]
    UnexpectedCoinbase,

    #[error("transaction {0} id does not match its contents")]
    TransactionIdMismatch(Hash256),

    #[error("source transaction {0} not found")]
    MissingSource(Hash256),

    #[error("output {index} does not exist in transaction {tx}")]
    OutputIndexOutOfRange { tx: Hash256, index: i32 },

    #[error("input {input} public key does not own the spent output")]
    KeyMismatch { input: usize },

    #[error("input {input} carries a malformed public key")]
    InvalidPublicKey { input: usize },

    #[error("input {input} signature is invalid")]
    InvalidSignature { input: usize },

    #[error("output {tx}:{index} is spent twice")]
    DoubleSpend { tx: Hash256, index: i32 },

    #[error("transaction values overflow")]
    ValueOverflow,

    #[error("outputs total {outputs} exceeds inputs total {inputs}")]
    OutputsExceedInputs { inputs: u64, outputs: u64 },

    #[error("coinbase pays {value}, more than the subsidy of {max}")]
    ExcessiveCoinbase { value: u64, max: u64 },
}

/// Context-free block checks
pub struct BlockValidator {
    pow: ProofOfWork,
}

impl BlockValidator {
    pub fn new(pow: ProofOfWork) -> Self {
        Self { pow }
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    /// Proof of work, declared hash and timestamp
    pub fn validate_header(&self, block: &Block) -> Result<(), ValidationError> {
        if !self.pow.validate(block) {
            return Err(ValidationError::InvalidProofOfWork);
        }

        let computed = self.pow.compute_hash(block, block.nonce);
        if computed != block.hash {
            return Err(ValidationError::HashMismatch {
                declared: block.hash,
                computed,
            });
        }

        if block.is_genesis() && block.index != 0 {
            return Err(ValidationError::InvalidGenesis(block.index));
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default();
        if block.timestamp > now + MAX_FUTURE_DRIFT_SECS {
            return Err(ValidationError::InvalidTimestamp);
        }

        Ok(())
    }

    /// Header checks plus transaction structure
    pub fn validate_block(&self, block: &Block) -> Result<(), ValidationError> {
        self.validate_header(block)?;
        block.check_transactions()
    }
}

/// Transaction validator (for mempool validation)
pub struct TransactionValidator;

impl TransactionValidator {
    /// Shape checks before the signature check against the chain
    pub fn validate_for_mempool(tx: &Transaction) -> Result<(), ValidationError> {
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(ValidationError::EmptyTransaction);
        }
        if tx.is_coinbase() {
            return Err(ValidationError::UnexpectedCoinbase);
        }
        tx.check_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::pow::CancelFlag;
    use crate::core::{TxInput, TxOutput};

    fn sealed_block(pow: &ProofOfWork, index: u64, prev_hash: Hash256) -> Block {
        let coinbase = Transaction::coinbase([1; 20], format!("block {}", index).into_bytes());
        let mut block = Block::candidate(index, prev_hash, vec![coinbase]);
        let result = pow.seal(&block, &CancelFlag::new()).unwrap();
        block.nonce = result.nonce;
        block.hash = result.hash;
        block
    }

    #[test]
    fn test_validate_sealed_block() {
        let pow = ProofOfWork::new(8);
        let validator = BlockValidator::new(pow.clone());

        let block = sealed_block(&pow, 0, Hash256::zero());
        assert!(validator.validate_block(&block).is_ok());
    }

    #[test]
    fn test_wrong_nonce_rejected() {
        let pow = ProofOfWork::new(8);
        let validator = BlockValidator::new(pow.clone());

        let mut block = sealed_block(&pow, 0, Hash256::zero());
        // find a nonce that misses the target
        let losing_nonce = (0u64..)
            .find(|nonce| !pow.is_below_target(&pow.compute_hash(&block, *nonce)))
            .unwrap();
        block.nonce = losing_nonce;
        assert_eq!(validator.validate_block(&block), Err(ValidationError::InvalidProofOfWork));
    }

    #[test]
    fn test_declared_hash_must_match() {
        let pow = ProofOfWork::new(8);
        let validator = BlockValidator::new(pow.clone());

        let mut block = sealed_block(&pow, 0, Hash256::zero());
        block.hash = Hash256::zero();
        assert!(matches!(
            validator.validate_block(&block),
            Err(ValidationError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_genesis_index_must_be_zero() {
        let pow = ProofOfWork::new(8);
        let validator = BlockValidator::new(pow.clone());

        let block = sealed_block(&pow, 5, Hash256::zero());
        assert_eq!(validator.validate_block(&block), Err(ValidationError::InvalidGenesis(5)));
    }

    #[test]
    fn test_validate_mempool_transaction() {
        let tx = Transaction::new(
            vec![TxInput::new(Hash256::new([1; 32]), 0)],
            vec![TxOutput::new(1000, [4; 20])],
        );
        assert!(TransactionValidator::validate_for_mempool(&tx).is_ok());

        let coinbase = Transaction::coinbase([1; 20], vec![1, 2, 3]);
        assert_eq!(
            TransactionValidator::validate_for_mempool(&coinbase),
            Err(ValidationError::UnexpectedCoinbase)
        );

        let empty = Transaction::new(vec![], vec![]);
        assert_eq!(
            TransactionValidator::validate_for_mempool(&empty),
            Err(ValidationError::EmptyTransaction)
        );
    }
}
