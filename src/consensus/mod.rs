// Consensus and validation logic

pub mod pow;
pub mod validation;

pub use pow::{CancelFlag, MiningResult, ProofOfWork, Target, DEFAULT_DIFFICULTY_BITS};
pub use validation::{BlockValidator, TransactionValidator, ValidationError};
