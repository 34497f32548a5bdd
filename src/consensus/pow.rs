// Proof of Work implementation

use crate::core::{sha256, Block, Hash256};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Difficulty used when none is configured
pub const DEFAULT_DIFFICULTY_BITS: u32 = 16;

/// Largest difficulty that still leaves a non-zero target
pub const MAX_DIFFICULTY_BITS: u32 = 255;

/// Nonces tried between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Difficulty target: 2^(256 - bits) as a big-endian 256-bit integer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub bits: u32,
    bytes: [u8; 32],
}

impl Target {
    /// Bits are clamped to 1..=255
    pub fn from_bits(bits: u32) -> Self {
        let bits = bits.clamp(1, MAX_DIFFICULTY_BITS);
        let exponent = (256 - bits) as usize;

        let mut bytes = [0u8; 32];
        bytes[31 - exponent / 8] = 1 << (exponent % 8);

        Self { bits, bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Check if a hash meets this target (hash < target)
    pub fn is_met_by(&self, hash: &Hash256) -> bool {
        // Equal-length big-endian arrays compare like the integers they encode
        hash.as_bytes() < &self.bytes
    }
}

/// Cooperative stop signal for a running nonce search
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Proof-of-work engine with a fixed difficulty
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    target: Target,
}

impl ProofOfWork {
    pub fn new(bits: u32) -> Self {
        Self {
            target: Target::from_bits(bits),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn difficulty_bits(&self) -> u32 {
        self.target.bits
    }

    /// SHA256(prev_hash ‖ tx_digest ‖ timestamp ‖ bits ‖ nonce), numbers as decimal text
    pub fn compute_hash(&self, block: &Block, nonce: u64) -> Hash256 {
        let mut data = self.prepare_prefix(block);
        data.extend_from_slice(nonce.to_string().as_bytes());
        sha256(&data)
    }

    fn prepare_prefix(&self, block: &Block) -> Vec<u8> {
        let mut data = Vec::with_capacity(96);
        data.extend_from_slice(block.prev_hash.as_bytes());
        data.extend_from_slice(block.hash_transactions().as_bytes());
        data.extend_from_slice(block.timestamp.to_string().as_bytes());
        data.extend_from_slice(self.target.bits.to_string().as_bytes());
        data
    }

    pub fn is_below_target(&self, hash: &Hash256) -> bool {
        self.target.is_met_by(hash)
    }

    /// Search nonces from 0 until the hash falls below the target.
    /// Returns None only when `cancel` is raised.
    pub fn seal(&self, block: &Block, cancel: &CancelFlag) -> Option<MiningResult> {
        let start_time = Instant::now();
        let prefix = self.prepare_prefix(block);
        let mut data = Vec::with_capacity(prefix.len() + 20);
        let mut nonce = 0u64;

        loop {
            data.clear();
            data.extend_from_slice(&prefix);
            data.extend_from_slice(nonce.to_string().as_bytes());
            let hash = sha256(&data);

            if self.target.is_met_by(&hash) {
                return Some(MiningResult {
                    nonce,
                    hash,
                    attempts: nonce + 1,
                    duration: start_time.elapsed(),
                });
            }

            nonce += 1;

            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                log::debug!("Nonce search cancelled after {} attempts", nonce);
                return None;
            }

            if nonce % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!("Mining attempts: {} ({:.1} KH/s)",
                    nonce,
                    nonce as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }
        }
    }

    /// Recompute the hash from the stored nonce and compare with the target
    pub fn validate(&self, block: &Block) -> bool {
        self.is_below_target(&self.compute_hash(block, block.nonce))
    }
}

/// Mining result
#[derive(Debug, Clone)]
pub struct MiningResult {
    pub nonce: u64,
    pub hash: Hash256,
    pub attempts: u64,
    pub duration: Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64().max(f64::EPSILON)
    }
}
