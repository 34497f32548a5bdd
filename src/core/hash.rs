// Hashing utilities

use sha2::{Sha256, Digest};
use crate::core::{Hash256, KeyHash};

/// Single SHA256 hash - block hashes, transaction ids, signature digests
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256::new(Sha256::digest(data).into())
}

/// SHA256 double hash
/// hash256 = SHA256(SHA256(data)), used for address checksums
pub fn hash256(data: &[u8]) -> Hash256 {
    let first_hash = Sha256::digest(data);
    Hash256::new(Sha256::digest(first_hash).into())
}

/// RIPEMD160(SHA256(data)) - used for address generation
pub fn hash160(data: &[u8]) -> KeyHash {
    use ripemd::{Ripemd160, Digest as RipemdDigest};
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let hash = sha256(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash256_is_double_sha() {
        let once = sha256(b"hello world");
        let twice = sha256(once.as_bytes());
        assert_eq!(hash256(b"hello world"), twice);
    }

    #[test]
    fn test_hash160() {
        let hash = hash160(b"test data");
        assert_eq!(hash.len(), 20);
        assert_eq!(hash, hash160(b"test data"));
        assert_ne!(hash, hash160(b"other data"));
    }
}
