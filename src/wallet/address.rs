// Base58Check addresses

use crate::core::{hash256, KeyHash};
use crate::wallet::WalletError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version byte prefixed to every address payload
pub const ADDRESS_VERSION: u8 = 0x00;

const CHECKSUM_LEN: usize = 4;
const PAYLOAD_LEN: usize = 1 + 20 + CHECKSUM_LEN;

/// Address text: base58(version ‖ key hash ‖ checksum)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Encode a public key hash
    pub fn from_key_hash(key_hash: &KeyHash) -> Self {
        let mut payload = Vec::with_capacity(PAYLOAD_LEN);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(key_hash);
        let checksum = checksum(&payload);
        payload.extend_from_slice(&checksum);

        Self(bs58::encode(payload).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the key hash, checking length, version and checksum
    pub fn key_hash(&self) -> Result<KeyHash, WalletError> {
        let invalid = || WalletError::InvalidAddress(self.0.clone());

        let payload = bs58::decode(&self.0).into_vec().map_err(|_| invalid())?;
        if payload.len() != PAYLOAD_LEN || payload[0] != ADDRESS_VERSION {
            return Err(invalid());
        }

        let (body, actual) = payload.split_at(PAYLOAD_LEN - CHECKSUM_LEN);
        if checksum(body) != actual {
            return Err(invalid());
        }

        let mut key_hash = [0u8; 20];
        key_hash.copy_from_slice(&body[1..]);
        Ok(key_hash)
    }

    pub fn is_valid(&self) -> bool {
        self.key_hash().is_ok()
    }
}

/// First four bytes of SHA256(SHA256(payload))
fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = hash256(payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest.as_bytes()[..CHECKSUM_LEN]);
    out
}

impl FromStr for Address {
    type Err = WalletError;

    /// Parses and validates
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Self(s.trim().to_string());
        address.key_hash()?;
        Ok(address)
    }
}

impl TryFrom<String> for Address {
    type Error = WalletError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
