// Key management

use crate::core::{encode_public_key, hash160, KeyHash, PUBLIC_KEY_LEN};
use crate::wallet::{Address, WalletError};
use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// On-disk form of a key pair; the public half is rederived on load
#[derive(Serialize, Deserialize)]
struct StoredKey {
    #[serde(with = "hex")]
    secret_key: [u8; 32],
}

/// Key pair
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    pub address: Address,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        Self::from_secret_key(SecretKey::new(&mut OsRng))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = secret_key.public_key(&secp);
        let address = Address::from_key_hash(&hash160(&encode_public_key(&public_key)));

        Self {
            secret_key,
            public_key,
            address,
        }
    }

    /// X‖Y public key bytes
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        encode_public_key(&self.public_key)
    }

    pub fn key_hash(&self) -> KeyHash {
        hash160(&self.public_key_bytes())
    }
}

/// Keystore - manages multiple key pairs
#[derive(Default)]
pub struct Keystore {
    keys: BTreeMap<Address, KeyPair>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a key pair and return its address
    pub fn new_address(&mut self) -> Address {
        let keypair = KeyPair::generate();
        let address = keypair.address.clone();
        self.keys.insert(address.clone(), keypair);
        address
    }

    pub fn get_keypair(&self, address: &Address) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    /// Key pair for `address`, or UnknownAddress
    pub fn require(&self, address: &Address) -> Result<&KeyPair, WalletError> {
        self.get_keypair(address)
            .ok_or_else(|| WalletError::UnknownAddress(address.clone()))
    }

    /// Addresses in sorted order
    pub fn list_addresses(&self) -> Vec<Address> {
        self.keys.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Save keystore to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), WalletError> {
        let stored: BTreeMap<&Address, StoredKey> = self
            .keys
            .iter()
            .map(|(address, keypair)| {
                (address, StoredKey {
                    secret_key: keypair.secret_key.secret_bytes(),
                })
            })
            .collect();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&stored)?)?;
        Ok(())
    }

    /// Load keystore from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let json = fs::read_to_string(path)?;
        let stored: BTreeMap<Address, StoredKey> = serde_json::from_str(&json)?;

        let mut keys = BTreeMap::new();
        for (address, key) in stored {
            let keypair = KeyPair::from_secret_key(SecretKey::from_slice(&key.secret_key)?);
            if keypair.address != address {
                return Err(WalletError::InvalidAddress(format!(
                    "{} does not match its stored key",
                    address
                )));
            }
            keys.insert(address, keypair);
        }

        Ok(Self { keys })
    }

    /// Load the file if it exists, else start empty
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}
