// Transaction data structures, signing and verification

use crate::consensus::ValidationError;
use crate::core::{sha256, hash160, Hash256, KeyHash, Serializable, CodecError};
use super::serialize::{write_varint, write_var_bytes, read_var_bytes, read_count, read_array, read_hash};
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use std::collections::{HashMap, HashSet};
use std::io::Read;

/// Output index carried by the single coinbase input
pub const COINBASE_OUTPUT_INDEX: i32 = -1;

/// Reward paid by every coinbase transaction
pub const SUBSIDY: u64 = 50;

/// Length of an encoded public key (uncompressed X‖Y, no prefix byte)
pub const PUBLIC_KEY_LEN: usize = 64;

/// Transaction input - references an output of an earlier transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction holding the spent output
    pub source_tx_id: Hash256,
    /// Index of the output in the source transaction
    pub output_index: i32,
    /// r‖s, 64 bytes once signed
    pub signature: Vec<u8>,
    /// X‖Y public key once signed; free-form data on a coinbase input
    pub unlock_key: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input
    pub fn new(source_tx_id: Hash256, output_index: i32) -> Self {
        Self {
            source_tx_id,
            output_index,
            signature: Vec::new(),
            unlock_key: Vec::new(),
        }
    }

    /// Create a coinbase input carrying arbitrary data
    pub fn coinbase(data: Vec<u8>) -> Self {
        Self {
            source_tx_id: Hash256::zero(),
            output_index: COINBASE_OUTPUT_INDEX,
            signature: Vec::new(),
            unlock_key: data,
        }
    }

    /// Check if this is a coinbase input
    pub fn is_coinbase(&self) -> bool {
        self.source_tx_id.is_zero() && self.output_index == COINBASE_OUTPUT_INDEX
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.source_tx_id.as_bytes());
        buf.extend_from_slice(&self.output_index.to_le_bytes());
        write_var_bytes(buf, &self.signature);
        write_var_bytes(buf, &self.unlock_key);
    }

    fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            source_tx_id: read_hash(reader)?,
            output_index: i32::from_le_bytes(read_array(reader)?),
            signature: read_var_bytes(reader)?,
            unlock_key: read_var_bytes(reader)?,
        })
    }
}

/// Transaction output - an amount locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub owner_key_hash: KeyHash,
}

impl TxOutput {
    pub fn new(value: u64, owner_key_hash: KeyHash) -> Self {
        Self { value, owner_key_hash }
    }

    pub fn is_locked_with(&self, key_hash: &KeyHash) -> bool {
        &self.owner_key_hash == key_hash
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(&self.owner_key_hash);
    }

    fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            value: u64::from_le_bytes(read_array(reader)?),
            owner_key_hash: read_array(reader)?,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a transaction and assign its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Create a coinbase transaction paying the subsidy to `owner`
    pub fn coinbase(owner: KeyHash, data: Vec<u8>) -> Self {
        Self::new(
            vec![TxInput::coinbase(data)],
            vec![TxOutput::new(SUBSIDY, owner)],
        )
    }

    /// Check if this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Hash of the canonical encoding with signatures and unlock keys removed.
    /// Signing fills in exactly those fields, so the id never moves.
    /// Coinbase data is not a key and stays in.
    pub fn compute_id(&self) -> Hash256 {
        let view = if self.is_coinbase() {
            let mut view = self.clone();
            view.inputs[0].signature.clear();
            view
        } else {
            self.trimmed_copy()
        };
        sha256(&view.encode_body())
    }

    /// Recompute the id and compare with the stored one
    pub fn check_id(&self) -> Result<(), ValidationError> {
        if self.compute_id() != self.id {
            return Err(ValidationError::TransactionIdMismatch(self.id));
        }
        Ok(())
    }

    /// Copy with every input's signature and unlock key cleared
    pub fn trimmed_copy(&self) -> Self {
        Self {
            id: self.id,
            inputs: self
                .inputs
                .iter()
                .map(|input| TxInput::new(input.source_tx_id, input.output_index))
                .collect(),
            outputs: self.outputs.clone(),
        }
    }

    /// Total output value; a sum that overflows is invalid
    pub fn total_output_value(&self) -> Result<u64, ValidationError> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, out| total.checked_add(out.value))
            .ok_or(ValidationError::ValueOverflow)
    }

    /// Ids of the transactions this one spends from
    pub fn source_ids(&self) -> impl Iterator<Item = Hash256> + '_ {
        self.inputs
            .iter()
            .filter(|input| !input.is_coinbase())
            .map(|input| input.source_tx_id)
    }

    /// Sign every input with `secret_key`.
    /// `sources` must hold each transaction referenced by an input.
    pub fn sign(
        &mut self,
        secret_key: &SecretKey,
        sources: &HashMap<Hash256, Transaction>,
    ) -> Result<(), ValidationError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let secp = Secp256k1::new();
        let public_key = encode_public_key(&PublicKey::from_secret_key(&secp, secret_key));
        let mut trimmed = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let owner = referenced_output(&self.inputs[index], sources)?.owner_key_hash;
            let digest = input_digest(&mut trimmed, index, &owner);

            let message = Message::from_digest(*digest.as_bytes());
            let signature = secp.sign_ecdsa(&message, secret_key);

            self.inputs[index].signature = signature.serialize_compact().to_vec();
            self.inputs[index].unlock_key = public_key.to_vec();
        }

        Ok(())
    }

    /// Verify the signature of every input against the output it spends,
    /// and that the spent outputs cover what this transaction creates
    pub fn verify(&self, sources: &HashMap<Hash256, Transaction>) -> Result<(), ValidationError> {
        if self.is_coinbase() {
            return Ok(());
        }
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(ValidationError::EmptyTransaction);
        }

        let secp = Secp256k1::verification_only();
        let mut trimmed = self.trimmed_copy();
        let mut claimed = HashSet::new();
        let mut input_total = 0u64;

        for (index, input) in self.inputs.iter().enumerate() {
            if !claimed.insert((input.source_tx_id, input.output_index)) {
                return Err(ValidationError::DoubleSpend {
                    tx: input.source_tx_id,
                    index: input.output_index,
                });
            }

            let spent = referenced_output(input, sources)?;
            input_total = input_total
                .checked_add(spent.value)
                .ok_or(ValidationError::ValueOverflow)?;
            let owner = spent.owner_key_hash;

            if hash160(&input.unlock_key) != owner {
                return Err(ValidationError::KeyMismatch { input: index });
            }

            let public_key = decode_public_key(&input.unlock_key)
                .map_err(|_| ValidationError::InvalidPublicKey { input: index })?;
            let signature = Signature::from_compact(&input.signature)
                .map_err(|_| ValidationError::InvalidSignature { input: index })?;

            let digest = input_digest(&mut trimmed, index, &owner);
            let message = Message::from_digest(*digest.as_bytes());

            secp.verify_ecdsa(&message, &signature, &public_key)
                .map_err(|_| ValidationError::InvalidSignature { input: index })?;
        }

        let output_total = self.total_output_value()?;
        if output_total > input_total {
            return Err(ValidationError::OutputsExceedInputs {
                inputs: input_total,
                outputs: output_total,
            });
        }

        Ok(())
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_body(&mut buf);
        buf
    }

    fn write_body(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write(buf);
        }

        write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write(buf);
        }
    }
}

/// Digest signed for input `index`: the trimmed copy with that input's unlock key
/// temporarily set to the owner of the output it spends
fn input_digest(trimmed: &mut Transaction, index: usize, owner: &KeyHash) -> Hash256 {
    trimmed.inputs[index].unlock_key = owner.to_vec();
    let digest = sha256(&trimmed.encode_body());
    trimmed.inputs[index].unlock_key.clear();
    digest
}

/// Output spent by `input`, looked up in `sources`
fn referenced_output<'a>(
    input: &TxInput,
    sources: &'a HashMap<Hash256, Transaction>,
) -> Result<&'a TxOutput, ValidationError> {
    let source = sources
        .get(&input.source_tx_id)
        .ok_or(ValidationError::MissingSource(input.source_tx_id))?;

    usize::try_from(input.output_index)
        .ok()
        .and_then(|index| source.outputs.get(index))
        .ok_or(ValidationError::OutputIndexOutOfRange {
            tx: input.source_tx_id,
            index: input.output_index,
        })
}

/// X‖Y halves of an uncompressed point
pub fn encode_public_key(public_key: &PublicKey) -> [u8; PUBLIC_KEY_LEN] {
    let uncompressed = public_key.serialize_uncompressed();
    let mut bytes = [0u8; PUBLIC_KEY_LEN];
    bytes.copy_from_slice(&uncompressed[1..]);
    bytes
}

/// Rebuild a public key from its X‖Y halves
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey, secp256k1::Error> {
    if bytes.len() != PUBLIC_KEY_LEN {
        return Err(secp256k1::Error::InvalidPublicKey);
    }
    let mut uncompressed = [0u8; PUBLIC_KEY_LEN + 1];
    uncompressed[0] = 0x04;
    uncompressed[1..].copy_from_slice(bytes);
    PublicKey::from_slice(&uncompressed)
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.id.as_bytes());
        self.write_body(&mut buf);
        buf
    }

    fn from_reader<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        let id = read_hash(reader)?;

        let input_count = read_count(reader)?;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            inputs.push(TxInput::read(reader)?);
        }

        let output_count = read_count(reader)?;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOutput::read(reader)?);
        }

        Ok(Self { id, inputs, outputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::rand::rngs::OsRng;

    fn keypair() -> (SecretKey, KeyHash) {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = encode_public_key(&secret_key.public_key(&secp));
        (secret_key, hash160(&public_key))
    }

    /// A coinbase to `owner` plus an unsigned spend of it to `to`
    fn funded_spend(owner: KeyHash, to: KeyHash) -> (Transaction, HashMap<Hash256, Transaction>) {
        let source = Transaction::coinbase(owner, b"test reward".to_vec());
        let spend = Transaction::new(
            vec![TxInput::new(source.id, 0)],
            vec![TxOutput::new(30, to), TxOutput::new(20, owner)],
        );
        let mut sources = HashMap::new();
        sources.insert(source.id, source);
        (spend, sources)
    }

    #[test]
    fn test_coinbase_transaction() {
        let tx = Transaction::coinbase([7; 20], b"hello".to_vec());

        assert!(tx.is_coinbase());
        assert_eq!(tx.inputs[0].output_index, COINBASE_OUTPUT_INDEX);
        assert_eq!(tx.outputs[0].value, SUBSIDY);
        assert!(tx.verify(&HashMap::new()).is_ok());
        assert!(tx.check_id().is_ok());
    }

    #[test]
    fn test_coinbase_ids_differ_by_data() {
        let a = Transaction::coinbase([7; 20], b"block one".to_vec());
        let b = Transaction::coinbase([7; 20], b"block two".to_vec());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_transaction_serialization() {
        let (owner_key, owner) = keypair();
        let (mut tx, sources) = funded_spend(owner, [9; 20]);
        tx.sign(&owner_key, &sources).unwrap();

        let serialized = tx.serialize();
        let deserialized = Transaction::deserialize(&serialized).unwrap();
        assert_eq!(tx, deserialized);
    }

    #[test]
    fn test_id_stable_across_signing() {
        let (owner_key, owner) = keypair();
        let (mut tx, sources) = funded_spend(owner, [9; 20]);
        let id_before = tx.id;

        tx.sign(&owner_key, &sources).unwrap();

        assert_eq!(tx.id, id_before);
        assert_eq!(tx.compute_id(), id_before);
        assert_eq!(tx.inputs[0].signature.len(), 64);
        assert_eq!(tx.inputs[0].unlock_key.len(), PUBLIC_KEY_LEN);
    }

    #[test]
    fn test_sign_then_verify() {
        let (owner_key, owner) = keypair();
        let (mut tx, sources) = funded_spend(owner, [9; 20]);

        tx.sign(&owner_key, &sources).unwrap();
        assert!(tx.verify(&sources).is_ok());
    }

    #[test]
    fn test_verify_unsigned_fails() {
        let (_, owner) = keypair();
        let (tx, sources) = funded_spend(owner, [9; 20]);
        assert!(tx.verify(&sources).is_err());
    }

    #[test]
    fn test_each_input_signed_independently() {
        let (owner_key, owner) = keypair();
        let first = Transaction::coinbase(owner, b"one".to_vec());
        let second = Transaction::coinbase(owner, b"two".to_vec());
        let mut tx = Transaction::new(
            vec![TxInput::new(first.id, 0), TxInput::new(second.id, 0)],
            vec![TxOutput::new(100, [3; 20])],
        );
        let sources: HashMap<_, _> = [(first.id, first), (second.id, second)].into_iter().collect();

        tx.sign(&owner_key, &sources).unwrap();
        assert_ne!(tx.inputs[0].signature, tx.inputs[1].signature);
        assert!(tx.verify(&sources).is_ok());

        // Each signature only covers its own input
        let first_signature = tx.inputs[0].signature.clone();
        tx.inputs[0].signature = tx.inputs[1].signature.clone();
        tx.inputs[1].signature = first_signature;
        assert!(tx.verify(&sources).is_err());
    }

    #[test]
    fn test_flipped_bytes_fail_verification() {
        let (owner_key, owner) = keypair();
        let (mut signed, sources) = funded_spend(owner, [9; 20]);
        signed.sign(&owner_key, &sources).unwrap();

        let mut tampered = signed.clone();
        tampered.outputs[0].value ^= 1;
        assert!(tampered.verify(&sources).is_err());

        let mut tampered = signed.clone();
        tampered.outputs[1].owner_key_hash[0] ^= 0xff;
        assert!(tampered.verify(&sources).is_err());

        let mut tampered = signed.clone();
        tampered.inputs[0].signature[10] ^= 0x01;
        assert!(tampered.verify(&sources).is_err());

        let mut tampered = signed.clone();
        tampered.inputs[0].unlock_key[5] ^= 0x01;
        assert!(tampered.verify(&sources).is_err());

        let mut tampered = signed.clone();
        tampered.inputs[0].source_tx_id.0[0] ^= 0x01;
        assert_eq!(
            tampered.verify(&sources),
            Err(ValidationError::MissingSource(tampered.inputs[0].source_tx_id))
        );

        let mut tampered = signed;
        tampered.inputs[0].output_index = 3;
        assert!(matches!(
            tampered.verify(&sources),
            Err(ValidationError::OutputIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_outputs_must_be_covered_by_inputs() {
        let (owner_key, owner) = keypair();
        let source = Transaction::coinbase(owner, b"reward".to_vec());
        let mut inflated = Transaction::new(
            vec![TxInput::new(source.id, 0)],
            vec![TxOutput::new(1_000_000, [9; 20])],
        );
        let sources: HashMap<_, _> = [(source.id, source)].into_iter().collect();

        inflated.sign(&owner_key, &sources).unwrap();
        assert_eq!(
            inflated.verify(&sources),
            Err(ValidationError::OutputsExceedInputs {
                inputs: SUBSIDY,
                outputs: 1_000_000
            })
        );
    }

    #[test]
    fn test_overflowing_outputs_rejected() {
        let (owner_key, owner) = keypair();
        let source = Transaction::coinbase(owner, b"reward".to_vec());
        let mut tx = Transaction::new(
            vec![TxInput::new(source.id, 0)],
            vec![TxOutput::new(u64::MAX, [9; 20]), TxOutput::new(2, [9; 20])],
        );
        let sources: HashMap<_, _> = [(source.id, source)].into_iter().collect();

        assert_eq!(tx.total_output_value(), Err(ValidationError::ValueOverflow));
        tx.sign(&owner_key, &sources).unwrap();
        assert_eq!(tx.verify(&sources), Err(ValidationError::ValueOverflow));
    }

    #[test]
    fn test_same_output_twice_in_one_transaction() {
        let (owner_key, owner) = keypair();
        let source = Transaction::coinbase(owner, b"reward".to_vec());
        let mut tx = Transaction::new(
            vec![TxInput::new(source.id, 0), TxInput::new(source.id, 0)],
            vec![TxOutput::new(2 * SUBSIDY, [9; 20])],
        );
        let sources: HashMap<_, _> = [(source.id, source.clone())].into_iter().collect();

        tx.sign(&owner_key, &sources).unwrap();
        assert_eq!(
            tx.verify(&sources),
            Err(ValidationError::DoubleSpend { tx: source.id, index: 0 })
        );
    }

    #[test]
    fn test_foreign_key_rejected() {
        let (_, owner) = keypair();
        let (thief_key, _) = keypair();
        let (mut tx, sources) = funded_spend(owner, [9; 20]);

        tx.sign(&thief_key, &sources).unwrap();
        assert_eq!(tx.verify(&sources), Err(ValidationError::KeyMismatch { input: 0 }));
    }

    #[test]
    fn test_sign_missing_source() {
        let (owner_key, owner) = keypair();
        let (mut tx, _) = funded_spend(owner, [9; 20]);

        assert!(matches!(
            tx.sign(&owner_key, &HashMap::new()),
            Err(ValidationError::MissingSource(_))
        ));
    }

    #[test]
    fn test_public_key_encoding() {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = secret_key.public_key(&secp);

        let bytes = encode_public_key(&public_key);
        assert_eq!(decode_public_key(&bytes).unwrap(), public_key);
        assert!(decode_public_key(&bytes[..63]).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let tx = Transaction::coinbase([1; 20], b"x".to_vec());
        let mut bytes = tx.serialize();
        bytes.push(0);
        assert!(Transaction::deserialize(&bytes).is_err());
    }
}
