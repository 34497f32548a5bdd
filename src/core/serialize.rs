// Binary codec for blocks and transactions

use crate::core::Hash256;
use std::io::{self, Cursor, Read};
use thiserror::Error;

/// Upper bound for any length prefix read from untrusted bytes
const MAX_VAR_LEN: u64 = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of data: {0}")]
    Io(#[from] io::Error),

    #[error("invalid encoding: {0}")]
    Invalid(String),
}

/// Trait for types with a canonical binary form
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;

    fn from_reader<R: Read>(reader: &mut R) -> Result<Self, CodecError>
    where
        Self: Sized;

    /// Decode a complete buffer; trailing bytes are an error
    fn deserialize(data: &[u8]) -> Result<Self, CodecError>
    where
        Self: Sized,
    {
        let mut cursor = Cursor::new(data);
        let value = Self::from_reader(&mut cursor)?;
        if cursor.position() as usize != data.len() {
            return Err(CodecError::Invalid(format!(
                "{} trailing bytes",
                data.len() - cursor.position() as usize
            )));
        }
        Ok(value)
    }
}

/// Write a variable-length integer (VarInt)
pub fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x10000..=0xffffffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Read a variable-length integer (VarInt)
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> Result<u64, CodecError> {
    let [first] = read_array::<1, R>(reader)?;

    let value = match first {
        0..=0xfc => first as u64,
        0xfd => u16::from_le_bytes(read_array(reader)?) as u64,
        0xfe => u32::from_le_bytes(read_array(reader)?) as u64,
        0xff => u64::from_le_bytes(read_array(reader)?),
    };
    Ok(value)
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Read bytes with length prefix
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>, CodecError> {
    let len = read_varint(reader)?;
    if len > MAX_VAR_LEN {
        return Err(CodecError::Invalid(format!("length prefix {} too large", len)));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Read a collection count, bounded so a corrupt prefix cannot force a huge allocation
pub fn read_count<R: Read + ?Sized>(reader: &mut R) -> Result<usize, CodecError> {
    let count = read_varint(reader)?;
    if count > MAX_VAR_LEN {
        return Err(CodecError::Invalid(format!("item count {} too large", count)));
    }
    Ok(count as usize)
}

pub fn read_array<const N: usize, R: Read + ?Sized>(reader: &mut R) -> Result<[u8; N], CodecError> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

pub fn read_hash<R: Read + ?Sized>(reader: &mut R) -> Result<Hash256, CodecError> {
    Ok(Hash256::new(read_array(reader)?))
}
