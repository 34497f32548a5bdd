// Network protocol messages

use crate::core::{Block, CodecError, Hash256, Serializable, Transaction};
use crate::network::NetworkError;
use serde::{Deserialize, Serialize};

/// Width of the zero-padded command field
pub const COMMAND_LEN: usize = 12;

/// Largest frame accepted from a peer
pub const MAX_FRAME_LEN: usize = 32 * 1024 * 1024;

pub const PROTOCOL_VERSION: u32 = 1;

/// Network message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Version,
    GetBlocks,
    Inv,
    GetData,
    Block,
    Tx,
    GetChain,
    Chain,
}

impl MessageType {
    pub fn command(&self) -> &'static str {
        match self {
            MessageType::Version => "version",
            MessageType::GetBlocks => "getblocks",
            MessageType::Inv => "inv",
            MessageType::GetData => "getdata",
            MessageType::Block => "block",
            MessageType::Tx => "tx",
            MessageType::GetChain => "getchain",
            MessageType::Chain => "chain",
        }
    }

    pub fn from_command(s: &str) -> Option<Self> {
        match s {
            "version" => Some(MessageType::Version),
            "getblocks" => Some(MessageType::GetBlocks),
            "inv" => Some(MessageType::Inv),
            "getdata" => Some(MessageType::GetData),
            "block" => Some(MessageType::Block),
            "tx" => Some(MessageType::Tx),
            "getchain" => Some(MessageType::GetChain),
            "chain" => Some(MessageType::Chain),
            _ => None,
        }
    }
}

/// Inventory kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvKind {
    Block,
    Tx,
}

/// Binary-encoded block or transaction, hex inside JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedBytes(#[serde(with = "hex")] pub Vec<u8>);

impl EncodedBytes {
    pub fn encode<T: Serializable>(value: &T) -> Self {
        Self(value.serialize())
    }

    pub fn decode<T: Serializable>(&self) -> Result<T, CodecError> {
        T::deserialize(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub version: u32,
    pub best_height: u64,
    pub from_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksMessage {
    pub from_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvMessage {
    pub from_addr: String,
    pub kind: InvKind,
    pub items: Vec<Hash256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDataMessage {
    pub from_addr: String,
    pub kind: InvKind,
    pub id: Hash256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMessage {
    pub from_addr: String,
    pub block: EncodedBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMessage {
    pub from_addr: String,
    pub transaction: EncodedBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetChainMessage {
    pub from_addr: String,
}

/// Whole chain, tip first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMessage {
    pub blocks: Vec<EncodedBytes>,
}

/// Network message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    GetBlocks(GetBlocksMessage),
    Inv(InvMessage),
    GetData(GetDataMessage),
    Block(BlockMessage),
    Tx(TxMessage),
    GetChain(GetChainMessage),
    Chain(ChainMessage),
}

impl Message {
    pub fn version(from_addr: &str, best_height: u64) -> Self {
        Message::Version(VersionMessage {
            version: PROTOCOL_VERSION,
            best_height,
            from_addr: from_addr.to_string(),
        })
    }

    pub fn get_blocks(from_addr: &str) -> Self {
        Message::GetBlocks(GetBlocksMessage {
            from_addr: from_addr.to_string(),
        })
    }

    pub fn inv(from_addr: &str, kind: InvKind, items: Vec<Hash256>) -> Self {
        Message::Inv(InvMessage {
            from_addr: from_addr.to_string(),
            kind,
            items,
        })
    }

    pub fn get_data(from_addr: &str, kind: InvKind, id: Hash256) -> Self {
        Message::GetData(GetDataMessage {
            from_addr: from_addr.to_string(),
            kind,
            id,
        })
    }

    pub fn block(from_addr: &str, block: &Block) -> Self {
        Message::Block(BlockMessage {
            from_addr: from_addr.to_string(),
            block: EncodedBytes::encode(block),
        })
    }

    pub fn tx(from_addr: &str, tx: &Transaction) -> Self {
        Message::Tx(TxMessage {
            from_addr: from_addr.to_string(),
            transaction: EncodedBytes::encode(tx),
        })
    }

    pub fn get_chain(from_addr: &str) -> Self {
        Message::GetChain(GetChainMessage {
            from_addr: from_addr.to_string(),
        })
    }

    pub fn chain(blocks: &[Block]) -> Self {
        Message::Chain(ChainMessage {
            blocks: blocks.iter().map(EncodedBytes::encode).collect(),
        })
    }

    /// Get message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Version(_) => MessageType::Version,
            Message::GetBlocks(_) => MessageType::GetBlocks,
            Message::Inv(_) => MessageType::Inv,
            Message::GetData(_) => MessageType::GetData,
            Message::Block(_) => MessageType::Block,
            Message::Tx(_) => MessageType::Tx,
            Message::GetChain(_) => MessageType::GetChain,
            Message::Chain(_) => MessageType::Chain,
        }
    }

    /// Frame: 12-byte zero-padded command followed by the JSON payload
    pub fn encode(&self) -> Result<Vec<u8>, NetworkError> {
        let payload = match self {
            Message::Version(m) => serde_json::to_vec(m)?,
            Message::GetBlocks(m) => serde_json::to_vec(m)?,
            Message::Inv(m) => serde_json::to_vec(m)?,
            Message::GetData(m) => serde_json::to_vec(m)?,
            Message::Block(m) => serde_json::to_vec(m)?,
            Message::Tx(m) => serde_json::to_vec(m)?,
            Message::GetChain(m) => serde_json::to_vec(m)?,
            Message::Chain(m) => serde_json::to_vec(m)?,
        };

        let mut frame = vec![0u8; COMMAND_LEN];
        let command = self.message_type().command().as_bytes();
        frame[..command.len()].copy_from_slice(command);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Parse a complete frame
    pub fn decode(frame: &[u8]) -> Result<Self, NetworkError> {
        if frame.len() < COMMAND_LEN {
            return Err(NetworkError::Protocol(format!("frame too short: {} bytes", frame.len())));
        }
        if frame.len() > MAX_FRAME_LEN {
            return Err(NetworkError::Protocol(format!("frame too large: {} bytes", frame.len())));
        }

        let (command, payload) = frame.split_at(COMMAND_LEN);
        let end = command.iter().position(|&b| b == 0).unwrap_or(COMMAND_LEN);
        let command = std::str::from_utf8(&command[..end])
            .map_err(|_| NetworkError::Protocol("command is not ASCII".to_string()))?;

        let message_type = MessageType::from_command(command)
            .ok_or_else(|| NetworkError::Protocol(format!("unknown command '{}'", command)))?;

        Ok(match message_type {
            MessageType::Version => Message::Version(serde_json::from_slice(payload)?),
            MessageType::GetBlocks => Message::GetBlocks(serde_json::from_slice(payload)?),
            MessageType::Inv => Message::Inv(serde_json::from_slice(payload)?),
            MessageType::GetData => Message::GetData(serde_json::from_slice(payload)?),
            MessageType::Block => Message::Block(serde_json::from_slice(payload)?),
            MessageType::Tx => Message::Tx(serde_json::from_slice(payload)?),
            MessageType::GetChain => Message::GetChain(serde_json::from_slice(payload)?),
            MessageType::Chain => Message::Chain(serde_json::from_slice(payload)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_field() {
        let frame = Message::get_blocks("127.0.0.1:3000").encode().unwrap();

        assert_eq!(&frame[..9], b"getblocks");
        assert!(frame[9..COMMAND_LEN].iter().all(|&b| b == 0));
        assert_eq!(frame[COMMAND_LEN], b'{');
    }

    #[test]
    fn test_version_payload_shape() {
        let frame = Message::version("127.0.0.1:3001", 7).encode().unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&frame[COMMAND_LEN..]).unwrap();

        assert_eq!(payload["version"], PROTOCOL_VERSION);
        assert_eq!(payload["best_height"], 7);
        assert_eq!(payload["from_addr"], "127.0.0.1:3001");
    }

    #[test]
    fn test_inv_decodes() {
        let message = Message::inv("a:1", InvKind::Block, vec![Hash256::new([1; 32]), Hash256::new([2; 32])]);
        let frame = message.encode().unwrap();

        let payload: serde_json::Value = serde_json::from_slice(&frame[COMMAND_LEN..]).unwrap();
        assert_eq!(payload["kind"], "block");
        assert_eq!(payload["items"][0], "01".repeat(32));

        assert_eq!(Message::decode(&frame).unwrap(), message);
    }

    #[test]
    fn test_block_travels_as_hex() {
        let coinbase = Transaction::coinbase([1; 20], b"wire".to_vec());
        let block = Block::candidate(0, Hash256::zero(), vec![coinbase]);

        let frame = Message::block("a:1", &block).encode().unwrap();
        let Message::Block(decoded) = Message::decode(&frame).unwrap() else {
            panic!("expected a block message");
        };
        assert_eq!(decoded.block.decode::<Block>().unwrap(), block);

        let payload: serde_json::Value = serde_json::from_slice(&frame[COMMAND_LEN..]).unwrap();
        assert_eq!(payload["block"], hex::encode(block.serialize()));
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut frame = vec![0u8; COMMAND_LEN];
        frame[..4].copy_from_slice(b"ping");
        frame.extend_from_slice(b"{}");

        assert!(matches!(Message::decode(&frame), Err(NetworkError::Protocol(_))));
    }

    #[test]
    fn test_short_or_malformed_frame_rejected() {
        assert!(matches!(Message::decode(b"inv"), Err(NetworkError::Protocol(_))));

        let mut frame = Message::get_chain("a:1").encode().unwrap();
        frame.truncate(COMMAND_LEN + 3);
        assert!(matches!(Message::decode(&frame), Err(NetworkError::Json(_))));
    }
}
