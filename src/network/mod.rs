// P2P networking

mod message;
mod node;
mod peer;
mod sync;

pub use message::{
    BlockMessage, ChainMessage, EncodedBytes, GetBlocksMessage, GetChainMessage, GetDataMessage,
    InvKind, InvMessage, Message, MessageType, TxMessage, VersionMessage, COMMAND_LEN,
    MAX_FRAME_LEN, PROTOCOL_VERSION,
};
pub use node::Node;
pub use peer::{read_frame, request, send_message, write_frame, PeerRegistry};
pub use sync::SyncReport;

use crate::core::CodecError;
use crate::storage::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed block or transaction: {0}")]
    Codec(#[from] CodecError),

    #[error("timed out {0}")]
    Timeout(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
