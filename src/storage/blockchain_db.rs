// Blockchain database using sled

use crate::core::{Block, Hash256, Serializable};
use crate::storage::LedgerError;
use sled::{Batch, Db};
use std::path::Path;

/// Reserved key holding the tip hash
const TIP_KEY: &[u8] = b"l";

/// Block store: block hash -> serialized block, plus the tip pointer
#[derive(Clone)]
pub struct BlockchainDB {
    db: Db,
}

impl BlockchainDB {
    /// Open (or create) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing)
    pub fn memory() -> Result<Self, LedgerError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, LedgerError> {
        match self.db.get(hash.as_bytes())? {
            Some(data) => Ok(Some(Block::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Check if a block exists
    pub fn has_block(&self, hash: &Hash256) -> Result<bool, LedgerError> {
        Ok(self.db.contains_key(hash.as_bytes())?)
    }

    /// Get the chain tip, None on an empty store
    pub fn get_tip(&self) -> Result<Option<Hash256>, LedgerError> {
        match self.db.get(TIP_KEY)? {
            Some(data) => {
                let tip = Hash256::from_slice(&data)
                    .map_err(|e| LedgerError::Corrupted(format!("tip pointer: {}", e)))?;
                Ok(Some(tip))
            }
            None => Ok(None),
        }
    }

    /// Store a block without touching the tip
    pub fn put_block(&self, block: &Block) -> Result<(), LedgerError> {
        self.db.insert(block.hash.as_bytes(), block.serialize())?;
        Ok(())
    }

    /// Store a block and move the tip to it atomically
    pub fn put_block_and_tip(&self, block: &Block) -> Result<(), LedgerError> {
        self.put_blocks_and_tip(std::slice::from_ref(block), &block.hash)
    }

    /// Store several blocks and set the tip in one batch
    pub fn put_blocks_and_tip(&self, blocks: &[Block], tip: &Hash256) -> Result<(), LedgerError> {
        let mut batch = Batch::default();
        for block in blocks {
            batch.insert(block.hash.as_bytes(), block.serialize());
        }
        batch.insert(TIP_KEY, tip.as_bytes());

        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }
}
