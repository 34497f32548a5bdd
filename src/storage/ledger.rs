// Chain store: append, traversal and block acceptance

use crate::consensus::{BlockValidator, CancelFlag, ProofOfWork, ValidationError};
use crate::core::{Block, Hash256, KeyHash, Transaction};
use crate::storage::utxo::{claim_inputs, spent_in_chain};
use crate::storage::{BlockchainDB, LedgerError};
use crate::wallet::Address;
use secp256k1::SecretKey;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

/// Coinbase data of the first block
pub const GENESIS_COINBASE_DATA: &str = "Genesis Block";

/// Blocks kept while waiting for their parent
const MAX_ORPHANS: usize = 1024;

/// Proof-of-work chain persisted in a [`BlockchainDB`]
pub struct Ledger {
    db: BlockchainDB,
    validator: BlockValidator,
    tip: RwLock<Hash256>,
    /// Serializes every tip-read, build and tip-write sequence
    write_lock: Mutex<()>,
    /// Keyed by block hash
    orphans: Mutex<HashMap<Hash256, Block>>,
}

impl Ledger {
    /// Open the chain, creating a genesis block paying `genesis_owner` on an empty store
    pub fn open(db: BlockchainDB, pow: ProofOfWork, genesis_owner: &Address) -> Result<Self, LedgerError> {
        if db.get_tip()?.is_some() {
            return Self::load(db, pow);
        }

        let owner = genesis_owner
            .key_hash()
            .map_err(|e| LedgerError::InvalidAddress(e.to_string()))?;
        let coinbase = Transaction::coinbase(owner, GENESIS_COINBASE_DATA.as_bytes().to_vec());
        let genesis = seal(&pow, Block::candidate(0, Hash256::zero(), vec![coinbase]), &CancelFlag::new())?;

        db.put_block_and_tip(&genesis)?;
        log::info!("Created genesis block {}", genesis.hash);

        Ok(Self::with_tip(db, pow, genesis.hash))
    }

    /// Open an existing chain only
    pub fn load(db: BlockchainDB, pow: ProofOfWork) -> Result<Self, LedgerError> {
        let tip = db.get_tip()?.ok_or(LedgerError::NoChain)?;
        log::debug!("Loaded chain with tip {}", tip);
        Ok(Self::with_tip(db, pow, tip))
    }

    fn with_tip(db: BlockchainDB, pow: ProofOfWork, tip: Hash256) -> Self {
        Self {
            db,
            validator: BlockValidator::new(pow),
            tip: RwLock::new(tip),
            write_lock: Mutex::new(()),
            orphans: Mutex::new(HashMap::new()),
        }
    }

    pub fn tip(&self) -> Hash256 {
        *self.tip.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_tip(&self, hash: Hash256) {
        *self.tip.write().unwrap_or_else(PoisonError::into_inner) = hash;
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pow(&self) -> &ProofOfWork {
        self.validator.pow()
    }

    pub fn difficulty_bits(&self) -> u32 {
        self.pow().difficulty_bits()
    }

    /// Mine a block holding a coinbase to `miner` followed by `transactions`.
    /// Every transaction must verify and spend only outputs still unspent.
    pub fn append(
        &self,
        miner: &Address,
        transactions: Vec<Transaction>,
        cancel: &CancelFlag,
    ) -> Result<Block, LedgerError> {
        let owner = miner
            .key_hash()
            .map_err(|e| LedgerError::InvalidAddress(e.to_string()))?;

        let _guard = self.lock_writes();
        let tip = self.tip();
        let mut spent = spent_in_chain(ChainIter::new(&self.db, tip))?;

        for tx in &transactions {
            if tx.is_coinbase() {
                return Err(ValidationError::CoinbaseNotFirst.into());
            }
            self.verify_transaction(tx)?;
            claim_inputs(&mut spent, tx)?;
        }

        self.seal_on_tip(tip, owner, miner, transactions, cancel)
    }

    /// Like [`Ledger::append`], but candidates that fail verification or
    /// conflict with the chain or an earlier candidate are left out
    pub fn append_pending(
        &self,
        miner: &Address,
        candidates: Vec<Transaction>,
        cancel: &CancelFlag,
    ) -> Result<Block, LedgerError> {
        let owner = miner
            .key_hash()
            .map_err(|e| LedgerError::InvalidAddress(e.to_string()))?;

        let _guard = self.lock_writes();
        let tip = self.tip();
        let mut spent = spent_in_chain(ChainIter::new(&self.db, tip))?;
        let mut selected = Vec::with_capacity(candidates.len());

        for tx in candidates {
            let checked = if tx.is_coinbase() {
                Err(ValidationError::CoinbaseNotFirst.into())
            } else {
                self.verify_transaction(&tx)
                    .and_then(|()| claim_inputs(&mut spent, &tx).map_err(LedgerError::from))
            };
            match checked {
                Ok(()) => selected.push(tx),
                Err(LedgerError::Validation(e)) => log::debug!("Leaving out {}: {}", tx.id, e),
                Err(e) => return Err(e),
            }
        }

        self.seal_on_tip(tip, owner, miner, selected, cancel)
    }

    /// Seal and store a block on top of `tip`; caller holds the write lock
    fn seal_on_tip(
        &self,
        tip: Hash256,
        owner: KeyHash,
        miner: &Address,
        transactions: Vec<Transaction>,
        cancel: &CancelFlag,
    ) -> Result<Block, LedgerError> {
        let parent = self.get_block(&tip)?;

        let mut block_txs = Vec::with_capacity(transactions.len() + 1);
        block_txs.push(Transaction::coinbase(owner, coinbase_data(miner)));
        block_txs.extend(transactions);

        let block = seal(self.pow(), Block::candidate(parent.index + 1, tip, block_txs), cancel)?;

        self.db.put_block_and_tip(&block)?;
        self.set_tip(block.hash);
        log::info!("Mined block {} at height {} ({} transactions)",
            block.hash, block.index, block.transactions.len());

        Ok(block)
    }

    /// Blocks from the tip back to genesis
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter::new(&self.db, self.tip())
    }

    /// Index of the tip block
    pub fn best_height(&self) -> Result<u64, LedgerError> {
        Ok(self.get_block(&self.tip())?.index)
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Block, LedgerError> {
        self.db.get_block(hash)?.ok_or(LedgerError::BlockNotFound(*hash))
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool, LedgerError> {
        self.db.has_block(hash)
    }

    /// Hashes of the active chain, tip first
    pub fn all_block_hashes(&self) -> Result<Vec<Hash256>, LedgerError> {
        self.iter().map(|block| block.map(|b| b.hash)).collect()
    }

    /// Blocks of the active chain, tip first
    pub fn blocks(&self) -> Result<Vec<Block>, LedgerError> {
        self.iter().collect()
    }

    /// Linear scan of the active chain for a transaction
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction, LedgerError> {
        find_in_chain(self.iter(), id)?.ok_or(LedgerError::TransactionNotFound(*id))
    }

    /// Sources referenced by `tx`, looked up on the active chain
    fn resolve_sources(&self, tx: &Transaction) -> Result<HashMap<Hash256, Transaction>, LedgerError> {
        let mut sources = HashMap::new();
        for id in tx.source_ids() {
            if sources.contains_key(&id) {
                continue;
            }
            match self.find_transaction(&id) {
                Ok(source) => {
                    sources.insert(id, source);
                }
                Err(LedgerError::TransactionNotFound(id)) => {
                    return Err(ValidationError::MissingSource(id).into());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sources)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, secret_key: &SecretKey) -> Result<(), LedgerError> {
        let sources = self.resolve_sources(tx)?;
        tx.sign(secret_key, &sources)?;
        Ok(())
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let sources = self.resolve_sources(tx)?;
        tx.verify(&sources)?;
        Ok(())
    }

    /// Accept a block received from a peer.
    ///
    /// Known blocks are ignored. A block whose parent is missing is held back
    /// until the parent arrives. Returns true when the block was stored.
    pub fn add_block(&self, block: Block) -> Result<bool, LedgerError> {
        let _guard = self.lock_writes();

        if self.db.has_block(&block.hash)? {
            log::debug!("Block {} already known", block.hash);
            return Ok(false);
        }

        self.validator.validate_block(&block)?;

        if !block.is_genesis() && !self.db.has_block(&block.prev_hash)? {
            let mut orphans = self.orphans.lock().unwrap_or_else(PoisonError::into_inner);
            if orphans.len() >= MAX_ORPHANS {
                log::warn!("Orphan pool full, dropping block {}", block.hash);
            } else {
                log::debug!("Holding block {} until parent {} arrives", block.hash, block.prev_hash);
                orphans.insert(block.hash, block);
            }
            return Ok(false);
        }

        let mut connected = vec![block.hash];
        self.connect_block(block)?;

        while let Some(parent) = connected.pop() {
            let children: Vec<Block> = {
                let mut orphans = self.orphans.lock().unwrap_or_else(PoisonError::into_inner);
                let ready: Vec<Hash256> = orphans
                    .values()
                    .filter(|orphan| orphan.prev_hash == parent)
                    .map(|orphan| orphan.hash)
                    .collect();
                ready.iter().filter_map(|hash| orphans.remove(hash)).collect()
            };

            for child in children {
                let hash = child.hash;
                match self.connect_block(child) {
                    Ok(()) => connected.push(hash),
                    Err(e) => log::warn!("Dropping orphan {}: {}", hash, e),
                }
            }
        }

        Ok(true)
    }

    /// Store a validated block whose parent is present; caller holds the write lock
    fn connect_block(&self, block: Block) -> Result<(), LedgerError> {
        if !block.is_genesis() {
            let parent = self.get_block(&block.prev_hash)?;
            if block.index != parent.index + 1 {
                return Err(ValidationError::InvalidIndex {
                    index: block.index,
                    parent: parent.index,
                }
                .into());
            }
        }

        self.verify_block_transactions(&block)?;

        let best_height = self.best_height()?;
        if block.index > best_height {
            self.db.put_block_and_tip(&block)?;
            self.set_tip(block.hash);
            log::info!("Added block {} at height {}, new tip", block.hash, block.index);
        } else {
            self.db.put_block(&block)?;
            log::info!("Stored block {} at height {} (best height {})",
                block.hash, block.index, best_height);
        }

        Ok(())
    }

    /// Signature, value and double-spend checks against the block's own ancestry
    fn verify_block_transactions(&self, block: &Block) -> Result<(), LedgerError> {
        let mut earlier: HashMap<Hash256, Transaction> = HashMap::new();
        let mut spent = if block.is_genesis() {
            HashSet::new()
        } else {
            spent_in_chain(ChainIter::new(&self.db, block.prev_hash))?
        };

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                let mut sources = HashMap::new();
                for id in tx.source_ids() {
                    if sources.contains_key(&id) {
                        continue;
                    }
                    let source = match earlier.get(&id) {
                        Some(source) => Some(source.clone()),
                        None if block.is_genesis() => None,
                        None => find_in_chain(ChainIter::new(&self.db, block.prev_hash), &id)?,
                    };
                    let source = source.ok_or(ValidationError::MissingSource(id))?;
                    sources.insert(id, source);
                }
                tx.verify(&sources)?;
                claim_inputs(&mut spent, tx)?;
            }
            earlier.insert(tx.id, tx.clone());
        }

        Ok(())
    }

    /// Replace the active chain with `blocks` (tip first) if it is strictly longer
    pub fn adopt_chain(&self, blocks: Vec<Block>) -> Result<bool, LedgerError> {
        let _guard = self.lock_writes();

        let local_len = self.best_height()? + 1;
        if (blocks.len() as u64) <= local_len {
            log::debug!("Offered chain of {} blocks is not longer than ours ({})", blocks.len(), local_len);
            return Ok(false);
        }

        let mut seen: HashMap<Hash256, Transaction> = HashMap::new();
        let mut spent = HashSet::new();
        let mut parent: Option<&Block> = None;

        for block in blocks.iter().rev() {
            self.validator.validate_block(block)?;

            match parent {
                None if !block.is_genesis() => {
                    return Err(ValidationError::BrokenLink(block.hash).into());
                }
                None => {}
                Some(parent) => {
                    if block.prev_hash != parent.hash {
                        return Err(ValidationError::BrokenLink(block.hash).into());
                    }
                    if block.index != parent.index + 1 {
                        return Err(ValidationError::InvalidIndex {
                            index: block.index,
                            parent: parent.index,
                        }
                        .into());
                    }
                }
            }

            for tx in &block.transactions {
                tx.verify(&seen)?;
                claim_inputs(&mut spent, tx)?;
                seen.insert(tx.id, tx.clone());
            }
            parent = Some(block);
        }

        let tip = blocks[0].hash;
        self.db.put_blocks_and_tip(&blocks, &tip)?;
        self.set_tip(tip);
        log::info!("Adopted chain of {} blocks, tip {}", blocks.len(), tip);

        Ok(true)
    }
}

/// Default coinbase data: the recipient plus a random tag so repeated rewards differ
pub fn coinbase_data(to: &Address) -> Vec<u8> {
    format!("Reward to '{}' {:016x}", to, rand::random::<u64>()).into_bytes()
}

fn seal(pow: &ProofOfWork, mut block: Block, cancel: &CancelFlag) -> Result<Block, LedgerError> {
    let result = pow.seal(&block, cancel).ok_or(LedgerError::MiningCancelled)?;
    log::debug!("Sealed block at height {} after {} attempts ({:.0} H/s)",
        block.index, result.attempts, result.hash_rate());
    block.nonce = result.nonce;
    block.hash = result.hash;
    Ok(block)
}

fn find_in_chain(chain: ChainIter<'_>, id: &Hash256) -> Result<Option<Transaction>, LedgerError> {
    for block in chain {
        if let Some(tx) = block?.transactions.into_iter().find(|tx| &tx.id == id) {
            return Ok(Some(tx));
        }
    }
    Ok(None)
}

/// Backward iterator from a starting block to genesis
pub struct ChainIter<'a> {
    db: &'a BlockchainDB,
    next: Option<Hash256>,
}

impl<'a> ChainIter<'a> {
    pub fn new(db: &'a BlockchainDB, start: Hash256) -> Self {
        Self { db, next: Some(start) }
    }
}

impl Iterator for ChainIter<'_> {
    type Item = Result<Block, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;

        match self.db.get_block(&hash) {
            Ok(Some(block)) => {
                if !block.prev_hash.is_zero() {
                    self.next = Some(block.prev_hash);
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(LedgerError::BlockNotFound(hash))),
            Err(e) => Some(Err(e)),
        }
    }
}
