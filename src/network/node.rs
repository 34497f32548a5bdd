// Network node - protocol handlers over one-shot connections

use crate::config::NodeConfig;
use crate::consensus::{CancelFlag, TransactionValidator};
use crate::core::{Block, Hash256, Transaction};
use crate::network::peer::{self, read_frame, write_frame, PeerRegistry};
use crate::network::{
    BlockMessage, GetBlocksMessage, GetDataMessage, InvKind, InvMessage, Message, NetworkError,
    TxMessage, VersionMessage,
};
use crate::storage::{Ledger, LedgerError, OutPoint};
use crate::wallet::Address;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// Network node
pub struct Node {
    /// Address advertised as `from_addr`
    address: String,
    ledger: Arc<Ledger>,
    peers: PeerRegistry,
    /// Block hashes still to fetch, per remote peer
    sessions: Mutex<HashMap<String, VecDeque<Hash256>>>,
    mempool: Mutex<HashMap<Hash256, Transaction>>,
    /// Set on mining nodes
    miner: Option<Address>,
    mine_threshold: usize,
    pub(super) connect_timeout: Duration,
    pub(super) sync_timeout: Duration,
    cancel: CancelFlag,
}

impl Node {
    pub fn new(config: &NodeConfig, ledger: Arc<Ledger>, miner: Option<Address>) -> Self {
        let seeds = config
            .peers
            .iter()
            .filter(|peer| **peer != config.listen_addr)
            .cloned();

        Self {
            address: config.listen_addr.clone(),
            ledger,
            peers: PeerRegistry::new(seeds),
            sessions: Mutex::new(HashMap::new()),
            mempool: Mutex::new(HashMap::new()),
            miner,
            mine_threshold: config.mine_threshold,
            connect_timeout: config.connect_timeout(),
            sync_timeout: config.sync_timeout(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub async fn mempool_ids(&self) -> Vec<Hash256> {
        self.mempool.lock().await.keys().copied().collect()
    }

    /// Stop a running nonce search; the pending mine returns MiningCancelled
    pub fn cancel_mining(&self) {
        self.cancel.cancel();
    }

    /// Bind the configured address, announce ourselves and serve until the process exits
    pub async fn run(self: Arc<Self>) -> Result<(), NetworkError> {
        let listener = TcpListener::bind(&self.address).await?;
        log::info!("Node listening on {}", self.address);

        self.bootstrap().await?;
        self.serve(listener).await
    }

    /// Send our version to the first known peer
    pub async fn bootstrap(&self) -> Result<(), NetworkError> {
        if let Some(seed) = self.peers.first().await {
            let best_height = self.with_ledger(|ledger| ledger.best_height()).await?;
            log::info!("Contacting {} at height {}", seed, best_height);
            self.send(&seed, &Message::version(&self.address, best_height)).await;
        }
        Ok(())
    }

    /// Accept loop; every connection gets its own task
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), NetworkError> {
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let node = Arc::clone(&self);
            tokio::spawn(async move {
                match node.handle_connection(stream, remote).await {
                    Ok(()) => {}
                    Err(NetworkError::Ledger(LedgerError::Validation(e))) => {
                        log::warn!("Rejected data from {}: {}", remote, e);
                    }
                    Err(e) => log::error!("Connection from {} failed: {}", remote, e),
                }
            });
        }
    }

    /// Read one frame and handle it; only `getchain` replies on the same connection
    async fn handle_connection(&self, mut stream: TcpStream, remote: SocketAddr) -> Result<(), NetworkError> {
        let frame = read_frame(&mut stream).await?;
        let message = Message::decode(&frame)?;
        log::debug!("Received {} from {}", message.message_type().command(), remote);

        if let Message::GetChain(request) = message {
            let blocks = self.with_ledger(|ledger| ledger.blocks()).await?;
            log::info!("Sending {} blocks to {}", blocks.len(), request.from_addr);
            return write_frame(&mut stream, &Message::chain(&blocks)).await;
        }

        self.process(message).await
    }

    /// Dispatch one inbound message
    pub async fn process(&self, message: Message) -> Result<(), NetworkError> {
        match message {
            Message::Version(m) => self.handle_version(m).await,
            Message::GetBlocks(m) => self.handle_get_blocks(m).await,
            Message::Inv(m) => self.handle_inv(m).await,
            Message::GetData(m) => self.handle_get_data(m).await,
            Message::Block(m) => self.handle_block(m).await,
            Message::Tx(m) => self.handle_tx(m).await,
            Message::GetChain(m) => {
                log::debug!("Ignoring getchain from {} outside a connection", m.from_addr);
                Ok(())
            }
            Message::Chain(m) => {
                log::debug!("Ignoring unsolicited chain of {} blocks", m.blocks.len());
                Ok(())
            }
        }
    }

    async fn handle_version(&self, message: VersionMessage) -> Result<(), NetworkError> {
        if message.from_addr != self.address && self.peers.add(&message.from_addr).await {
            log::info!("New peer {}", message.from_addr);
        }

        let best_height = self.with_ledger(|ledger| ledger.best_height()).await?;
        if message.best_height > best_height {
            self.send(&message.from_addr, &Message::get_blocks(&self.address)).await;
        } else if message.best_height < best_height {
            self.send(&message.from_addr, &Message::version(&self.address, best_height)).await;
        }
        Ok(())
    }

    async fn handle_get_blocks(&self, message: GetBlocksMessage) -> Result<(), NetworkError> {
        let hashes = self.with_ledger(|ledger| ledger.all_block_hashes()).await?;
        self.send(&message.from_addr, &Message::inv(&self.address, InvKind::Block, hashes)).await;
        Ok(())
    }

    async fn handle_inv(&self, message: InvMessage) -> Result<(), NetworkError> {
        log::debug!("Inventory of {} {:?} items from {}", message.items.len(), message.kind, message.from_addr);

        match message.kind {
            InvKind::Block => {
                let items = message.items;
                let mut wanted: VecDeque<Hash256> = self
                    .with_ledger(move |ledger| {
                        let mut wanted = VecDeque::new();
                        for hash in items {
                            if !ledger.has_block(&hash)? {
                                wanted.push_back(hash);
                            }
                        }
                        Ok(wanted)
                    })
                    .await?;
                let Some(first) = wanted.pop_front() else {
                    return Ok(());
                };

                {
                    let mut sessions = self.sessions.lock().await;
                    let queue = sessions.entry(message.from_addr.clone()).or_default();
                    for hash in wanted {
                        if !queue.contains(&hash) {
                            queue.push_back(hash);
                        }
                    }
                }

                let request = Message::get_data(&self.address, InvKind::Block, first);
                self.send(&message.from_addr, &request).await;
            }
            InvKind::Tx => {
                let Some(id) = message.items.first().copied() else {
                    return Ok(());
                };
                if self.mempool.lock().await.contains_key(&id) {
                    return Ok(());
                }
                self.send(&message.from_addr, &Message::get_data(&self.address, InvKind::Tx, id)).await;
            }
        }
        Ok(())
    }

    async fn handle_get_data(&self, message: GetDataMessage) -> Result<(), NetworkError> {
        let reply = match message.kind {
            InvKind::Block => {
                let id = message.id;
                let found = self
                    .with_ledger(move |ledger| match ledger.get_block(&id) {
                        Ok(block) => Ok(Some(block)),
                        Err(LedgerError::BlockNotFound(_)) => Ok(None),
                        Err(e) => Err(e),
                    })
                    .await?;
                match found {
                    Some(block) => Message::block(&self.address, &block),
                    None => {
                        log::debug!("Unknown block {} requested by {}", message.id, message.from_addr);
                        return Ok(());
                    }
                }
            }
            InvKind::Tx => {
                let pooled = self.mempool.lock().await.get(&message.id).cloned();
                match pooled {
                    Some(tx) => Message::tx(&self.address, &tx),
                    None => return Ok(()),
                }
            }
        };

        self.send(&message.from_addr, &reply).await;
        Ok(())
    }

    async fn handle_block(&self, message: BlockMessage) -> Result<(), NetworkError> {
        let block: Block = message.block.decode()?;
        let hash = block.hash;

        match self.with_ledger(move |ledger| ledger.add_block(block)).await {
            Ok(true) => {
                log::info!("Accepted block {} from {}", hash, message.from_addr);
                self.prune_mempool().await?;
            }
            Ok(false) => log::debug!("Block {} from {} not connected yet", hash, message.from_addr),
            Err(e) => {
                self.sessions.lock().await.remove(&message.from_addr);
                return Err(e);
            }
        }

        let next = {
            let mut sessions = self.sessions.lock().await;
            let next = sessions.get_mut(&message.from_addr).and_then(VecDeque::pop_front);
            if next.is_none() && sessions.remove(&message.from_addr).is_some() {
                log::info!("Block sync with {} complete", message.from_addr);
            }
            next
        };

        if let Some(hash) = next {
            self.send(&message.from_addr, &Message::get_data(&self.address, InvKind::Block, hash)).await;
        }
        Ok(())
    }

    async fn handle_tx(&self, message: TxMessage) -> Result<(), NetworkError> {
        let tx: Transaction = message.transaction.decode()?;
        self.accept_transaction(tx, Some(&message.from_addr)).await?;
        Ok(())
    }

    /// Verify and pool a transaction, then announce it to every peer except `origin`.
    /// Returns false if it was already pooled.
    pub async fn accept_transaction(&self, tx: Transaction, origin: Option<&str>) -> Result<bool, NetworkError> {
        TransactionValidator::validate_for_mempool(&tx).map_err(LedgerError::from)?;
        if self.mempool.lock().await.contains_key(&tx.id) {
            return Ok(false);
        }

        let checked = tx.clone();
        self.with_ledger(move |ledger| {
            ledger.verify_transaction(&checked)?;
            let spent = ledger.spent_outputs()?;
            match OutPoint::spent_by(&checked).into_iter().find(|outpoint| spent.contains(outpoint)) {
                Some(outpoint) => Err(outpoint.double_spend().into()),
                None => Ok(()),
            }
        })
        .await?;

        let pool_size = {
            let mut pool = self.mempool.lock().await;
            let claimed: HashSet<OutPoint> = pool.values().flat_map(OutPoint::spent_by).collect();
            if let Some(outpoint) = OutPoint::spent_by(&tx).into_iter().find(|outpoint| claimed.contains(outpoint)) {
                return Err(LedgerError::from(outpoint.double_spend()).into());
            }
            if pool.insert(tx.id, tx.clone()).is_some() {
                return Ok(false);
            }
            pool.len()
        };
        log::info!("Pooled transaction {} ({} pending)", tx.id, pool_size);

        let announcement = Message::inv(&self.address, InvKind::Tx, vec![tx.id]);
        self.broadcast(&announcement, origin).await;

        if let Some(miner) = &self.miner {
            if pool_size >= self.mine_threshold {
                match self.mine(miner).await {
                    Ok(block) => log::info!("Mined block {} with {} transactions", block.hash, block.transactions.len()),
                    Err(e) => log::warn!("Mining failed: {}", e),
                }
            }
        }

        Ok(true)
    }

    /// Mine the non-conflicting pooled transactions into a block and announce it
    pub async fn mine(&self, miner: &Address) -> Result<Block, NetworkError> {
        let candidates: Vec<Transaction> = self.mempool.lock().await.values().cloned().collect();
        let miner = miner.clone();

        self.cancel.reset();
        let cancel = self.cancel.clone();

        let block = self
            .with_ledger(move |ledger| ledger.append_pending(&miner, candidates, &cancel))
            .await?;

        self.prune_mempool().await?;

        let announcement = Message::inv(&self.address, InvKind::Block, vec![block.hash]);
        self.broadcast(&announcement, None).await;

        Ok(block)
    }

    /// Drop pooled transactions whose inputs the chain has consumed
    async fn prune_mempool(&self) -> Result<(), NetworkError> {
        let spent = self.with_ledger(|ledger| ledger.spent_outputs()).await?;
        let mut pool = self.mempool.lock().await;
        let before = pool.len();
        pool.retain(|_, tx| OutPoint::spent_by(tx).iter().all(|outpoint| !spent.contains(outpoint)));

        if pool.len() < before {
            log::debug!("Removed {} confirmed transactions from the pool", before - pool.len());
        }
        Ok(())
    }

    /// Send to one peer; a failed peer is forgotten
    pub async fn send(&self, addr: &str, message: &Message) -> bool {
        match peer::send_message(addr, message, self.connect_timeout).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Peer {} is not reachable ({}), removing it", addr, e);
                self.peers.remove(addr).await;
                false
            }
        }
    }

    /// Send to every known peer except ourselves and `except`; returns the number reached
    pub async fn broadcast(&self, message: &Message, except: Option<&str>) -> usize {
        let mut reached = 0;
        for addr in self.peers.list().await {
            if addr == self.address || Some(addr.as_str()) == except {
                continue;
            }
            if self.send(&addr, message).await {
                reached += 1;
            }
        }
        reached
    }

    /// Run a ledger operation on the blocking pool
    pub(super) async fn with_ledger<T, F>(&self, operation: F) -> Result<T, NetworkError>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger) -> Result<T, LedgerError> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        Ok(tokio::task::spawn_blocking(move || operation(&ledger)).await??)
    }
}
