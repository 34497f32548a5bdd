// CLI commands

use crate::config::{ConfigError, NodeConfig};
use crate::consensus::{CancelFlag, ProofOfWork};
use crate::core::{Block, Transaction};
use crate::network::{send_message, Message, Node};
use crate::storage::{BlockchainDB, Ledger};
use crate::wallet::{Address, Keystore, TransactionBuilder};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "powledger")]
#[command(about = "Proof-of-work UTXO ledger node", long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the chain database and wallets
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Address to listen on and advertise
    #[arg(long, global = true)]
    pub listen: Option<String>,

    /// Known peer address (repeatable)
    #[arg(long = "peer", global = true)]
    pub peers: Vec<String>,

    /// Proof-of-work difficulty in leading zero bits
    #[arg(long, global = true)]
    pub difficulty: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied
    pub fn node_config(&self) -> Result<NodeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };

        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if !self.peers.is_empty() {
            config.peers = self.peers.clone();
        }
        if let Some(difficulty) = self.difficulty {
            config.difficulty_bits = difficulty;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a key pair and print its address
    CreateWallet,

    /// List the addresses in the keystore
    ListAddresses,

    /// Create a chain whose genesis reward goes to ADDRESS
    CreateChain {
        #[arg(long)]
        address: String,
    },

    /// Sum of unspent outputs owned by ADDRESS
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Send AMOUNT from FROM to TO
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine the transaction locally instead of handing it to the first peer
        #[arg(long)]
        mine: bool,
    },

    /// Mine an empty block paying MINER
    Mine {
        #[arg(long)]
        miner: String,
    },

    /// Print every block from the tip back to genesis
    PrintChain,

    /// Adopt the longest chain among the known peers
    Sync,

    /// Serve the peer protocol
    StartNode {
        /// Mine pooled transactions, paying this address
        #[arg(long)]
        miner: Option<String>,
    },
}

/// CLI handler
pub struct CliHandler {
    config: NodeConfig,
}

impl CliHandler {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Handle CLI command
    pub async fn handle(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::CreateWallet => self.create_wallet(),
            Commands::ListAddresses => self.list_addresses(),
            Commands::CreateChain { address } => self.create_chain(&address).await,
            Commands::GetBalance { address } => self.get_balance(&address),
            Commands::Send { from, to, amount, mine } => self.send(&from, &to, amount, mine).await,
            Commands::Mine { miner } => self.mine(&miner).await,
            Commands::PrintChain => self.print_chain(),
            Commands::Sync => self.sync().await,
            Commands::StartNode { miner } => self.start_node(miner.as_deref()).await,
        }
    }

    fn pow(&self) -> ProofOfWork {
        ProofOfWork::new(self.config.difficulty_bits)
    }

    fn open_db(&self) -> anyhow::Result<BlockchainDB> {
        let path = self.config.chain_path();
        BlockchainDB::new(&path).with_context(|| format!("opening chain database at {}", path.display()))
    }

    /// Existing chain only
    fn load_ledger(&self) -> anyhow::Result<Ledger> {
        Ok(Ledger::load(self.open_db()?, self.pow())?)
    }

    fn load_keystore(&self) -> anyhow::Result<Keystore> {
        let path = self.config.wallet_path();
        Keystore::load_or_default(&path).with_context(|| format!("reading {}", path.display()))
    }

    fn create_wallet(&self) -> anyhow::Result<()> {
        let mut keystore = self.load_keystore()?;
        let address = keystore.new_address();
        keystore.save(self.config.wallet_path())?;

        println!("Your new address: {}", address);
        Ok(())
    }

    fn list_addresses(&self) -> anyhow::Result<()> {
        for address in self.load_keystore()?.list_addresses() {
            println!("{}", address);
        }
        Ok(())
    }

    async fn create_chain(&self, address: &str) -> anyhow::Result<()> {
        let address: Address = address.parse()?;
        let db = self.open_db()?;
        if db.get_tip()?.is_some() {
            bail!("a chain already exists in {}", self.config.chain_path().display());
        }

        let pow = self.pow();
        let ledger = tokio::task::spawn_blocking(move || Ledger::open(db, pow, &address)).await??;

        println!("Created chain with genesis block {}", ledger.tip());
        Ok(())
    }

    fn get_balance(&self, address: &str) -> anyhow::Result<()> {
        let address: Address = address.parse()?;
        let ledger = self.load_ledger()?;
        let balance = TransactionBuilder::new(&ledger).get_balance(&address)?;

        println!("Balance of '{}': {}", address, balance);
        Ok(())
    }

    async fn send(&self, from: &str, to: &str, amount: u64, mine: bool) -> anyhow::Result<()> {
        let from: Address = from.parse()?;
        let to: Address = to.parse()?;

        let keystore = self.load_keystore()?;
        let keypair = keystore.require(&from)?;
        let ledger = self.load_ledger()?;
        let tx = TransactionBuilder::new(&ledger).build_signed(keypair, &to, amount)?;
        let tx_id = tx.id;

        if mine {
            let block = tokio::task::spawn_blocking(move || ledger.append(&from, vec![tx], &CancelFlag::new())).await??;
            println!("Transaction {} mined in block {}", tx_id, block.hash);
        } else {
            let Some(peer) = self.config.peers.first() else {
                bail!("no peer configured to relay the transaction to; use --peer or --mine");
            };
            send_message(peer, &Message::tx(&self.config.listen_addr, &tx), self.config.connect_timeout()).await?;
            println!("Transaction {} sent to {}", tx_id, peer);
        }
        Ok(())
    }

    async fn mine(&self, miner: &str) -> anyhow::Result<()> {
        let miner: Address = miner.parse()?;
        let ledger = self.load_ledger()?;

        let block = tokio::task::spawn_blocking(move || ledger.append(&miner, vec![], &CancelFlag::new())).await??;
        println!("Mined block {} at height {}", block.hash, block.index);
        Ok(())
    }

    fn print_chain(&self) -> anyhow::Result<()> {
        let ledger = self.load_ledger()?;
        for block in ledger.iter() {
            let block = block?;
            print_block(&block, ledger.pow().validate(&block));
        }
        Ok(())
    }

    async fn sync(&self) -> anyhow::Result<()> {
        let node = Node::new(&self.config, Arc::new(self.load_ledger()?), None);
        let report = node.resync().await?;
        if report.timed_out {
            println!("Sync timed out, keeping what was fetched");
        }

        match report.adopted_from {
            Some(peer) => println!("Adopted chain from {}, height {}", peer, report.best_height),
            None => println!("Local chain kept, height {} ({} peers asked)", report.best_height, report.peers_contacted),
        }
        Ok(())
    }

    async fn start_node(&self, miner: Option<&str>) -> anyhow::Result<()> {
        let miner = miner.map(str::parse::<Address>).transpose()?;
        if let Some(miner) = &miner {
            log::info!("Mining is on, rewards go to {}", miner);
        }

        let ledger = self.load_ledger().context("start-node needs an existing chain")?;
        let node = Arc::new(Node::new(&self.config, Arc::new(ledger), miner));

        tokio::select! {
            result = Arc::clone(&node).run() => result?,
            _ = tokio::signal::ctrl_c() => {
                node.cancel_mining();
                log::info!("Shutting down");
            }
        }
        Ok(())
    }
}

/// Print block information
fn print_block(block: &Block, pow_valid: bool) {
    println!("============ Block {} ============", block.hash);
    println!("Height: {}", block.index);
    println!("Prev. block: {}", block.prev_hash);
    println!("Timestamp: {}", block.timestamp);
    println!("Nonce: {}", block.nonce);
    println!("PoW: {}", pow_valid);
    for tx in &block.transactions {
        print_transaction(tx);
    }
    println!();
}

fn print_transaction(tx: &Transaction) {
    println!("--- Transaction {}:", tx.id);
    for (i, input) in tx.inputs.iter().enumerate() {
        if input.is_coinbase() {
            println!("     Input {}: coinbase \"{}\"", i, String::from_utf8_lossy(&input.unlock_key));
        } else {
            println!("     Input {}: {}:{}", i, input.source_tx_id, input.output_index);
        }
    }
    for (i, output) in tx.outputs.iter().enumerate() {
        println!("     Output {}: {} to {}", i, output.value, Address::from_key_hash(&output.owner_key_hash));
    }
}
