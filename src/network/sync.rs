// Full-chain resync: adopt a peer's chain when it is strictly longer

use crate::core::Block;
use crate::network::{request, Message, NetworkError, Node};
use tokio::time::timeout;

/// Outcome of one resync round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Peers that answered with a chain
    pub peers_contacted: usize,
    /// Peer whose chain replaced ours, if any
    pub adopted_from: Option<String>,
    pub best_height: u64,
    /// The deadline passed before every peer was asked
    pub timed_out: bool,
}

impl Node {
    /// Ask every known peer for its whole chain, bounded by the sync timeout.
    /// A chain adopted before the deadline stays adopted and is reported.
    pub async fn resync(&self) -> Result<SyncReport, NetworkError> {
        let mut report = SyncReport::default();
        let deadline = self.sync_timeout;

        let outcome = timeout(deadline, self.resync_with_peers(&mut report)).await;
        match outcome {
            Ok(result) => result?,
            Err(_) => {
                log::warn!("Sync timed out after {:?}", deadline);
                report.timed_out = true;
            }
        }

        report.best_height = self.with_ledger(|ledger| ledger.best_height()).await?;
        log::info!("Sync finished at height {}", report.best_height);
        Ok(report)
    }

    async fn resync_with_peers(&self, report: &mut SyncReport) -> Result<(), NetworkError> {
        for peer in self.peers().list().await {
            if peer == self.address() {
                continue;
            }

            let reply = match request(&peer, &Message::get_chain(self.address()), self.connect_timeout).await {
                Ok(reply) => reply,
                Err(e) => {
                    log::warn!("Peer {} is not reachable ({}), removing it", peer, e);
                    self.peers().remove(&peer).await;
                    continue;
                }
            };

            let Message::Chain(chain) = reply else {
                log::warn!("Peer {} answered getchain with {}", peer, reply.message_type().command());
                continue;
            };
            report.peers_contacted += 1;

            let blocks = match chain
                .blocks
                .iter()
                .map(|bytes| bytes.decode::<Block>())
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(blocks) => blocks,
                Err(e) => {
                    log::warn!("Peer {} sent an undecodable chain: {}", peer, e);
                    continue;
                }
            };

            let offered = blocks.len();
            match self.with_ledger(move |ledger| ledger.adopt_chain(blocks)).await {
                Ok(true) => {
                    log::info!("Adopted chain of {} blocks from {}", offered, peer);
                    report.adopted_from = Some(peer);
                }
                Ok(false) => log::debug!("Chain of {} blocks from {} is not longer", offered, peer),
                Err(e) => log::warn!("Rejected chain from {}: {}", peer, e),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::consensus::{CancelFlag, ProofOfWork};
    use crate::storage::{BlockchainDB, Ledger};
    use crate::wallet::KeyPair;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;

    fn node_with(ledger: Ledger, listen_addr: String, peers: Vec<String>) -> Arc<Node> {
        let config = NodeConfig {
            listen_addr,
            peers,
            difficulty_bits: 8,
            ..NodeConfig::default()
        };
        Arc::new(Node::new(&config, Arc::new(ledger), None))
    }

    fn ledger_with_blocks(blocks: usize) -> Ledger {
        let owner = KeyPair::generate();
        let ledger = Ledger::open(BlockchainDB::memory().unwrap(), ProofOfWork::new(8), &owner.address).unwrap();
        for _ in 0..blocks {
            ledger.append(&owner.address, vec![], &CancelFlag::new()).unwrap();
        }
        ledger
    }

    async fn serving(ledger: Ledger) -> Arc<Node> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let node = node_with(ledger, listener.local_addr().unwrap().to_string(), vec![]);
        tokio::spawn(Arc::clone(&node).serve(listener));
        node
    }

    #[tokio::test]
    async fn test_resync_adopts_longer_chain() {
        let remote = serving(ledger_with_blocks(2)).await;
        let local = node_with(ledger_with_blocks(0), "127.0.0.1:1".to_string(), vec![remote.address().to_string()]);

        let report = local.resync().await.unwrap();

        assert_eq!(report.peers_contacted, 1);
        assert_eq!(report.adopted_from.as_deref(), Some(remote.address()));
        assert_eq!(report.best_height, 2);
        assert_eq!(local.ledger().tip(), remote.ledger().tip());
    }

    #[tokio::test]
    async fn test_resync_keeps_longer_local_chain() {
        let remote = serving(ledger_with_blocks(1)).await;
        let local = node_with(ledger_with_blocks(3), "127.0.0.1:1".to_string(), vec![remote.address().to_string()]);
        let tip = local.ledger().tip();

        let report = local.resync().await.unwrap();

        assert_eq!(report.adopted_from, None);
        assert_eq!(report.best_height, 3);
        assert_eq!(local.ledger().tip(), tip);
    }

    #[tokio::test]
    async fn test_resync_drops_dead_peer() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = closed.local_addr().unwrap().to_string();
        drop(closed);

        let local = node_with(ledger_with_blocks(0), "127.0.0.1:1".to_string(), vec![dead.clone()]);
        let report = local.resync().await.unwrap();

        assert_eq!(report.peers_contacted, 0);
        assert!(!local.peers().contains(&dead).await);
    }

    #[tokio::test]
    async fn test_resync_gives_up_on_silent_peer() {
        // accepts connections but never answers or closes them
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = silent.accept().await {
                held.push(stream);
            }
        });

        let config = NodeConfig {
            listen_addr: "127.0.0.1:1".to_string(),
            peers: vec![silent_addr.clone()],
            difficulty_bits: 8,
            sync_timeout_secs: 1,
            ..NodeConfig::default()
        };
        let local = Node::new(&config, Arc::new(ledger_with_blocks(1)), None);
        let tip = local.ledger().tip();

        let started = Instant::now();
        let report = local.resync().await.unwrap();

        assert!(report.timed_out);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.peers_contacted, 0);
        assert_eq!(report.best_height, 1);
        assert_eq!(local.ledger().tip(), tip);
        assert!(local.peers().contains(&silent_addr).await);
    }
}
