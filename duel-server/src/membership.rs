use crate::shutdown::Shutdown;
use crate::transport::peer_rpc::PeerClient;
use duel_core::wire::{PeerInfo, RegisterRequest, ServerStatus};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{debug, info, instrument, warn};

/// One entry of the cluster-wide server registry (spec.md §3 "Server
/// record"). Entries are created on first contact and never removed, only
/// marked not-alive (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub addr: String,
    pub last_seen: Instant,
    pub alive: bool,
}

/// Peer registry, liveness via heartbeats, reachable-set maintenance
/// (spec.md §2 component #2, §4.2).
///
/// `alive` is read-mostly, so the map is guarded by a `std::sync::RwLock`
/// (spec.md §5 "Locks and their scope": "One cluster-membership lock
/// (read-mostly; use a reader-writer lock)").
pub struct Membership {
    self_addr: String,
    peers: RwLock<HashMap<String, PeerRecord>>,
    alive_timeout: Duration,
}

impl Membership {
    pub fn new(self_addr: impl Into<String>, static_peers: &[String]) -> Membership {
        let self_addr = self_addr.into();
        let mut peers = HashMap::new();
        peers.insert(
            self_addr.clone(),
            PeerRecord {
                addr: self_addr.clone(),
                last_seen: Instant::now(),
                alive: true,
            },
        );
        for peer in static_peers {
            if *peer == self_addr {
                continue;
            }
            peers.insert(
                peer.clone(),
                PeerRecord {
                    addr: peer.clone(),
                    last_seen: Instant::now(),
                    alive: false,
                },
            );
        }
        Membership {
            self_addr,
            peers: RwLock::new(peers),
            alive_timeout: Duration::from_secs(15),
        }
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    /// Records contact with `addr`, inserting a new entry if this is the
    /// first time we've heard from it (transitive peer discovery via
    /// `/register` responses, spec.md §4.2).
    pub fn upsert_seen(&self, addr: &str) {
        let mut peers = self.peers.write().expect("membership lock poisoned");
        match peers.get_mut(addr) {
            Some(record) => {
                record.last_seen = Instant::now();
                record.alive = true;
            }
            None => {
                peers.insert(
                    addr.to_string(),
                    PeerRecord {
                        addr: addr.to_string(),
                        last_seen: Instant::now(),
                        alive: true,
                    },
                );
            }
        }
    }

    /// Merges a peer's own view of the cluster into ours (spec.md §4.2:
    /// "new peers learned transitively").
    pub fn merge(&self, known: &[PeerInfo]) {
        for peer in known {
            if peer.addr != self.self_addr {
                let mut peers = self.peers.write().expect("membership lock poisoned");
                peers.entry(peer.addr.clone()).or_insert_with(|| PeerRecord {
                    addr: peer.addr.clone(),
                    last_seen: Instant::now(),
                    alive: false,
                });
            }
        }
    }

    /// Debug listing of every known server and its liveness (`GET /servers`,
    /// spec.md §6).
    pub fn snapshot(&self) -> Vec<ServerStatus> {
        self.peers
            .read()
            .expect("membership lock poisoned")
            .values()
            .map(|r| ServerStatus {
                addr: r.addr.clone(),
                alive: r.alive,
            })
            .collect()
    }

    /// All peers other than self, regardless of liveness.
    pub fn all_peer_addrs(&self) -> Vec<String> {
        self.peers
            .read()
            .expect("membership lock poisoned")
            .keys()
            .filter(|a| a.as_str() != self.self_addr)
            .cloned()
            .collect()
    }

    /// Peers currently believed alive, excluding self (spec.md §4.2:
    /// "`alive` is the input to all other components' known-peers
    /// queries").
    pub fn alive_peer_addrs(&self) -> Vec<String> {
        self.peers
            .read()
            .expect("membership lock poisoned")
            .values()
            .filter(|r| r.alive && r.addr != self.self_addr)
            .map(|r| r.addr.clone())
            .collect()
    }

    pub fn peer_info_list(&self) -> Vec<PeerInfo> {
        self.peers
            .read()
            .expect("membership lock poisoned")
            .keys()
            .map(|addr| PeerInfo {
                server_id: addr.clone(),
                addr: addr.clone(),
            })
            .collect()
    }

    /// Periodic sweep (spec.md §4.2): every 10s, flip `alive` to false for
    /// peers unseen for more than 15s.
    #[instrument(skip(self, shutdown))]
    pub async fn run_sweep_loop(&self, mut shutdown: Shutdown) {
        let mut ticker = time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => return,
            }
            let mut peers = self.peers.write().expect("membership lock poisoned");
            for record in peers.values_mut() {
                if record.addr == self.self_addr {
                    continue;
                }
                if record.alive && record.last_seen.elapsed() > self.alive_timeout {
                    warn!(peer = %record.addr, "peer now considered not-alive");
                    record.alive = false;
                }
            }
        }
    }

    /// One per-peer background task (spec.md §4.2): POSTs `/register`
    /// every 5s until the peer responds, then stops (the peer is now known
    /// and will be kept alive via heartbeats).
    #[instrument(skip(self, peer_client, shutdown))]
    pub async fn run_registration_loop(&self, peer_addr: String, peer_client: &PeerClient, mut shutdown: Shutdown) {
        let mut ticker = time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => return,
            }
            let request = RegisterRequest {
                server_id: self.self_addr.clone(),
                addr: self.self_addr.clone(),
            };
            match peer_client.register(&peer_addr, &request).await {
                Ok(response) => {
                    info!(peer = %peer_addr, "joined cluster");
                    self.upsert_seen(&peer_addr);
                    self.merge(&response.known_members);
                    return;
                }
                Err(err) => {
                    debug!(peer = %peer_addr, error = %err, "registration attempt failed, retrying");
                }
            }
        }
    }
}
