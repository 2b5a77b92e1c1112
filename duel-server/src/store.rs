//! Shared in-process state for a node: the local Player registry, the
//! per-server waiting queue, and the cluster-wide-addressable match store
//! (spec.md §3, §5, §9).
//!
//! Cyclic references (Player <-> Match) are resolved by identifier, per
//! spec.md §9: a Player holds only the `match_id` it belongs to, and the
//! `matchId -> Match` map owns the matches themselves.

use duel_core::{Match, Player};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Local Players known to this server, one entry per connected client
/// (spec.md §3 Player). `dashmap` gives per-entry locking, which is the
/// "one player lock per player" scope spec.md §5 calls for.
#[derive(Default)]
pub struct PlayerRegistry {
    players: dashmap::DashMap<String, Player>,
}

impl PlayerRegistry {
    pub fn new() -> PlayerRegistry {
        PlayerRegistry::default()
    }

    pub fn insert(&self, player: Player) {
        self.players.insert(player.id.clone(), player);
    }

    pub fn get(&self, id: &str) -> Option<Player> {
        self.players.get(id).map(|r| r.clone())
    }

    pub fn with_mut<R>(&self, id: &str, f: impl FnOnce(&mut Player) -> R) -> Option<R> {
        self.players.get_mut(id).map(|mut p| f(&mut p))
    }
}

/// Per-server waiting queue (spec.md §3, §4.5). Guarded by a single mutex
/// per spec.md §5 "one waiting-queue lock per server"; the lock is held
/// across the full dequeue-and-decide critical section to prevent
/// double-pairing (spec.md §4.5).
#[derive(Default)]
pub struct WaitingQueue {
    queue: Mutex<VecDeque<String>>,
}

impl WaitingQueue {
    pub fn new() -> WaitingQueue {
        WaitingQueue::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.queue.lock().expect("waiting queue lock poisoned")
    }

    pub fn push(&self, player_id: String) {
        self.lock().push_back(player_id);
    }

    pub fn pop_front(&self) -> Option<String> {
        self.lock().pop_front()
    }

    pub fn peek_front(&self) -> Option<String> {
        self.lock().front().cloned()
    }

    pub fn remove(&self, player_id: &str) {
        self.lock().retain(|id| id != player_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Cluster-addressable match map (spec.md §9: "The `matchId -> Match` map
/// owns matches"). One `std::sync::Mutex` per match (spec.md §5): using
/// `std::sync::Mutex` rather than `tokio::sync::Mutex` means the compiler
/// rejects any attempt to hold a match's guard across an `.await`, which is
/// exactly spec.md §4.6/§5's "never hold the match lock during a
/// `/game/replicate` or `/game/event` call; always snapshot" rule enforced
/// structurally instead of by convention.
#[derive(Default)]
pub struct MatchStore {
    matches: dashmap::DashMap<String, std::sync::Arc<Mutex<Match>>>,
}

impl MatchStore {
    pub fn new() -> MatchStore {
        MatchStore::default()
    }

    pub fn insert(&self, m: Match) {
        self.matches.insert(m.id.clone(), std::sync::Arc::new(Mutex::new(m)));
    }

    pub fn get(&self, match_id: &str) -> Option<std::sync::Arc<Mutex<Match>>> {
        self.matches.get(match_id).map(|r| r.clone())
    }

    pub fn remove(&self, match_id: &str) {
        self.matches.remove(match_id);
    }

    pub fn ids(&self) -> Vec<String> {
        self.matches.iter().map(|e| e.key().clone()).collect()
    }
}
