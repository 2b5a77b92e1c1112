use crate::membership::Membership;
use crate::shutdown::Shutdown;
use crate::transport::peer_rpc::PeerClient;
use duel_core::wire::{AnnounceLeaderRequest, HeartbeatRequest, RequestVoteRequest, RequestVoteResponse};
use rand::Rng;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{info, instrument, warn};

/// Leader state (spec.md §3): current term, known leader, self-is-leader
/// flag, timestamp of last leader evidence.
#[derive(Debug, Clone)]
pub struct LeaderState {
    pub term: u64,
    pub leader: Option<String>,
    pub self_is_leader: bool,
    pub last_leader_evidence: Instant,
}

impl LeaderState {
    fn initial() -> LeaderState {
        LeaderState {
            term: 0,
            leader: None,
            self_is_leader: false,
            last_leader_evidence: Instant::now(),
        }
    }
}

/// Term-based majority election for the Inventory Guardian role
/// (spec.md §2 component #3, §4.3).
pub struct Elector {
    self_addr: String,
    total_nodes: u64,
    membership: Membership_,
    peer_client: PeerClient_,
    state: Mutex<LeaderState>,
    election_timeout: Duration,
    heartbeat_interval: Duration,
}

// Type aliases kept local to avoid repeating the Arc<...> spelling; the
// fields themselves are plain Arcs injected at construction time, per
// spec.md §9's "dependency injection rather than package-level variables".
type Membership_ = std::sync::Arc<Membership>;
type PeerClient_ = std::sync::Arc<PeerClient>;

impl Elector {
    pub fn new(
        self_addr: impl Into<String>,
        total_nodes: u64,
        membership: Membership_,
        peer_client: PeerClient_,
        election_timeout: Duration,
        heartbeat_interval: Duration,
    ) -> Elector {
        Elector {
            self_addr: self_addr.into(),
            total_nodes,
            membership,
            peer_client,
            state: Mutex::new(LeaderState::initial()),
            election_timeout,
            heartbeat_interval,
        }
    }

    fn majority(&self) -> u64 {
        self.total_nodes / 2 + 1
    }

    pub fn snapshot(&self) -> LeaderState {
        self.state.lock().expect("elector lock poisoned").clone()
    }

    pub fn is_leader(&self) -> bool {
        self.state.lock().expect("elector lock poisoned").self_is_leader
    }

    pub fn current_leader(&self) -> Option<String> {
        self.state.lock().expect("elector lock poisoned").leader.clone()
    }

    pub fn current_term(&self) -> u64 {
        self.state.lock().expect("elector lock poisoned").term
    }

    /// Vote rule (spec.md §4.3): grant iff the candidate's term is strictly
    /// higher than ours; a candidate only asks once per term increment so a
    /// simple "highest term seen" check is sufficient.
    pub fn handle_vote_request(&self, req: RequestVoteRequest) -> RequestVoteResponse {
        let mut state = self.state.lock().expect("elector lock poisoned");
        if req.term > state.term {
            state.term = req.term;
            state.self_is_leader = false;
            RequestVoteResponse {
                granted: true,
                term: req.term,
            }
        } else {
            RequestVoteResponse {
                granted: false,
                term: state.term,
            }
        }
    }

    /// Announcement rule (spec.md §4.3): if `t >= ownTerm`, adopt it.
    pub fn handle_announce(&self, req: AnnounceLeaderRequest) {
        let mut state = self.state.lock().expect("elector lock poisoned");
        if req.term >= state.term {
            state.term = req.term;
            state.leader = Some(req.leader.clone());
            state.self_is_leader = req.leader == self.self_addr;
            state.last_leader_evidence = Instant::now();
        }
    }

    /// Heartbeats double as leader announcements in steady state
    /// (spec.md §4.3 "begin emitting leader-bearing heartbeats").
    pub fn handle_heartbeat(&self, req: HeartbeatRequest) -> u64 {
        let mut state = self.state.lock().expect("elector lock poisoned");
        if req.term >= state.term {
            state.term = req.term;
            if let Some(leader) = req.leader {
                state.leader = Some(leader.clone());
                state.self_is_leader = leader == self.self_addr;
            }
            state.last_leader_evidence = Instant::now();
        }
        state.term
    }

    fn jittered_timeout(&self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_secs_f64(self.election_timeout.as_secs_f64() * jitter)
    }

    /// Drives the election timeout: becomes Candidate when no leader
    /// evidence has been seen for longer than the (jittered) timeout
    /// (spec.md §4.3).
    #[instrument(skip(self, shutdown))]
    pub async fn run_election_loop(&self, mut shutdown: Shutdown) {
        let mut ticker = time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => return,
            }
            let timeout = self.jittered_timeout();
            let elapsed = {
                let state = self.state.lock().expect("elector lock poisoned");
                if state.self_is_leader {
                    continue;
                }
                state.last_leader_evidence.elapsed()
            };
            if elapsed > timeout {
                self.run_election().await;
            }
        }
    }

    async fn run_election(&self) {
        let term = {
            let mut state = self.state.lock().expect("elector lock poisoned");
            state.term += 1;
            state.self_is_leader = false;
            state.last_leader_evidence = Instant::now();
            state.term
        };
        info!(term, "election timeout elapsed, becoming candidate");

        let peers = self.membership.all_peer_addrs();
        let request = RequestVoteRequest {
            candidate: self.self_addr.clone(),
            term,
        };
        let votes = futures::future::join_all(
            peers
                .iter()
                .map(|peer| self.peer_client.request_vote(peer, &request)),
        )
        .await;

        let mut granted: u64 = 1; // self-vote
        let mut highest_seen = term;
        for vote in votes.into_iter().flatten() {
            highest_seen = highest_seen.max(vote.term);
            if vote.granted && vote.term == term {
                granted += 1;
            }
        }

        let mut state = self.state.lock().expect("elector lock poisoned");
        if highest_seen > state.term {
            // Someone has moved on to a later term; step down quietly.
            state.term = highest_seen;
            return;
        }
        if state.term != term {
            // Term changed underneath us (e.g. we heard an announcement mid-election).
            return;
        }
        if granted >= self.majority() {
            state.self_is_leader = true;
            state.leader = Some(self.self_addr.clone());
            state.last_leader_evidence = Instant::now();
            drop(state);
            info!(term, votes = granted, "won election, becoming leader");
            self.broadcast_announce(term).await;
        } else {
            warn!(term, votes = granted, needed = self.majority(), "election did not reach quorum");
        }
    }

    async fn broadcast_announce(&self, term: u64) {
        let peers = self.membership.all_peer_addrs();
        let request = AnnounceLeaderRequest {
            leader: self.self_addr.clone(),
            term,
        };
        futures::future::join_all(peers.iter().map(|peer| self.peer_client.announce_leader(peer, &request))).await;
    }

    /// Heartbeat loop (spec.md §4.2, §4.3): every node emits heartbeats to
    /// every peer on every tick; only the current Leader's heartbeats
    /// carry leader-authority information (`leader: Some(self)`), which is
    /// what lets a heartbeat double as a leader announcement in steady
    /// state.
    #[instrument(skip(self, shutdown))]
    pub async fn run_heartbeat_loop(&self, mut shutdown: Shutdown) {
        let mut ticker = time::interval(self.heartbeat_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => return,
            }
            let (term, leader, is_leader) = {
                let state = self.state.lock().expect("elector lock poisoned");
                (state.term, state.leader.clone(), state.self_is_leader)
            };
            let request = HeartbeatRequest {
                server_id: self.self_addr.clone(),
                term,
                leader: if is_leader { Some(self.self_addr.clone()) } else { leader },
            };
            let peers = self.membership.all_peer_addrs();
            let results =
                futures::future::join_all(peers.iter().map(|peer| self.peer_client.heartbeat(peer, &request))).await;
            for (peer, result) in peers.iter().zip(results) {
                if let Ok(response) = result {
                    self.membership.upsert_seen(peer);
                    if response.term > self.current_term() {
                        let mut state = self.state.lock().expect("elector lock poisoned");
                        if response.term > state.term {
                            state.term = response.term;
                            state.self_is_leader = false;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::peer_rpc::PeerClient;
    use std::sync::Arc;

    fn elector(total_nodes: u64) -> Elector {
        Elector::new(
            "127.0.0.1:1",
            total_nodes,
            Arc::new(Membership::new("127.0.0.1:1", &[])),
            Arc::new(PeerClient::new("n1".to_string(), "secret".to_string())),
            Duration::from_millis(200),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn vote_is_granted_only_for_a_strictly_higher_term() {
        let e = elector(3);
        let granted = e.handle_vote_request(RequestVoteRequest {
            candidate: "127.0.0.1:2".to_string(),
            term: 1,
        });
        assert!(granted.granted);
        assert_eq!(e.current_term(), 1);

        let rejected = e.handle_vote_request(RequestVoteRequest {
            candidate: "127.0.0.1:3".to_string(),
            term: 1,
        });
        assert!(!rejected.granted, "a term already seen must not be granted twice");
    }

    #[test]
    fn majority_is_computed_as_more_than_half_of_total_nodes() {
        assert_eq!(elector(1).majority(), 1);
        assert_eq!(elector(2).majority(), 2);
        assert_eq!(elector(3).majority(), 2);
        assert_eq!(elector(5).majority(), 3);
    }

    #[test]
    fn announce_is_adopted_only_when_term_is_not_behind() {
        let e = elector(3);
        e.handle_announce(AnnounceLeaderRequest {
            leader: "127.0.0.1:2".to_string(),
            term: 2,
        });
        assert_eq!(e.current_leader().as_deref(), Some("127.0.0.1:2"));
        assert_eq!(e.current_term(), 2);

        // A stale announcement from an earlier term must not overwrite it.
        e.handle_announce(AnnounceLeaderRequest {
            leader: "127.0.0.1:3".to_string(),
            term: 1,
        });
        assert_eq!(e.current_leader().as_deref(), Some("127.0.0.1:2"));
    }

    #[test]
    fn heartbeat_carrying_a_leader_updates_self_is_leader() {
        let e = elector(3);
        e.handle_heartbeat(HeartbeatRequest {
            server_id: "127.0.0.1:2".to_string(),
            term: 1,
            leader: Some("127.0.0.1:1".to_string()),
        });
        assert!(e.is_leader(), "a heartbeat naming self as leader must flip self_is_leader");
    }

    #[test]
    fn fresh_elector_has_not_already_elapsed_its_timeout() {
        let e = elector(3);
        let state = e.state.lock().unwrap();
        let elapsed = state.last_leader_evidence.elapsed();
        drop(state);
        assert!(elapsed < e.election_timeout, "a freshly constructed elector must not already be past its timeout");
    }
}
