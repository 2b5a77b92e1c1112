use crate::membership::Membership;
use crate::shutdown::Shutdown;
use crate::store::{MatchStore, PlayerRegistry, WaitingQueue};
use crate::transport::broker::BrokerAdapter;
use crate::transport::peer_rpc::PeerClient;
use duel_core::wire::{ClientEventEnvelope, RequestOpponentRequest, RequestOpponentResponse};
use duel_core::{Match, Seat};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{info, instrument};

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Local queue + cross-server opponent probe; forms Host/Shadow pairs
/// (spec.md §2 component #5, §4.5).
pub struct Matchmaker {
    self_addr: String,
    queue: WaitingQueue,
    players: Arc<PlayerRegistry>,
    matches: Arc<MatchStore>,
    membership: Arc<Membership>,
    peer_client: Arc<PeerClient>,
    broker: Arc<BrokerAdapter>,
}

impl Matchmaker {
    pub fn new(
        self_addr: impl Into<String>,
        players: Arc<PlayerRegistry>,
        matches: Arc<MatchStore>,
        membership: Arc<Membership>,
        peer_client: Arc<PeerClient>,
        broker: Arc<BrokerAdapter>,
    ) -> Matchmaker {
        Matchmaker {
            self_addr: self_addr.into(),
            queue: WaitingQueue::new(),
            players,
            matches,
            membership,
            peer_client,
            broker,
        }
    }

    /// `enqueue(player)` (spec.md §4.5): pairs immediately with the head of
    /// the local queue if one is waiting, else joins the queue. The queue
    /// lock is held across the whole dequeue-and-match-construction step to
    /// bound the double-pairing race (spec.md §4.5 "Double-pairing
    /// prevention").
    #[instrument(skip(self))]
    pub fn enqueue(&self, player_id: &str) {
        let mut guard = self.queue.lock();
        if let Some(opponent_id) = guard.pop_front() {
            drop(guard);
            self.form_same_server_match(&opponent_id, player_id);
        } else {
            guard.push_back(player_id.to_string());
            drop(guard);
            self.broker
                .publish_client_event(player_id, ClientEventEnvelope::new("WAITING_OPPONENT", serde_json::json!({})));
        }
    }

    fn form_same_server_match(&self, a_id: &str, b_id: &str) {
        let Some(a) = self.players.get(a_id) else { return };
        let Some(b) = self.players.get(b_id) else { return };
        let match_id = uuid::Uuid::new_v4().to_string();
        let seat_a = Seat::new(a.id.clone(), a.name.clone());
        let seat_b = Seat::new(b.id.clone(), b.name.clone());
        let m = Match::new(match_id.clone(), seat_a, seat_b, self.self_addr.clone(), None, now_unix());
        self.matches.insert(m);
        self.players.with_mut(&a.id, |p| p.match_id = Some(match_id.clone()));
        self.players.with_mut(&b.id, |p| p.match_id = Some(match_id.clone()));
        self.notify_match_found(&a.id, &match_id, &b.id, &b.name);
        self.notify_match_found(&b.id, &match_id, &a.id, &a.name);
        info!(match_id, a = a.id, b = b.id, "formed same-server match");
    }

    fn notify_match_found(&self, to: &str, match_id: &str, opponent_id: &str, opponent_name: &str) {
        self.broker.publish_client_event(
            to,
            ClientEventEnvelope::new(
                "MATCH_FOUND",
                serde_json::json!({
                    "match_id": match_id,
                    "opponent_id": opponent_id,
                    "opponent_name": opponent_name,
                }),
            ),
        );
    }

    /// Server-side handler for `RequestOpponent` (spec.md §4.5): atomically
    /// dequeues the local head and creates the match locally with the
    /// dequeued player as Player-A and a DTO for the remote player as
    /// Player-B, Host = self, Shadow = origin.
    #[instrument(skip(self, req))]
    pub fn handle_request_opponent(&self, req: RequestOpponentRequest) -> RequestOpponentResponse {
        let mut guard = self.queue.lock();
        let Some(local_id) = guard.pop_front() else {
            return RequestOpponentResponse {
                found: false,
                match_id: None,
                host_addr: None,
                opponent_id: None,
                opponent_name: None,
            };
        };
        drop(guard);
        let Some(local_player) = self.players.get(&local_id) else {
            return RequestOpponentResponse {
                found: false,
                match_id: None,
                host_addr: None,
                opponent_id: None,
                opponent_name: None,
            };
        };
        let match_id = uuid::Uuid::new_v4().to_string();
        let seat_local = Seat::new(local_player.id.clone(), local_player.name.clone());
        let seat_remote = Seat::new(req.solicitor_id.clone(), req.solicitor_name.clone());
        let m = Match::new(
            match_id.clone(),
            seat_local,
            seat_remote,
            self.self_addr.clone(),
            Some(req.origin.clone()),
            now_unix(),
        );
        self.matches.insert(m);
        self.players
            .with_mut(&local_player.id, |p| p.match_id = Some(match_id.clone()));
        self.notify_match_found(&local_player.id, &match_id, &req.solicitor_id, &req.solicitor_name);
        info!(match_id, local = local_player.id, remote = req.solicitor_id, "formed cross-server match as host");
        RequestOpponentResponse {
            found: true,
            match_id: Some(match_id),
            host_addr: Some(self.self_addr.clone()),
            opponent_id: Some(local_player.id),
            opponent_name: Some(local_player.name),
        }
    }

    /// Background probe (spec.md §4.5): every 5s, inspects the head of the
    /// local queue without removing it and solicits alive peers in random
    /// order until one reports a match.
    #[instrument(skip(self, shutdown))]
    pub async fn run_probe_loop(&self, mut shutdown: Shutdown) {
        let mut ticker = time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => return,
            }
            let Some(solicitor_id) = self.queue.peek_front() else { continue };
            let Some(solicitor) = self.players.get(&solicitor_id) else { continue };

            let mut peers = self.membership.alive_peer_addrs();
            peers.shuffle(&mut rand::thread_rng());

            let request = RequestOpponentRequest {
                solicitor_id: solicitor.id.clone(),
                solicitor_name: solicitor.name.clone(),
                origin: self.self_addr.clone(),
            };

            for peer in peers {
                let response = match self.peer_client.request_opponent(&peer, &request).await {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                if !response.found {
                    continue;
                }
                let mut guard = self.queue.lock();
                let still_waiting = guard.front().map(|id| id == &solicitor_id).unwrap_or(false);
                if still_waiting {
                    guard.pop_front();
                }
                drop(guard);
                if !still_waiting {
                    // Our player left locally between the peek and the probe
                    // response; the remote side already created its half of
                    // the match and will be reclaimed by the cancel sweep.
                    break;
                }
                let (Some(match_id), Some(host_addr), Some(opponent_id), Some(opponent_name)) =
                    (response.match_id, response.host_addr, response.opponent_id, response.opponent_name)
                else {
                    break;
                };
                let seat_self = Seat::new(solicitor.id.clone(), solicitor.name.clone());
                let seat_opponent = Seat::new(opponent_id.clone(), opponent_name.clone());
                let m = Match::new(match_id.clone(), seat_self, seat_opponent, host_addr, Some(self.self_addr.clone()), now_unix());
                self.matches.insert(m);
                self.players.with_mut(&solicitor.id, |p| p.match_id = Some(match_id.clone()));
                self.notify_match_found(&solicitor.id, &match_id, &opponent_id, &opponent_name);
                info!(match_id, local = solicitor.id, "formed cross-server match as shadow");
                break;
            }
        }
    }
}
