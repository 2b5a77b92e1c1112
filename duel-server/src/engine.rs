use crate::error::{MatchError, MatchResult};
use crate::inventory_service::InventoryService;
use crate::shutdown::Shutdown;
use crate::store::{MatchStore, PlayerRegistry};
use crate::transport::broker::BrokerAdapter;
use crate::transport::peer_rpc::PeerClient;
use duel_core::token::sign_event;
use duel_core::wire::{ClientEventEnvelope, GameEventRequest, GameEventResponse, NotifyPlayerRequest, ReplicateRequest, ReplicateResponse};
use duel_core::{Card, Event, EventKind, Match, Phase};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{info, instrument, warn};

const AWAITING_PURCHASE_TIMEOUT_SECS: u64 = 30;

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Per-match event-sequenced state machine; Host-authoritative,
/// Shadow-replicated; failover on Host loss (spec.md §2 component #6,
/// §4.6).
pub struct MatchEngine {
    self_addr: String,
    shared_secret: String,
    matches: Arc<MatchStore>,
    players: Arc<PlayerRegistry>,
    inventory: Arc<InventoryService>,
    peer_client: Arc<PeerClient>,
    broker: Arc<BrokerAdapter>,
}

impl MatchEngine {
    pub fn new(
        self_addr: impl Into<String>,
        shared_secret: impl Into<String>,
        matches: Arc<MatchStore>,
        players: Arc<PlayerRegistry>,
        inventory: Arc<InventoryService>,
        peer_client: Arc<PeerClient>,
        broker: Arc<BrokerAdapter>,
    ) -> MatchEngine {
        MatchEngine {
            self_addr: self_addr.into(),
            shared_secret: shared_secret.into(),
            matches,
            players,
            inventory,
            peer_client,
            broker,
        }
    }

    fn match_of(&self, client_id: &str) -> MatchResult<String> {
        self.players
            .get(client_id)
            .and_then(|p| p.match_id)
            .ok_or_else(|| MatchError::NoSuchMatch(client_id.to_string()))
    }

    fn arc_for(&self, match_id: &str) -> MatchResult<Arc<std::sync::Mutex<Match>>> {
        self.matches.get(match_id).ok_or_else(|| MatchError::NoSuchMatch(match_id.to_string()))
    }

    // ---- Client command entry points (spec.md §4.6 "Command semantics") ----

    /// `BuyPack`: allocation happens at the home server regardless of who
    /// Hosts the match; only the resulting `PlayerReady` is routed to the
    /// Host (spec.md §4.6).
    #[instrument(skip(self))]
    pub async fn buy_pack(&self, client_id: &str) -> MatchResult<()> {
        let match_id = self.match_of(client_id)?;
        let host_addr = {
            let arc = self.arc_for(&match_id)?;
            let m = arc.lock().expect("match lock poisoned");
            m.host.clone()
        };
        let cards: Vec<Card> = self.inventory.allocate_pack(client_id).await?;
        self.players.with_mut(client_id, |p| p.hand.extend(cards.clone()));
        self.broker.publish_client_event(
            client_id,
            ClientEventEnvelope::new("PACK_RESULT", serde_json::json!({ "cards": cards })),
        );
        self.dispatch(&match_id, &host_addr, client_id, EventKind::PlayerReady { hand: cards })
            .await
    }

    #[instrument(skip(self))]
    pub async fn play_card(&self, client_id: &str, card_id: &str) -> MatchResult<()> {
        let match_id = self.match_of(client_id)?;
        let host_addr = {
            let arc = self.arc_for(&match_id)?;
            let m = arc.lock().expect("match lock poisoned");
            m.host.clone()
        };
        self.dispatch(
            &match_id,
            &host_addr,
            client_id,
            EventKind::CardPlayed { card_id: card_id.to_string() },
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn chat(&self, client_id: &str, text: &str) -> MatchResult<()> {
        let match_id = self.match_of(client_id)?;
        let host_addr = {
            let arc = self.arc_for(&match_id)?;
            let m = arc.lock().expect("match lock poisoned");
            m.host.clone()
        };
        self.dispatch(&match_id, &host_addr, client_id, EventKind::ChatSent { text: text.to_string() })
            .await
    }

    #[instrument(skip(self))]
    pub async fn trade(&self, client_id: &str, counterparty_id: &str, offered_card_id: &str, desired_card_id: &str) -> MatchResult<()> {
        let match_id = self.match_of(client_id)?;
        let host_addr = {
            let arc = self.arc_for(&match_id)?;
            let m = arc.lock().expect("match lock poisoned");
            m.host.clone()
        };
        self.dispatch(
            &match_id,
            &host_addr,
            client_id,
            EventKind::Traded {
                offered_card_id: offered_card_id.to_string(),
                desired_card_id: desired_card_id.to_string(),
                counterparty_id: counterparty_id.to_string(),
            },
        )
        .await
    }

    /// Routes a command to the Host: applies locally if we are the Host,
    /// otherwise forwards over `/game/event` (spec.md §4.6). A forwarding
    /// failure triggers failover, not a retry (SPEC_FULL.md §10).
    async fn dispatch(&self, match_id: &str, host_addr: &str, player_id: &str, kind: EventKind) -> MatchResult<()> {
        if host_addr == self.self_addr {
            return self.apply_local(match_id, player_id, kind);
        }

        let proposed_seq = {
            let arc = self.arc_for(match_id)?;
            let m = arc.lock().expect("match lock poisoned");
            m.event_seq + 1
        };
        let request = GameEventRequest {
            match_id: match_id.to_string(),
            proposed_seq,
            player_id: player_id.to_string(),
            kind: kind.clone(),
        };
        match self.peer_client.submit_event(host_addr, &request).await {
            Ok(response) => {
                if response.accepted {
                    Ok(())
                } else {
                    if let Some(snapshot) = response.snapshot {
                        self.adopt_snapshot(match_id, snapshot);
                    }
                    Err(MatchError::StaleEvent {
                        proposed: proposed_seq,
                        current: response.current_seq,
                    })
                }
            }
            Err(transport_err) => {
                warn!(match_id, error = %transport_err, "host unreachable, promoting self to host");
                self.promote_to_host(match_id);
                self.apply_local(match_id, player_id, kind)
            }
        }
    }

    /// Shadow promotion (spec.md §4.6 "Failover"): step 1, under the match
    /// lock, set `Host = self, Shadow = ""`.
    fn promote_to_host(&self, match_id: &str) {
        if let Some(arc) = self.matches.get(match_id) {
            let mut m = arc.lock().expect("match lock poisoned");
            m.host = self.self_addr.clone();
            m.shadow = None;
        }
    }

    fn adopt_snapshot(&self, match_id: &str, snapshot: Match) {
        if let Some(arc) = self.matches.get(match_id) {
            let mut m = arc.lock().expect("match lock poisoned");
            if snapshot.event_seq > m.event_seq {
                *m = snapshot;
            }
        }
    }

    /// Applies an accepted command to the authoritative (Host) state,
    /// synchronously under the match lock, then broadcasts and replicates
    /// outside the lock (spec.md §5: never hold the match lock across a
    /// peer RPC).
    fn apply_local(&self, match_id: &str, player_id: &str, kind: EventKind) -> MatchResult<()> {
        let arc = self.arc_for(match_id)?;
        let (outbound, snapshot, shadow_addr) = {
            let mut m = arc.lock().expect("match lock poisoned");
            let outbound = self.mutate_and_log(&mut m, player_id, kind)?;
            (outbound, m.clone(), m.shadow.clone())
        };

        self.deliver(&snapshot, outbound);

        if let Some(shadow_addr) = shadow_addr {
            self.spawn_replication(shadow_addr, snapshot);
        }
        Ok(())
    }

    /// Remote submission path (`/game/event`, spec.md §4.6): the Shadow's
    /// optimistic `eventSeq` is advisory; the Host assigns the definitive
    /// sequence number itself and rejects stale proposals with the current
    /// state (spec.md §4.6, §7).
    #[instrument(skip(self, req))]
    pub fn handle_remote_event(&self, req: GameEventRequest) -> GameEventResponse {
        let arc = match self.matches.get(&req.match_id) {
            Some(arc) => arc,
            None => {
                return GameEventResponse {
                    accepted: false,
                    current_seq: 0,
                    snapshot: None,
                }
            }
        };
        let (accepted, current_seq, snapshot, outbound, shadow_addr) = {
            let mut m = arc.lock().expect("match lock poisoned");
            if req.proposed_seq <= m.event_seq {
                (false, m.event_seq, Some(m.clone()), None, None)
            } else {
                match self.mutate_and_log(&mut m, &req.player_id, req.kind) {
                    Ok(outbound) => (true, m.event_seq, Some(m.clone()), Some(outbound), m.shadow.clone()),
                    Err(_) => (false, m.event_seq, Some(m.clone()), None, None),
                }
            }
        };
        if let (Some(snap), Some(outbound)) = (snapshot.clone(), outbound) {
            self.deliver(&snap, outbound);
            if let Some(shadow_addr) = shadow_addr {
                self.spawn_replication(shadow_addr, snap);
            }
        }
        GameEventResponse {
            accepted,
            current_seq,
            snapshot,
        }
    }

    /// `/game/replicate` (spec.md §4.6): the Shadow accepts iff `n >
    /// ownEventSeq`, replacing its state wholesale; out-of-order or
    /// duplicate replications are dropped with a log line.
    #[instrument(skip(self, req))]
    pub fn handle_replicate(&self, req: ReplicateRequest) -> ReplicateResponse {
        let match_id = req.snapshot.id.clone();
        match self.matches.get(&match_id) {
            Some(arc) => {
                let mut m = arc.lock().expect("match lock poisoned");
                if req.event_seq > m.event_seq {
                    *m = req.snapshot;
                    ReplicateResponse {
                        accepted: true,
                        current_seq: m.event_seq,
                    }
                } else {
                    info!(match_id, proposed = req.event_seq, current = m.event_seq, "dropping stale/duplicate replication");
                    ReplicateResponse {
                        accepted: false,
                        current_seq: m.event_seq,
                    }
                }
            }
            None => {
                // First time this Shadow hears of the match: adopt wholesale.
                self.matches.insert(req.snapshot);
                ReplicateResponse {
                    accepted: true,
                    current_seq: req.event_seq,
                }
            }
        }
    }

    /// `/game/notify_player` (spec.md §6): the Host asking us to deliver an
    /// event to a remote player over our local broker connection.
    pub fn handle_notify_player(&self, req: NotifyPlayerRequest) -> bool {
        self.broker.publish_client_event(&req.client_id, req.envelope);
        true
    }

    fn spawn_replication(&self, shadow_addr: String, snapshot: Match) {
        let peer_client = self.peer_client.clone();
        let event_seq = snapshot.event_seq;
        tokio::spawn(async move {
            let request = ReplicateRequest { event_seq, snapshot };
            if let Err(err) = peer_client.replicate(&shadow_addr, &request).await {
                warn!(shadow = %shadow_addr, error = %err, "replication to shadow failed");
            }
        });
    }

    /// Delivers every queued outbound notification: directly via the
    /// broker for a locally-connected player, or via `/game/notify_player`
    /// to whichever peer holds the other seat's player.
    fn deliver(&self, m: &Match, outbound: Vec<(String, ClientEventEnvelope)>) {
        for (player_id, envelope) in outbound {
            if self.players.get(&player_id).is_some() {
                self.broker.publish_client_event(&player_id, envelope);
            } else {
                let remote_addr = if m.host == self.self_addr {
                    m.shadow.clone()
                } else {
                    Some(m.host.clone())
                };
                if let Some(addr) = remote_addr {
                    let peer_client = self.peer_client.clone();
                    let request = NotifyPlayerRequest { client_id: player_id, envelope };
                    tokio::spawn(async move {
                        let _ = peer_client.notify_player(&addr, &request).await;
                    });
                }
            }
        }
    }

    /// Applies one `EventKind` to `m`'s state, logging the resulting
    /// Event(s) (a single client command can cascade into several log
    /// entries, e.g. `CardPlayed` -> `TrickResolved` -> `MatchFinished`;
    /// spec.md §4.6). Returns the outbound notifications to deliver,
    /// `(player_id, envelope)`.
    fn mutate_and_log(&self, m: &mut Match, player_id: &str, kind: EventKind) -> MatchResult<Vec<(String, ClientEventEnvelope)>> {
        let mut outbound = Vec::new();
        match kind {
            EventKind::PlayerReady { hand } => {
                let seat = m.seat_mut(player_id).ok_or_else(|| MatchError::NoSuchMatch(m.id.clone()))?;
                seat.hand = hand.clone();
                seat.ready = true;
                self.log(m, EventKind::PlayerReady { hand }, player_id);
                if m.all_ready() && m.phase == Phase::AwaitingPurchase {
                    let turn_owner = {
                        let idx = rand::thread_rng().gen_range(0..2);
                        m.seats[idx].player_id.clone()
                    };
                    m.start_playing(turn_owner.clone());
                    for seat in &m.seats {
                        outbound.push((
                            seat.player_id.clone(),
                            ClientEventEnvelope::new(
                                "MATCH_STARTED",
                                serde_json::json!({ "turn_owner": turn_owner, "round": m.round }),
                            ),
                        ));
                    }
                }
            }
            EventKind::CardPlayed { card_id } => {
                let result = m.play_card(player_id, &card_id)?;
                self.log(m, EventKind::CardPlayed { card_id: card_id.clone() }, player_id);
                if let Some(result) = result {
                    self.log(
                        m,
                        EventKind::TrickResolved {
                            winner: result.winner.clone(),
                            round: result.round,
                        },
                        player_id,
                    );
                    for seat in &m.seats {
                        outbound.push((
                            seat.player_id.clone(),
                            ClientEventEnvelope::new(
                                "UPDATE",
                                serde_json::json!({
                                    "round": m.round,
                                    "hand_sizes": m.seats.iter().map(|s| (s.player_id.clone(), s.hand.len())).collect::<std::collections::HashMap<_,_>>(),
                                    "table_count": m.table.len(),
                                    "last_trick_winner": result.winner,
                                    "scores": m.seats.iter().map(|s| (s.player_id.clone(), s.match_points)).collect::<std::collections::HashMap<_,_>>(),
                                    "turn_owner": result.new_turn_owner,
                                }),
                            ),
                        ));
                    }
                    if let Some(outcome) = result.finished {
                        self.log(m, EventKind::MatchFinished { outcome: outcome.clone() }, player_id);
                        for seat in &m.seats {
                            outbound.push((
                                seat.player_id.clone(),
                                ClientEventEnvelope::new("MATCH_ENDED", serde_json::json!({ "outcome": outcome })),
                            ));
                        }
                        self.broker.drop_match(&m.id);
                    }
                } else {
                    // Still waiting on the opponent's play this trick.
                    for seat in &m.seats {
                        outbound.push((
                            seat.player_id.clone(),
                            ClientEventEnvelope::new(
                                "UPDATE",
                                serde_json::json!({
                                    "round": m.round,
                                    "table_count": m.table.len(),
                                    "turn_owner": m.turn_owner,
                                }),
                            ),
                        ));
                    }
                }
            }
            EventKind::ChatSent { text } => {
                self.log(m, EventKind::ChatSent { text: text.clone() }, player_id);
                for seat in &m.seats {
                    outbound.push((
                        seat.player_id.clone(),
                        ClientEventEnvelope::new(
                            "CHAT_RECEIVED",
                            serde_json::json!({ "from": player_id, "text": text }),
                        ),
                    ));
                }
            }
            EventKind::Traded {
                offered_card_id,
                desired_card_id,
                counterparty_id,
            } => {
                m.trade(player_id, &offered_card_id, &counterparty_id, &desired_card_id)?;
                self.log(
                    m,
                    EventKind::Traded {
                        offered_card_id: offered_card_id.clone(),
                        desired_card_id: desired_card_id.clone(),
                        counterparty_id: counterparty_id.clone(),
                    },
                    player_id,
                );
                for seat in &m.seats {
                    outbound.push((seat.player_id.clone(), ClientEventEnvelope::new("TRADE_DONE", serde_json::json!({}))));
                }
            }
            EventKind::MatchFinished { .. } | EventKind::TrickResolved { .. } => {
                // Never submitted directly by a client; only produced as a
                // cascade above.
                return Err(MatchError::Core(duel_core::CoreError::MalformedPayload(
                    "event kind is server-internal only".into(),
                )));
            }
        }
        Ok(outbound)
    }

    fn log(&self, m: &mut Match, kind: EventKind, player_id: &str) -> u64 {
        let ts = now_unix();
        let seq_preview = m.event_seq + 1;
        let tag = kind.tag();
        let signature = sign_event(&self.shared_secret, seq_preview, &m.id, ts, tag, player_id);
        m.append_event(kind, player_id.to_string(), ts, signature)
    }

    /// Verifies an Event's integrity tag (spec.md §3) — exposed for tests
    /// and for any future cross-node audit of a replicated log.
    pub fn verify_event(&self, event: &Event) -> bool {
        duel_core::token::verify_event(
            &self.shared_secret,
            event.seq,
            &event.match_id,
            event.timestamp,
            event.kind.tag(),
            &event.player_id,
            &event.signature,
        )
    }

    /// `CancelMatch` sweep (SPEC_FULL.md §10, resolving spec.md §9's open
    /// question): every 5s, abort any match this node Hosts that is still
    /// `AwaitingPurchase` 30s after creation, returning seated local
    /// players to their queue via a `MATCH_ENDED{cancelled}` notice. This
    /// node does not own a `Matchmaker` reference to re-enqueue players
    /// directly, so it only notifies; `Node` wires the queue re-insertion.
    #[instrument(skip(self, shutdown, on_cancelled))]
    pub async fn run_cancel_sweep_loop(&self, mut shutdown: Shutdown, on_cancelled: impl Fn(String, Vec<String>) + Send + Sync) {
        let mut ticker = time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => return,
            }
            let now = now_unix();
            for match_id in self.matches.ids() {
                let Some(arc) = self.matches.get(&match_id) else { continue };
                let stale = {
                    let m = arc.lock().expect("match lock poisoned");
                    m.host == self.self_addr
                        && m.phase == Phase::AwaitingPurchase
                        && now.saturating_sub(m.created_at_unix) > AWAITING_PURCHASE_TIMEOUT_SECS
                };
                if !stale {
                    continue;
                }
                let local_ids: Vec<String> = {
                    let m = arc.lock().expect("match lock poisoned");
                    m.seats
                        .iter()
                        .map(|s| s.player_id.clone())
                        .filter(|id| self.players.get(id).is_some())
                        .collect()
                };
                warn!(match_id, "cancelling match stuck in AwaitingPurchase");
                self.matches.remove(&match_id);
                self.broker.drop_match(&match_id);
                for id in &local_ids {
                    self.players.with_mut(id, |p| p.match_id = None);
                    self.broker.publish_client_event(
                        id,
                        ClientEventEnvelope::new("MATCH_ENDED", serde_json::json!({ "reason": "cancelled" })),
                    );
                }
                on_cancelled(match_id, local_ids);
            }
        }
    }
}
