//! Top-level dependency injection and client-command dispatch for one
//! cluster node (spec.md §2 "Components", §9 dependency order: Membership
//! -> Leader Election -> Inventory -> Matchmaker -> Match Engine).

use crate::config::Config;
use crate::elector::Elector;
use crate::engine::MatchEngine;
use crate::error::MatchResult;
use crate::inventory_service::InventoryService;
use crate::matchmaker::Matchmaker;
use crate::membership::Membership;
use crate::shutdown::Shutdown;
use crate::store::{MatchStore, PlayerRegistry};
use crate::transport::broker::BrokerAdapter;
use crate::transport::peer_rpc::PeerClient;
use crate::transport::router::AppState;
use duel_core::wire::{ClientCommand, ClientEventEnvelope};
use duel_core::Player;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Node {
    pub config: Config,
    pub membership: Arc<Membership>,
    pub elector: Arc<Elector>,
    pub inventory: Arc<InventoryService>,
    pub matchmaker: Arc<Matchmaker>,
    pub engine: Arc<MatchEngine>,
    pub players: Arc<PlayerRegistry>,
    pub matches: Arc<MatchStore>,
    pub broker: Arc<BrokerAdapter>,
    pub peer_client: Arc<PeerClient>,
}

impl Node {
    pub fn new(config: Config) -> Node {
        let membership = Arc::new(Membership::new(config.addr.clone(), &config.peers));
        let peer_client = Arc::new(PeerClient::new(config.server_id.clone(), config.shared_secret.clone()));

        let elector = Arc::new(Elector::new(
            config.addr.clone(),
            (config.peers.len() as u64 + 1).max(1),
            membership.clone(),
            peer_client.clone(),
            Duration::from_millis(config.election_timeout_ms),
            Duration::from_millis(config.heartbeat_interval_ms),
        ));

        let inventory = Arc::new(InventoryService::new(config.addr.clone(), elector.clone(), peer_client.clone()));

        let players = Arc::new(PlayerRegistry::new());
        let matches = Arc::new(MatchStore::new());
        let broker = Arc::new(BrokerAdapter::new());

        let matchmaker = Arc::new(Matchmaker::new(
            config.addr.clone(),
            players.clone(),
            matches.clone(),
            membership.clone(),
            peer_client.clone(),
            broker.clone(),
        ));

        let engine = Arc::new(MatchEngine::new(
            config.addr.clone(),
            config.shared_secret.clone(),
            matches.clone(),
            players.clone(),
            inventory.clone(),
            peer_client.clone(),
            broker.clone(),
        ));

        Node {
            config,
            membership,
            elector,
            inventory,
            matchmaker,
            engine,
            players,
            matches,
            broker,
            peer_client,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            shared_secret: Arc::new(self.config.shared_secret.clone()),
            membership: self.membership.clone(),
            elector: self.elector.clone(),
            inventory: self.inventory.clone(),
            matchmaker: self.matchmaker.clone(),
            engine: self.engine.clone(),
        }
    }

    /// Spawns every background loop (spec.md §4.1-§4.6): membership sweep
    /// and per-peer registration, election timeout, heartbeat emission,
    /// cross-server matchmaking probe, the AwaitingPurchase cancel sweep,
    /// and the inbound client-command dispatch loop that drains the broker
    /// adapter and fans each message to its owning component.
    pub fn spawn_background_tasks(self: &Arc<Node>, shutdown: Shutdown) {
        let node = self.clone();
        let sd = shutdown.clone();
        tokio::spawn(async move { node.membership.run_sweep_loop(sd).await });

        for peer in &self.config.peers {
            if *peer == self.config.addr {
                continue;
            }
            let node = self.clone();
            let peer = peer.clone();
            let sd = shutdown.clone();
            tokio::spawn(async move { node.membership.run_registration_loop(peer, &node.peer_client, sd).await });
        }

        let node = self.clone();
        let sd = shutdown.clone();
        tokio::spawn(async move { node.elector.run_election_loop(sd).await });

        let node = self.clone();
        let sd = shutdown.clone();
        tokio::spawn(async move { node.elector.run_heartbeat_loop(sd).await });

        let node = self.clone();
        let sd = shutdown.clone();
        tokio::spawn(async move { node.matchmaker.run_probe_loop(sd).await });

        let node = self.clone();
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let matchmaker = node.matchmaker.clone();
            node.engine
                .run_cancel_sweep_loop(sd, move |match_id, player_ids| {
                    info!(match_id, count = player_ids.len(), "re-queuing players from a cancelled match");
                    for id in player_ids {
                        matchmaker.enqueue(&id);
                    }
                })
                .await
        });

        let node = self.clone();
        let mut sd = shutdown;
        let mut command_rx = self.broker.take_inbound();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = command_rx.recv() => {
                        let Some(message) = message else { return };
                        match serde_json::from_value::<ClientCommand>(message) {
                            Ok(command) => {
                                if let Err(err) = node.handle_client_command(command).await {
                                    warn!(error = %err, "client command failed");
                                }
                            }
                            Err(err) => warn!(error = %err, "could not parse inbound client command"),
                        }
                    }
                    _ = sd.recv() => return,
                }
            }
        });
    }

    /// Translates one parsed client command into the appropriate
    /// component call (spec.md §6 command table).
    pub async fn handle_client_command(&self, command: ClientCommand) -> MatchResult<()> {
        match command {
            ClientCommand::Login { nome } => {
                let cliente_id = uuid::Uuid::new_v4().to_string();
                self.players.insert(Player::new(cliente_id.clone(), nome));
                self.broker.publish_client_event(
                    &cliente_id,
                    ClientEventEnvelope::new(
                        "LOGIN_OK",
                        serde_json::json!({ "cliente_id": cliente_id, "servidor": self.config.addr }),
                    ),
                );
                Ok(())
            }
            ClientCommand::Enqueue { cliente_id } => {
                self.matchmaker.enqueue(&cliente_id);
                Ok(())
            }
            ClientCommand::BuyPack { cliente_id } => self.engine.buy_pack(&cliente_id).await,
            ClientCommand::PlayCard { cliente_id, carta_id } => self.engine.play_card(&cliente_id, &carta_id).await,
            ClientCommand::Chat { cliente_id, texto } => self.engine.chat(&cliente_id, &texto).await,
            ClientCommand::Trade {
                cliente_id,
                alvo_id,
                minha_carta_id,
                carta_desejada_id,
            } => {
                self.engine
                    .trade(&cliente_id, &alvo_id, &minha_carta_id, &carta_desejada_id)
                    .await
            }
        }
    }
}
