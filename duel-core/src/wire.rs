//! Wire types shared between the client channel (broker transport) and the
//! peer RPC mesh (spec.md §6). Kept in `duel-core` so both `duel-server`'s
//! client-facing and peer-facing adapters serialize/deserialize the same
//! shapes.

use crate::card::Card;
use serde::{Deserialize, Serialize};

/// Inbound client command envelope: `{ "comando": ..., "dados": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCommandEnvelope {
    pub comando: String,
    pub dados: serde_json::Value,
}

/// Outbound client event envelope, same shape, different vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEventEnvelope {
    pub comando: String,
    pub dados: serde_json::Value,
}

impl ClientEventEnvelope {
    pub fn new(comando: impl Into<String>, dados: impl Serialize) -> ClientEventEnvelope {
        ClientEventEnvelope {
            comando: comando.into(),
            dados: serde_json::to_value(dados).expect("payload must be serializable"),
        }
    }

    pub fn error(mensagem: impl Into<String>) -> ClientEventEnvelope {
        ClientEventEnvelope::new("ERROR", serde_json::json!({ "mensagem": mensagem.into() }))
    }
}

/// Recognized `comando` values (spec.md §6 table). Parsed once by the
/// broker adapter into this tagged variant; every subsequent dispatch is
/// exhaustive (spec.md §9 "dynamic dispatch on message type").
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "comando", content = "dados")]
pub enum ClientCommand {
    #[serde(rename = "LOGIN")]
    Login { nome: String },
    #[serde(rename = "ENQUEUE")]
    Enqueue { cliente_id: String },
    #[serde(rename = "BUY_PACK")]
    BuyPack { cliente_id: String },
    #[serde(rename = "PLAY_CARD")]
    PlayCard { cliente_id: String, carta_id: String },
    #[serde(rename = "CHAT")]
    Chat { cliente_id: String, texto: String },
    #[serde(rename = "TRADE")]
    Trade {
        cliente_id: String,
        alvo_id: String,
        minha_carta_id: String,
        carta_desejada_id: String,
    },
}

// ---- Peer RPC DTOs (spec.md §6 table) --------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub server_id: String,
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub known_members: Vec<PeerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub server_id: String,
    pub addr: String,
}

/// One row of the `GET /servers` debug listing (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub addr: String,
    pub alive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListServersResponse {
    pub servers: Vec<ServerStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub server_id: String,
    pub term: u64,
    pub leader: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub server_id: String,
    pub term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub candidate: String,
    pub term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub granted: bool,
    pub term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceLeaderRequest {
    pub leader: String,
    pub term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceLeaderResponse {
    pub term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyPackRequest {
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyPackResponse {
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InventoryStatusRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryStatusResponse {
    pub common: usize,
    pub uncommon: usize,
    pub rare: usize,
    pub legendary: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOpponentRequest {
    pub solicitor_id: String,
    pub solicitor_name: String,
    pub origin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOpponentResponse {
    pub found: bool,
    pub match_id: Option<String>,
    pub host_addr: Option<String>,
    pub opponent_id: Option<String>,
    pub opponent_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEventRequest {
    pub match_id: String,
    pub proposed_seq: u64,
    pub player_id: String,
    pub kind: crate::match_state::EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEventResponse {
    pub accepted: bool,
    pub current_seq: u64,
    pub snapshot: Option<crate::match_state::Match>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub event_seq: u64,
    pub snapshot: crate::match_state::Match,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateResponse {
    pub accepted: bool,
    pub current_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPlayerRequest {
    pub client_id: String,
    pub envelope: ClientEventEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPlayerResponse {
    pub delivered: bool,
}
