//! HTTP surface for the peer RPC mesh (spec.md §6 table). Every route is
//! served by `axum` (the framework the retrieval pack's card-game example
//! reaches for; the teacher has no HTTP framework of its own). Every route
//! except `/register` and `/heartbeat` requires a valid bearer token
//! (spec.md §4.1).

use crate::elector::Elector;
use crate::engine::MatchEngine;
use crate::inventory_service::InventoryService;
use crate::matchmaker::Matchmaker;
use crate::membership::Membership;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use duel_core::token::verify_bearer_token;
use duel_core::wire::*;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub shared_secret: Arc<String>,
    pub membership: Arc<Membership>,
    pub elector: Arc<Elector>,
    pub inventory: Arc<InventoryService>,
    pub matchmaker: Arc<Matchmaker>,
    pub engine: Arc<MatchEngine>,
}

pub fn build_router(state: AppState) -> Router {
    let open = Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat));

    let authenticated = Router::new()
        .route("/servers", get(list_servers))
        .route("/election/vote", post(election_vote))
        .route("/election/leader", post(election_leader))
        .route("/inventory/buy_pack", post(inventory_buy_pack))
        .route("/inventory/status", post(inventory_status))
        .route("/matchmaking/request_opponent", post(matchmaking_request_opponent))
        .route("/game/event", post(game_event))
        .route("/game/replicate", post(game_replicate))
        .route("/game/notify_player", post(game_notify_player))
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer_token));

    open.merge(authenticated).with_state(state)
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Rejects any authenticated route whose `Authorization: Bearer ...` token
/// doesn't verify against the cluster's shared secret (spec.md §4.1).
async fn require_bearer_token<B>(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::http::Request<B>,
    next: Next<B>,
) -> Response {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match token {
        Some(token) if verify_bearer_token(&state.shared_secret, token, now_unix()).is_some() => next.run(request).await,
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> Json<RegisterResponse> {
    state.membership.upsert_seen(&req.addr);
    Json(RegisterResponse {
        known_members: state.membership.peer_info_list(),
    })
}

async fn heartbeat(State(state): State<AppState>, Json(req): Json<HeartbeatRequest>) -> Json<HeartbeatResponse> {
    state.membership.upsert_seen(&req.server_id);
    let term = state.elector.handle_heartbeat(req);
    Json(HeartbeatResponse {
        server_id: state.membership.self_addr().to_string(),
        term,
    })
}

async fn list_servers(State(state): State<AppState>) -> Json<ListServersResponse> {
    Json(ListServersResponse {
        servers: state.membership.snapshot(),
    })
}

async fn election_vote(State(state): State<AppState>, Json(req): Json<RequestVoteRequest>) -> Json<RequestVoteResponse> {
    Json(state.elector.handle_vote_request(req))
}

async fn election_leader(State(state): State<AppState>, Json(req): Json<AnnounceLeaderRequest>) -> Json<AnnounceLeaderResponse> {
    state.elector.handle_announce(req);
    Json(AnnounceLeaderResponse {
        term: state.elector.current_term(),
    })
}

/// Leader-only; `InventoryService::allocate_pack` forwards to the Leader
/// itself when this node isn't it, so a client or a Shadow can hit any
/// node's `/inventory/buy_pack` (spec.md §4.4).
async fn inventory_buy_pack(State(state): State<AppState>, Json(req): Json<BuyPackRequest>) -> Response {
    match state.inventory.allocate_pack(&req.client_id).await {
        Ok(cards) => Json(BuyPackResponse { cards }).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

async fn inventory_status(State(state): State<AppState>, Json(_req): Json<InventoryStatusRequest>) -> Response {
    match state.inventory.status_or_forward().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

async fn matchmaking_request_opponent(
    State(state): State<AppState>,
    Json(req): Json<RequestOpponentRequest>,
) -> Json<RequestOpponentResponse> {
    Json(state.matchmaker.handle_request_opponent(req))
}

async fn game_event(State(state): State<AppState>, Json(req): Json<GameEventRequest>) -> Json<GameEventResponse> {
    Json(state.engine.handle_remote_event(req))
}

async fn game_replicate(State(state): State<AppState>, Json(req): Json<ReplicateRequest>) -> Json<ReplicateResponse> {
    Json(state.engine.handle_replicate(req))
}

async fn game_notify_player(State(state): State<AppState>, Json(req): Json<NotifyPlayerRequest>) -> Json<NotifyPlayerResponse> {
    let delivered = state.engine.handle_notify_player(req);
    Json(NotifyPlayerResponse { delivered })
}
