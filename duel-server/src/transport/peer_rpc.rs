//! Peer RPC adapter (spec.md §4.1, §6): an HTTP surface (built with `axum`,
//! the framework the retrieval pack's card-game example reaches for) plus a
//! typed `reqwest` client every node uses to call every peer. Every
//! outgoing call carries a signed bearer token (spec.md §4.1, §4.6).

use crate::error::{TransportError, TransportResult};
use duel_core::token::sign_bearer_token;
use duel_core::wire::*;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::instrument;

const REGISTRATION_DEADLINE: Duration = Duration::from_secs(10);
const CONTROL_DEADLINE: Duration = Duration::from_secs(2);
const MATCHMAKING_DEADLINE: Duration = Duration::from_secs(3);
pub const ENGINE_DEADLINE: Duration = Duration::from_secs(5);

/// Typed client to every peer (spec.md §4.1). Idempotent requests
/// (heartbeat, registration, leader announcement) may be retried freely by
/// callers; this client itself performs no retries, leaving retry policy to
/// each component as spec.md §7 requires.
pub struct PeerClient {
    http: reqwest::Client,
    self_id: String,
    shared_secret: String,
}

impl PeerClient {
    pub fn new(self_id: impl Into<String>, shared_secret: impl Into<String>) -> PeerClient {
        PeerClient {
            http: reqwest::Client::new(),
            self_id: self_id.into(),
            shared_secret: shared_secret.into(),
        }
    }

    fn bearer(&self) -> String {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs();
        sign_bearer_token(&self.shared_secret, &self.self_id, now)
    }

    async fn post<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        addr: &str,
        path: &str,
        body: &Req,
        deadline: Duration,
        authenticated: bool,
    ) -> TransportResult<Resp> {
        let url = format!("http://{}{}", addr, path);
        let mut builder = self.http.post(&url).json(body).timeout(deadline);
        if authenticated {
            builder = builder.bearer_auth(self.bearer());
        }
        let response = builder.send().await.map_err(|source| {
            if source.is_timeout() {
                TransportError::Timeout { addr: addr.to_string() }
            } else {
                TransportError::Request {
                    addr: addr.to_string(),
                    source,
                }
            }
        })?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized { addr: addr.to_string() });
        }
        response.json::<Resp>().await.map_err(|source| TransportError::Request {
            addr: addr.to_string(),
            source,
        })
    }

    #[instrument(skip(self, req))]
    pub async fn register(&self, addr: &str, req: &RegisterRequest) -> TransportResult<RegisterResponse> {
        self.post(addr, "/register", req, REGISTRATION_DEADLINE, false).await
    }

    #[instrument(skip(self, req))]
    pub async fn heartbeat(&self, addr: &str, req: &HeartbeatRequest) -> TransportResult<HeartbeatResponse> {
        self.post(addr, "/heartbeat", req, CONTROL_DEADLINE, false).await
    }

    #[instrument(skip(self, req))]
    pub async fn request_vote(&self, addr: &str, req: &RequestVoteRequest) -> TransportResult<RequestVoteResponse> {
        self.post(addr, "/election/vote", req, CONTROL_DEADLINE, true).await
    }

    #[instrument(skip(self, req))]
    pub async fn announce_leader(
        &self,
        addr: &str,
        req: &AnnounceLeaderRequest,
    ) -> TransportResult<AnnounceLeaderResponse> {
        self.post(addr, "/election/leader", req, CONTROL_DEADLINE, true).await
    }

    #[instrument(skip(self, req))]
    pub async fn buy_pack(&self, addr: &str, req: &BuyPackRequest) -> TransportResult<BuyPackResponse> {
        self.post(addr, "/inventory/buy_pack", req, ENGINE_DEADLINE, true).await
    }

    #[instrument(skip(self))]
    pub async fn inventory_status(&self, addr: &str) -> TransportResult<InventoryStatusResponse> {
        self.post(addr, "/inventory/status", &InventoryStatusRequest::default(), ENGINE_DEADLINE, true)
            .await
    }

    #[instrument(skip(self, req))]
    pub async fn request_opponent(
        &self,
        addr: &str,
        req: &RequestOpponentRequest,
    ) -> TransportResult<RequestOpponentResponse> {
        self.post(addr, "/matchmaking/request_opponent", req, MATCHMAKING_DEADLINE, true)
            .await
    }

    #[instrument(skip(self, req))]
    pub async fn submit_event(&self, addr: &str, req: &GameEventRequest) -> TransportResult<GameEventResponse> {
        self.post(addr, "/game/event", req, ENGINE_DEADLINE, true).await
    }

    #[instrument(skip(self, req))]
    pub async fn replicate(&self, addr: &str, req: &ReplicateRequest) -> TransportResult<ReplicateResponse> {
        self.post(addr, "/game/replicate", req, ENGINE_DEADLINE, true).await
    }

    #[instrument(skip(self, req))]
    pub async fn notify_player(&self, addr: &str, req: &NotifyPlayerRequest) -> TransportResult<NotifyPlayerResponse> {
        self.post(addr, "/game/notify_player", req, ENGINE_DEADLINE, true).await
    }
}
