use thiserror::Error;

/// Errors raised by the membership and peer-transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer request to {addr} failed: {source}")]
    Request {
        addr: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer request to {addr} timed out")]
    Timeout { addr: String },

    #[error("peer {addr} rejected our bearer token")]
    Unauthorized { addr: String },

    #[error("no known peer responded")]
    NoPeerAvailable,
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors raised while allocating from the shared inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("this node is not the Leader; forward to {leader}")]
    NotLeader { leader: Option<String> },

    #[error("no Leader is currently known")]
    NoLeaderKnown,

    #[error("forwarding to the Leader failed: {0}")]
    ForwardFailed(#[from] TransportError),

    #[error("inventory exhausted")]
    Exhausted,
}

pub type InventoryResult<T> = std::result::Result<T, InventoryError>;

/// Errors surfaced by the Match Engine while applying a client command.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error(transparent)]
    Core(#[from] duel_core::CoreError),

    #[error("no such match {0}")]
    NoSuchMatch(String),

    #[error("stale event: proposed {proposed} <= current {current}")]
    StaleEvent { proposed: u64, current: u64 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

pub type MatchResult<T> = std::result::Result<T, MatchError>;
