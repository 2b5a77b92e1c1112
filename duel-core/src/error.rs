use thiserror::Error;

/// Errors raised by the pure domain model in `duel-core`.
///
/// Component-specific errors (election, membership, transport, ...) live in
/// `duel-server` and wrap these where a domain operation is the root cause.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("card {0} not found in hand")]
    CardNotInHand(String),

    #[error("player {0} is not the turn owner")]
    NotTurnOwner(String),

    #[error("player {0} already has a card on the table this trick")]
    AlreadyPlayed(String),

    #[error("match is not in the Playing phase")]
    NotPlaying,

    #[error("inventory exhausted for rarity {0:?}")]
    InventoryExhausted(crate::card::Rarity),

    #[error("malformed command payload: {0}")]
    MalformedPayload(String),

    #[error("unknown player {0}")]
    UnknownPlayer(String),

    #[error("signature verification failed")]
    BadSignature,
}

pub type Result<T> = std::result::Result<T, CoreError>;
