pub mod card;
pub mod error;
pub mod inventory;
pub mod match_state;
pub mod player;
pub mod token;
pub mod wire;

pub use card::{Card, Rarity, Suit};
pub use error::{CoreError, Result};
pub use inventory::Inventory;
pub use match_state::{Event, EventKind, Match, MatchOutcome, Phase, Seat, TrickResult};
pub use player::Player;
