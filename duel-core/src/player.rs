use crate::card::Card;
use serde::{Deserialize, Serialize};

/// Server-local view of a connected human (spec.md §3 Player). Mutations are
/// allowed only by the player's home server, except hand contents during an
/// active match, which are mutated only by that match's Host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub hand: Vec<Card>,
    pub match_id: Option<String>,
}

impl Player {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Player {
        Player {
            id: id.into(),
            name: name.into(),
            hand: Vec::new(),
            match_id: None,
        }
    }

    pub fn has_card(&self, card_id: &str) -> bool {
        self.hand.iter().any(|c| c.id == card_id)
    }

    /// Removes and returns the named card from the hand, if present.
    pub fn take_card(&mut self, card_id: &str) -> Option<Card> {
        let idx = self.hand.iter().position(|c| c.id == card_id)?;
        Some(self.hand.remove(idx))
    }
}
