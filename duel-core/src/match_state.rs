use crate::card::{resolve_trick, Card, TrickOutcome};
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    AwaitingPurchase,
    Playing,
    Finished,
}

/// One seat in a match. On the Host this is the authoritative hand; on the
/// Shadow it is a replica populated wholesale by `/game/replicate`
/// (spec.md §4.6) — there is no per-field merge, only whole-snapshot
/// replacement, which is what makes the Shadow's event log trivially a
/// prefix of the Host's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seat {
    pub player_id: String,
    pub player_name: String,
    pub hand: Vec<Card>,
    pub ready: bool,
    pub round_points: u32,
    pub match_points: u32,
}

impl Seat {
    pub fn new(player_id: impl Into<String>, player_name: impl Into<String>) -> Seat {
        Seat {
            player_id: player_id.into(),
            player_name: player_name.into(),
            hand: Vec::new(),
            ready: false,
            round_points: 0,
            match_points: 0,
        }
    }

    pub fn has_card(&self, card_id: &str) -> bool {
        self.hand.iter().any(|c| c.id == card_id)
    }

    pub fn take_card(&mut self, card_id: &str) -> Option<Card> {
        let idx = self.hand.iter().position(|c| c.id == card_id)?;
        Some(self.hand.remove(idx))
    }
}

/// Outcome of a finished match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    Winner(String),
    Draw,
}

/// Result of a `PlayCard` application that completed a trick.
#[derive(Debug, Clone)]
pub struct TrickResult {
    pub winner: Option<String>,
    pub round: u32,
    pub new_turn_owner: Option<String>,
    pub finished: Option<MatchOutcome>,
}

/// Event type tags. The canonical five from spec.md §3 (`PlayerReady`,
/// `CardPlayed`, `TrickResolved`, `ChatSent`, `MatchFinished`) plus `Traded`,
/// needed because `Trade` (spec.md §4.6) is a fifth command whose effect
/// must be logged and replicated exactly like the others — see DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventKind {
    PlayerReady { hand: Vec<Card> },
    CardPlayed { card_id: String },
    TrickResolved { winner: Option<String>, round: u32 },
    ChatSent { text: String },
    MatchFinished { outcome: MatchOutcome },
    Traded {
        offered_card_id: String,
        desired_card_id: String,
        counterparty_id: String,
    },
}

impl EventKind {
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::PlayerReady { .. } => "PlayerReady",
            EventKind::CardPlayed { .. } => "CardPlayed",
            EventKind::TrickResolved { .. } => "TrickResolved",
            EventKind::ChatSent { .. } => "ChatSent",
            EventKind::MatchFinished { .. } => "MatchFinished",
            EventKind::Traded { .. } => "Traded",
        }
    }
}

/// A sequenced, signed record of one mutation to a match's state
/// (spec.md §3 Event). The signature covers the first five fields with a
/// shared secret; see `duel_core::token::sign_event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub match_id: String,
    pub timestamp: u64,
    pub kind: EventKind,
    pub player_id: String,
    pub signature: String,
}

/// A two-player card duel (spec.md §3 Match).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub seats: [Seat; 2],
    pub host: String,
    pub shadow: Option<String>,
    pub phase: Phase,
    pub round: u32,
    pub table: HashMap<String, Card>,
    pub turn_owner: Option<String>,
    pub last_trick_winner: Option<String>,
    pub event_seq: u64,
    pub event_log: Vec<Event>,
    pub created_at_unix: u64,
}

impl Match {
    pub fn new(
        id: impl Into<String>,
        seat_a: Seat,
        seat_b: Seat,
        host: impl Into<String>,
        shadow: Option<String>,
        created_at_unix: u64,
    ) -> Match {
        Match {
            id: id.into(),
            seats: [seat_a, seat_b],
            host: host.into(),
            shadow,
            phase: Phase::AwaitingPurchase,
            round: 0,
            table: HashMap::new(),
            turn_owner: None,
            last_trick_winner: None,
            event_seq: 0,
            event_log: Vec::new(),
            created_at_unix,
        }
    }

    pub fn seat(&self, player_id: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.player_id == player_id)
    }

    pub fn seat_mut(&mut self, player_id: &str) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|s| s.player_id == player_id)
    }

    pub fn opponent_of(&self, player_id: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.player_id != player_id)
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.seats.iter().any(|s| s.player_id == player_id)
    }

    pub fn all_ready(&self) -> bool {
        self.seats.iter().all(|s| s.ready)
    }

    /// `AwaitingPurchase -> Playing` transition (spec.md §4.6). `turn_owner`
    /// is chosen uniformly at random by the caller (the Host) and passed in
    /// so this stays a pure state transition.
    pub fn start_playing(&mut self, turn_owner: String) {
        self.phase = Phase::Playing;
        self.round = 1;
        self.turn_owner = Some(turn_owner);
    }

    /// Applies an accepted `PlayCard` (spec.md §4.6). Returns `Ok(Some(_))`
    /// when this play completed the trick and it was resolved; `Ok(None)`
    /// when the trick is still waiting on the opponent's play.
    pub fn play_card(&mut self, player_id: &str, card_id: &str) -> Result<Option<TrickResult>> {
        if self.phase != Phase::Playing {
            return Err(CoreError::NotPlaying);
        }
        if self.turn_owner.as_deref() != Some(player_id) {
            return Err(CoreError::NotTurnOwner(player_id.to_string()));
        }
        if self.table.contains_key(player_id) {
            return Err(CoreError::AlreadyPlayed(player_id.to_string()));
        }
        let seat = self
            .seats
            .iter_mut()
            .find(|s| s.player_id == player_id)
            .ok_or_else(|| CoreError::UnknownPlayer(player_id.to_string()))?;
        let card = seat
            .take_card(card_id)
            .ok_or_else(|| CoreError::CardNotInHand(card_id.to_string()))?;
        self.table.insert(player_id.to_string(), card);

        // Turn passes to the opponent until both have played this trick.
        if let Some(opponent) = self.opponent_of(player_id) {
            if !self.table.contains_key(&opponent.player_id) {
                self.turn_owner = Some(opponent.player_id.clone());
                return Ok(None);
            }
        }
        Ok(Some(self.resolve_current_trick()))
    }

    fn resolve_current_trick(&mut self) -> TrickResult {
        let ids: Vec<String> = self.seats.iter().map(|s| s.player_id.clone()).collect();
        let c1 = self.table.get(&ids[0]).cloned().expect("both played");
        let c2 = self.table.get(&ids[1]).cloned().expect("both played");
        let outcome = resolve_trick(&c1, &c2);
        let winner = match outcome {
            TrickOutcome::FirstWins => Some(ids[0].clone()),
            TrickOutcome::SecondWins => Some(ids[1].clone()),
            TrickOutcome::Draw => None,
        };
        if let Some(ref w) = winner {
            if let Some(seat) = self.seat_mut(w) {
                seat.round_points += 1;
                seat.match_points += 1;
            }
        }
        self.table.clear();
        self.last_trick_winner = winner.clone();
        if let Some(ref w) = winner {
            self.turn_owner = Some(w.clone());
        }
        // turn_owner stays unchanged on a draw, per spec.md §4.6 step 4.

        let finished = self.seats.iter().any(|s| s.hand.is_empty());
        let outcome = if finished {
            self.phase = Phase::Finished;
            Some(self.decide_outcome())
        } else {
            None
        };

        TrickResult {
            winner,
            round: self.round,
            new_turn_owner: self.turn_owner.clone(),
            finished: outcome,
        }
    }

    fn decide_outcome(&self) -> MatchOutcome {
        let [a, b] = &self.seats;
        match a.round_points.cmp(&b.round_points) {
            std::cmp::Ordering::Greater => MatchOutcome::Winner(a.player_id.clone()),
            std::cmp::Ordering::Less => MatchOutcome::Winner(b.player_id.clone()),
            std::cmp::Ordering::Equal => MatchOutcome::Draw,
        }
    }

    /// Applies a `Trade` command (spec.md §4.6): the two named cards swap
    /// hands atomically. Both card ids must belong to the respective
    /// players named.
    pub fn trade(
        &mut self,
        offering_id: &str,
        offered_card_id: &str,
        receiving_id: &str,
        desired_card_id: &str,
    ) -> Result<()> {
        if !self.has_player(offering_id) || !self.has_player(receiving_id) {
            return Err(CoreError::UnknownPlayer(offering_id.to_string()));
        }
        let offered = self
            .seat_mut(offering_id)
            .and_then(|s| s.take_card(offered_card_id))
            .ok_or_else(|| CoreError::CardNotInHand(offered_card_id.to_string()))?;
        let desired = match self
            .seat_mut(receiving_id)
            .and_then(|s| s.take_card(desired_card_id))
        {
            Some(c) => c,
            None => {
                // Roll back: give the offered card back before failing.
                if let Some(s) = self.seat_mut(offering_id) {
                    s.hand.push(offered);
                }
                return Err(CoreError::CardNotInHand(desired_card_id.to_string()));
            }
        };
        if let Some(s) = self.seat_mut(offering_id) {
            s.hand.push(desired);
        }
        if let Some(s) = self.seat_mut(receiving_id) {
            s.hand.push(offered);
        }
        Ok(())
    }

    /// Appends an event and advances `event_seq`. Called only by the Host;
    /// the Shadow never appends, it only accepts whole snapshots.
    pub fn append_event(&mut self, kind: EventKind, player_id: String, timestamp: u64, signature: String) -> u64 {
        self.event_seq += 1;
        let seq = self.event_seq;
        self.event_log.push(Event {
            seq,
            match_id: self.id.clone(),
            timestamp,
            kind,
            player_id,
            signature,
        });
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{Rarity, Suit};

    fn card(id: &str, power: u32, suit: Suit) -> Card {
        Card {
            id: id.to_string(),
            name: "T".into(),
            suit,
            power,
            rarity: Rarity::Common,
        }
    }

    fn sample_match() -> Match {
        let mut a = Seat::new("a", "Alice");
        a.hand.push(card("c1", 10, Suit::Hearts));
        let mut b = Seat::new("b", "Bob");
        b.hand.push(card("c2", 10, Suit::Diamonds));
        let mut m = Match::new("m1", a, b, "s1", None, 0);
        m.start_playing("a".to_string());
        m
    }

    #[test]
    fn turn_monotonicity_rejects_out_of_turn_play() {
        let mut m = sample_match();
        let err = m.play_card("b", "c2").unwrap_err();
        assert_eq!(err, CoreError::NotTurnOwner("b".to_string()));
    }

    #[test]
    fn trick_resolves_once_both_play_and_empties_hands_to_finish() {
        let mut m = sample_match();
        assert!(m.play_card("a", "c1").unwrap().is_none());
        let result = m.play_card("b", "c2").unwrap().unwrap();
        assert_eq!(result.winner.as_deref(), Some("a"));
        assert_eq!(m.phase, Phase::Finished);
        assert_eq!(result.finished, Some(MatchOutcome::Winner("a".to_string())));
    }

    #[test]
    fn double_play_same_trick_rejected() {
        let mut a = Seat::new("a", "Alice");
        a.hand.push(card("c1", 10, Suit::Hearts));
        a.hand.push(card("c3", 5, Suit::Clubs));
        let mut b = Seat::new("b", "Bob");
        b.hand.push(card("c2", 1, Suit::Diamonds));
        let mut m = Match::new("m1", a, b, "s1", None, 0);
        m.start_playing("a".to_string());
        m.play_card("a", "c1").unwrap();
        // turn passed to b, a tries to play again before b responds
        let err = m.play_card("a", "c3").unwrap_err();
        assert_eq!(err, CoreError::NotTurnOwner("a".to_string()));
    }

    #[test]
    fn trade_swaps_cards_atomically() {
        let mut a = Seat::new("a", "Alice");
        a.hand.push(card("c1", 10, Suit::Hearts));
        let mut b = Seat::new("b", "Bob");
        b.hand.push(card("c2", 20, Suit::Clubs));
        let mut m = Match::new("m1", a, b, "s1", None, 0);
        m.trade("a", "c1", "b", "c2").unwrap();
        assert!(m.seat("a").unwrap().has_card("c2"));
        assert!(m.seat("b").unwrap().has_card("c1"));
    }

    #[test]
    fn trade_rolls_back_when_desired_card_missing() {
        let mut a = Seat::new("a", "Alice");
        a.hand.push(card("c1", 10, Suit::Hearts));
        let b = Seat::new("b", "Bob");
        let mut m = Match::new("m1", a, b, "s1", None, 0);
        let err = m.trade("a", "c1", "b", "nonexistent").unwrap_err();
        assert_eq!(err, CoreError::CardNotInHand("nonexistent".to_string()));
        assert!(m.seat("a").unwrap().has_card("c1"));
    }
}
