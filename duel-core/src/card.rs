use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One of the four suits, ordered for tie-break per spec.md §4.6: `♠` beats
/// `♥` beats `♦` beats `♣`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suit {
    Clubs,
    Diamonds,
    Hearts,
    Spades,
}

impl Suit {
    /// Fixed suit rank used for trick tie-break: `♠`:4, `♥`:3, `♦`:2, `♣`:1.
    pub fn rank(self) -> u8 {
        match self {
            Suit::Spades => 4,
            Suit::Hearts => 3,
            Suit::Diamonds => 2,
            Suit::Clubs => 1,
        }
    }

    pub const ALL: [Suit; 4] = [Suit::Clubs, Suit::Diamonds, Suit::Hearts, Suit::Spades];
}

impl Ord for Suit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Suit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Legendary,
}

impl Rarity {
    pub const ALL: [Rarity; 4] = [Rarity::Common, Rarity::Uncommon, Rarity::Rare, Rarity::Legendary];

    /// Sample distribution for `allocatePack` (spec.md §4.4).
    pub fn draw_weight(self) -> f64 {
        match self {
            Rarity::Common => 0.70,
            Rarity::Uncommon => 0.20,
            Rarity::Rare => 0.09,
            Rarity::Legendary => 0.01,
        }
    }

    /// Power range bootstrapped for this rarity (spec.md §4.4).
    pub fn power_range(self) -> (u32, u32) {
        match self {
            Rarity::Common => (1, 50),
            Rarity::Uncommon => (51, 80),
            Rarity::Rare => (81, 100),
            Rarity::Legendary => (101, 120),
        }
    }

    pub fn initial_count(self) -> usize {
        match self {
            Rarity::Common => 100,
            Rarity::Uncommon => 50,
            Rarity::Rare => 20,
            Rarity::Legendary => 5,
        }
    }

    /// Next rarity to try when this one is exhausted: L -> R -> U -> C.
    pub fn downgrade(self) -> Option<Rarity> {
        match self {
            Rarity::Legendary => Some(Rarity::Rare),
            Rarity::Rare => Some(Rarity::Uncommon),
            Rarity::Uncommon => Some(Rarity::Common),
            Rarity::Common => None,
        }
    }
}

/// A single, immutable card. Identifiers are unique across the whole
/// cluster for the lifetime of the system (spec.md §3 Inventory invariant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub name: String,
    pub suit: Suit,
    pub power: u32,
    pub rarity: Rarity,
}

/// The 16 canonical card names used to bootstrap every node's pool
/// identically (spec.md §4.4).
pub const CANONICAL_NAMES: [&str; 16] = [
    "Ember Wolf",
    "Glacial Drake",
    "Stormcaller",
    "Iron Sentinel",
    "Shadow Adept",
    "Sunforged Knight",
    "Tidebound Serpent",
    "Verdant Treant",
    "Ashen Revenant",
    "Gale Falcon",
    "Obsidian Golem",
    "Starlit Seer",
    "Thorned Widow",
    "Molten Colossus",
    "Frost Warden",
    "Void Harbinger",
];

/// Outcome of comparing two cards played into the same trick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrickOutcome {
    FirstWins,
    SecondWins,
    Draw,
}

/// Pure trick-resolution function (spec.md §4.6, testable property #5):
/// a function of `(power, suit)` only, and `resolve(c1, c2) == -resolve(c2, c1)`.
pub fn resolve_trick(c1: &Card, c2: &Card) -> TrickOutcome {
    match c1.power.cmp(&c2.power) {
        Ordering::Greater => TrickOutcome::FirstWins,
        Ordering::Less => TrickOutcome::SecondWins,
        Ordering::Equal => match c1.suit.cmp(&c2.suit) {
            Ordering::Greater => TrickOutcome::FirstWins,
            Ordering::Less => TrickOutcome::SecondWins,
            Ordering::Equal => TrickOutcome::Draw,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(power: u32, suit: Suit) -> Card {
        Card {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Test".into(),
            suit,
            power,
            rarity: Rarity::Common,
        }
    }

    #[test]
    fn suit_tie_break_hearts_over_diamonds() {
        let a = card(50, Suit::Hearts);
        let b = card(50, Suit::Diamonds);
        assert_eq!(resolve_trick(&a, &b), TrickOutcome::FirstWins);
        assert_eq!(resolve_trick(&b, &a), TrickOutcome::SecondWins);
    }

    #[test]
    fn equal_power_and_suit_is_a_draw() {
        let a = card(10, Suit::Clubs);
        let mut b = a.clone();
        b.id = uuid::Uuid::new_v4().to_string();
        assert_eq!(resolve_trick(&a, &b), TrickOutcome::Draw);
    }

    #[test]
    fn power_dominates_suit() {
        let a = card(20, Suit::Clubs);
        let b = card(19, Suit::Spades);
        assert_eq!(resolve_trick(&a, &b), TrickOutcome::FirstWins);
    }

    #[test]
    fn resolve_is_antisymmetric_across_random_pairs() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let p1 = rng.gen_range(1..=120);
            let p2 = rng.gen_range(1..=120);
            let s1 = Suit::ALL[rng.gen_range(0..4)];
            let s2 = Suit::ALL[rng.gen_range(0..4)];
            let a = card(p1, s1);
            let b = card(p2, s2);
            let fwd = resolve_trick(&a, &b);
            let bwd = resolve_trick(&b, &a);
            match fwd {
                TrickOutcome::FirstWins => assert_eq!(bwd, TrickOutcome::SecondWins),
                TrickOutcome::SecondWins => assert_eq!(bwd, TrickOutcome::FirstWins),
                TrickOutcome::Draw => assert_eq!(bwd, TrickOutcome::Draw),
            }
        }
    }
}
