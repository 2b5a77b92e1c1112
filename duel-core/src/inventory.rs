use crate::card::{Card, Rarity, Suit, CANONICAL_NAMES};
use rand::Rng;
use std::collections::VecDeque;

/// Rarity-partitioned card pool (spec.md §3 Inventory). Every node bootstraps
/// an identical pool; only the elected Leader's copy is authoritative — see
/// `duel-server::inventory_service` for the single-writer enforcement.
#[derive(Debug, Clone)]
pub struct Inventory {
    pools: [VecDeque<Card>; 4],
}

fn rarity_index(r: Rarity) -> usize {
    match r {
        Rarity::Common => 0,
        Rarity::Uncommon => 1,
        Rarity::Rare => 2,
        Rarity::Legendary => 3,
    }
}

impl Inventory {
    /// Builds the canonical bootstrap pool described in spec.md §4.4: for
    /// each of 16 canonical names, 100 Common / 50 Uncommon / 20 Rare / 5
    /// Legendary, suits drawn uniformly, powers drawn uniformly within the
    /// rarity's range.
    pub fn bootstrap(rng: &mut impl Rng) -> Inventory {
        let mut pools: [VecDeque<Card>; 4] = [
            VecDeque::new(),
            VecDeque::new(),
            VecDeque::new(),
            VecDeque::new(),
        ];
        for rarity in Rarity::ALL {
            let (lo, hi) = rarity.power_range();
            let mut deque = VecDeque::with_capacity(rarity.initial_count());
            for _ in 0..rarity.initial_count() {
                let name = CANONICAL_NAMES[rng.gen_range(0..CANONICAL_NAMES.len())];
                let suit = Suit::ALL[rng.gen_range(0..4)];
                let power = rng.gen_range(lo..=hi);
                deque.push_back(Card {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: name.to_string(),
                    suit,
                    power,
                    rarity,
                });
            }
            pools[rarity_index(rarity)] = deque;
        }
        Inventory { pools }
    }

    pub fn len(&self, rarity: Rarity) -> usize {
        self.pools[rarity_index(rarity)].len()
    }

    pub fn total_len(&self) -> usize {
        Rarity::ALL.iter().map(|r| self.len(*r)).sum()
    }

    /// Removes and returns one card of the given rarity, if any remain.
    pub fn take(&mut self, rarity: Rarity) -> Option<Card> {
        self.pools[rarity_index(rarity)].pop_front()
    }

    /// Returns a card to the pool (used by trade/retire bookkeeping in tests
    /// and by any future reclamation path; not exercised by the allocator).
    pub fn put_back(&mut self, card: Card) {
        let idx = rarity_index(card.rarity);
        self.pools[idx].push_back(card);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn bootstrap_matches_counts() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let inv = Inventory::bootstrap(&mut rng);
        assert_eq!(inv.len(Rarity::Common), 100);
        assert_eq!(inv.len(Rarity::Uncommon), 50);
        assert_eq!(inv.len(Rarity::Rare), 20);
        assert_eq!(inv.len(Rarity::Legendary), 5);
        assert_eq!(inv.total_len(), 175);
    }

    #[test]
    fn take_removes_one_card() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut inv = Inventory::bootstrap(&mut rng);
        let before = inv.len(Rarity::Common);
        let card = inv.take(Rarity::Common).unwrap();
        assert_eq!(card.rarity, Rarity::Common);
        assert_eq!(inv.len(Rarity::Common), before - 1);
    }
}
