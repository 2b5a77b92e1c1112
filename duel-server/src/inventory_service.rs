use crate::elector::Elector;
use crate::error::{InventoryError, InventoryResult};
use crate::transport::peer_rpc::PeerClient;
use duel_core::card::{Rarity, CANONICAL_NAMES};
use duel_core::wire::{BuyPackRequest, InventoryStatusResponse};
use duel_core::{Card, Inventory, Suit};
use rand::Rng;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

/// Rarity-partitioned card pool; single-writer allocator on the Leader
/// (spec.md §2 component #4, §4.4).
pub struct InventoryService {
    self_addr: String,
    elector: Arc<Elector>,
    peer_client: Arc<PeerClient>,
    pool: Mutex<Inventory>,
}

impl InventoryService {
    /// Every node bootstraps an identical pool (spec.md §4.4); only the
    /// Leader's copy is ever authoritative.
    pub fn new(self_addr: impl Into<String>, elector: Arc<Elector>, peer_client: Arc<PeerClient>) -> InventoryService {
        let mut rng = rand::thread_rng();
        InventoryService {
            self_addr: self_addr.into(),
            elector,
            peer_client,
            pool: Mutex::new(Inventory::bootstrap(&mut rng)),
        }
    }

    /// `allocatePack(clientId) -> 5 Cards` (spec.md §4.4). Only the Leader
    /// executes; a Follower forwards to the current Leader with "at most
    /// one retry on network error, then surface failure" (spec.md §4.4,
    /// §7, and the SPEC_FULL open-question resolution for the Shadow/
    /// Follower-to-Leader retry policy).
    #[instrument(skip(self))]
    pub async fn allocate_pack(&self, client_id: &str) -> InventoryResult<Vec<Card>> {
        if self.elector.is_leader() {
            return self.allocate_local();
        }
        let leader = self.elector.current_leader().ok_or(InventoryError::NoLeaderKnown)?;
        let request = BuyPackRequest {
            client_id: client_id.to_string(),
        };
        match self.peer_client.buy_pack(&leader, &request).await {
            Ok(response) => Ok(response.cards),
            Err(first_err) => {
                warn!(error = %first_err, "buy_pack forward to leader failed, retrying once");
                self.peer_client
                    .buy_pack(&leader, &request)
                    .await
                    .map(|r| r.cards)
                    .map_err(InventoryError::ForwardFailed)
            }
        }
    }

    /// Atomic allocation under the single inventory mutex (spec.md §4.4:
    /// "atomic under a single mutex guarding the pool; concurrent calls
    /// serialize"). Not `async` on purpose: the critical section is pure
    /// CPU work and must never straddle a suspension point.
    fn allocate_local(&self) -> InventoryResult<Vec<Card>> {
        let mut pool = self.pool.lock().expect("inventory lock poisoned");
        let mut rng = rand::thread_rng();
        let mut drawn = Vec::with_capacity(5);
        for _ in 0..5 {
            let mut rarity = sample_rarity(&mut rng);
            let mut card = pool.take(rarity);
            while card.is_none() {
                match rarity.downgrade() {
                    Some(next) => {
                        rarity = next;
                        card = pool.take(rarity);
                    }
                    None => break,
                }
            }
            let card = match card {
                Some(c) => c,
                None => mint_synthetic_common(&mut rng),
            };
            drawn.push(card);
        }
        info!(count = drawn.len(), "allocated pack");
        Ok(drawn)
    }

    /// `/inventory/status` forwards to the Leader exactly like
    /// `allocate_pack`, since a Follower's bootstrap copy of the pool is
    /// never authoritative (spec.md §4.4).
    pub async fn status_or_forward(&self) -> InventoryResult<InventoryStatusResponse> {
        if self.elector.is_leader() {
            return Ok(self.status());
        }
        let leader = self.elector.current_leader().ok_or(InventoryError::NoLeaderKnown)?;
        self.peer_client
            .inventory_status(&leader)
            .await
            .map_err(InventoryError::ForwardFailed)
    }

    fn status(&self) -> InventoryStatusResponse {
        let pool = self.pool.lock().expect("inventory lock poisoned");
        InventoryStatusResponse {
            common: pool.len(Rarity::Common),
            uncommon: pool.len(Rarity::Uncommon),
            rare: pool.len(Rarity::Rare),
            legendary: pool.len(Rarity::Legendary),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.elector.is_leader()
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }
}

/// Samples a rarity from the fixed distribution `{C:0.70, U:0.20, R:0.09,
/// L:0.01}` (spec.md §4.4).
fn sample_rarity(rng: &mut impl Rng) -> Rarity {
    let x: f64 = rng.gen();
    if x < 0.70 {
        Rarity::Common
    } else if x < 0.90 {
        Rarity::Uncommon
    } else if x < 0.99 {
        Rarity::Rare
    } else {
        Rarity::Legendary
    }
}

/// Mints a synthetic Common with a fresh identifier when every rarity is
/// simultaneously exhausted, so a purchase never blocks (spec.md §4.4,
/// §7 — the policy SPEC_FULL.md picks over failing with
/// `InventoryExhausted`).
fn mint_synthetic_common(rng: &mut impl Rng) -> Card {
    let (lo, hi) = Rarity::Common.power_range();
    Card {
        id: uuid::Uuid::new_v4().to_string(),
        name: CANONICAL_NAMES[rng.gen_range(0..CANONICAL_NAMES.len())].to_string(),
        suit: Suit::ALL[rng.gen_range(0..4)],
        power: rng.gen_range(lo..=hi),
        rarity: Rarity::Common,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rarity_distribution_within_tolerance_over_10000_draws() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        use rand::SeedableRng;
        let mut counts = [0u32; 4];
        for _ in 0..10_000 {
            let r = sample_rarity(&mut rng);
            counts[match r {
                Rarity::Common => 0,
                Rarity::Uncommon => 1,
                Rarity::Rare => 2,
                Rarity::Legendary => 3,
            }] += 1;
        }
        let expected = [0.70, 0.20, 0.09, 0.01];
        for (count, exp) in counts.iter().zip(expected.iter()) {
            let observed = *count as f64 / 10_000.0;
            assert!((observed - exp).abs() <= 0.05, "observed {} expected {}", observed, exp);
        }
    }
}
