use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use essence_proto::{EssenceKind, OwnerId, Scalar};

use crate::{components::SlotRequirement, resources::StoreConfig};

/// Accrual slots per player. Slot 0 is free; the rest unlock in order of
/// index through [`requirements_for_owner`].
pub const SLOT_COUNT: usize = 5;

/// Gold the next swap will charge after `swap_count` completed swaps:
/// `swap_base_cost`, then `+swap_cost_increment` per swap up to
/// `swap_cost_max`.
pub fn next_swap_cost(swap_count: u32, config: &StoreConfig) -> Scalar {
    let cost =
        config.swap_base_cost + config.swap_cost_increment * Scalar::from_i64(swap_count as i64);
    cost.min(config.swap_cost_max)
}

/// Unlock requirements for slots 1..=4. Rolls are deterministic per owner:
/// the same owner and world seed always produce the same distinct kinds.
pub fn requirements_for_owner(owner: OwnerId, config: &StoreConfig) -> [SlotRequirement; 4] {
    let mut rng = ChaCha8Rng::seed_from_u64(owner.0 ^ config.world_seed);
    std::array::from_fn(|idx| {
        let count = config.slot_requirement_counts[idx] as usize;
        let amount = config.slot_requirement_amounts[idx];
        let mut pool = EssenceKind::VARIANTS.to_vec();
        let mut essence = Vec::with_capacity(count);
        for _ in 0..count.min(pool.len()) {
            let pick = rng.gen_range(0..pool.len());
            essence.push((pool.swap_remove(pick), amount));
        }
        essence.sort_unstable_by_key(|(kind, _)| kind.index());
        SlotRequirement {
            gold_cost: config.slot_gold_costs[idx],
            essence,
        }
    })
}
