use bevy::prelude::*;
use essence_proto::{BuffScope, BuffSourceType, EssenceKind, OwnerId, Scalar};

/// A player account; owns meks, slots, balances and buffs.
#[derive(Component, Debug, Clone)]
pub struct PlayerAccount {
    pub owner: OwnerId,
    pub display_name: String,
    pub gold: Scalar,
}

/// Per-player accrual bookkeeping, kept next to [`PlayerAccount`].
#[derive(Component, Debug, Clone)]
pub struct EssenceTracking {
    /// True while at least one mek is slotted; the accrual window only runs
    /// while active.
    pub active: bool,
    /// Store clock at the last accrual materialization.
    pub last_calculation_ms: u64,
    /// Store clock at the last checkpoint, scheduled or forced.
    pub last_checkpoint_ms: u64,
    pub swap_count: u32,
    /// Gold charged by the most recent swap; zero before the first.
    pub current_swap_cost: Scalar,
}

impl Default for EssenceTracking {
    fn default() -> Self {
        Self {
            active: false,
            last_calculation_ms: 0,
            last_checkpoint_ms: 0,
            swap_count: 0,
            current_swap_cost: Scalar::zero(),
        }
    }
}

/// A forged mek. While slotted, its head, body and item variations each
/// contribute one accrual hit to their essence kind.
#[derive(Component, Debug, Clone)]
pub struct MekUnit {
    pub owner: OwnerId,
    pub head: EssenceKind,
    pub body: EssenceKind,
    pub item: EssenceKind,
    /// Index of the slot this mek occupies, if any.
    pub slotted: Option<u8>,
}

/// One of a player's accrual slots. Slot 0 starts unlocked; the rest are
/// locked behind a [`SlotRequirement`].
#[derive(Component, Debug, Clone)]
pub struct EssenceSlot {
    pub owner: OwnerId,
    pub index: u8,
    pub unlocked: bool,
    pub occupant: Option<Entity>,
    /// Unlock price; `None` once unlocked.
    pub requirement: Option<SlotRequirement>,
}

/// Price of unlocking a locked slot: gold plus a set of distinct essence
/// kinds, each at a required amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRequirement {
    pub gold_cost: Scalar,
    pub essence: Vec<(EssenceKind, Scalar)>,
}

/// Stored essence for one `(owner, kind)` pair. Materialized lazily on the
/// first accrual or grant that touches the kind.
#[derive(Component, Debug, Clone)]
pub struct EssenceBalance {
    pub owner: OwnerId,
    pub kind: EssenceKind,
    pub amount: Scalar,
    pub last_updated_ms: u64,
}

/// An accrual modifier granted to a player.
#[derive(Component, Debug, Clone)]
pub struct ActiveBuff {
    pub owner: OwnerId,
    pub scope: BuffScope,
    pub source_type: BuffSourceType,
    pub name: String,
    pub description: String,
    pub rate_multiplier: Scalar,
    pub cap_bonus: Scalar,
    /// Expiry on the store clock; `None` never expires.
    pub expires_at_ms: Option<u64>,
}
