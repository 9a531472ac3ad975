use std::fmt;
use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod catalog;
pub mod scalar;

pub use catalog::{BuffScope, BuffSourceType, EssenceKind};
pub use scalar::{accrue_over_ms, scalar_from_f32, scalar_one, scalar_zero, Scalar, MS_PER_DAY};

/// Identity of a player account as carried on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub tick: u64,
    /// Store clock at capture time; clients anchor extrapolation to this
    /// authority, never to their own wall clock offsets.
    pub server_time_ms: u64,
    pub player_count: u32,
    pub mek_count: u32,
    pub slot_count: u32,
    pub balance_count: u32,
    pub buff_count: u32,
    pub hash: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerState {
    pub entity: u64,
    pub owner: OwnerId,
    pub display_name: String,
    pub gold: Scalar,
    pub active: bool,
    pub last_calculation_ms: u64,
    pub last_checkpoint_ms: u64,
    pub swap_count: u32,
    pub current_swap_cost: Scalar,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MekState {
    pub entity: u64,
    pub owner: OwnerId,
    pub head: EssenceKind,
    pub body: EssenceKind,
    pub item: EssenceKind,
    /// Slot index this mek occupies, if any.
    pub slotted: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotState {
    pub entity: u64,
    pub owner: OwnerId,
    pub slot_index: u8,
    pub unlocked: bool,
    /// Wire id of the occupying mek.
    pub occupant: Option<u64>,
    /// Unlock price; zero once unlocked.
    pub gold_cost: Scalar,
    /// Essence spent on unlock, per kind; empty once unlocked.
    pub essence_requirements: Vec<(EssenceKind, Scalar)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceState {
    pub entity: u64,
    pub owner: OwnerId,
    pub kind: EssenceKind,
    pub amount: Scalar,
    pub last_updated_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuffState {
    pub entity: u64,
    pub owner: OwnerId,
    pub scope: BuffScope,
    pub source_type: BuffSourceType,
    pub name: String,
    pub description: String,
    pub rate_multiplier: Scalar,
    pub cap_bonus: Scalar,
    /// Expiry on the store clock; zero means the buff never expires.
    pub expires_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigState {
    pub base_rate_per_day: Scalar,
    pub base_cap: Scalar,
    pub swap_base_cost: Scalar,
    pub swap_cost_increment: Scalar,
    pub swap_cost_max: Scalar,
    pub slot_gold_costs: [Scalar; 4],
    pub slot_requirement_counts: [u8; 4],
    pub slot_requirement_amounts: [Scalar; 4],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub header: SnapshotHeader,
    pub players: Vec<PlayerState>,
    pub meks: Vec<MekState>,
    pub slots: Vec<SlotState>,
    pub balances: Vec<BalanceState>,
    pub buffs: Vec<BuffState>,
    /// `None` models a broken or missing configuration feed; clients degrade
    /// their display instead of guessing.
    pub config: Option<ConfigState>,
}

impl WorldSnapshot {
    /// Sorts every state vector by wire id, fills the header counts and
    /// stamps the content hash. Broadcast frames are always finalized.
    pub fn finalize(mut self) -> Self {
        self.players.sort_unstable_by_key(|state| state.entity);
        self.meks.sort_unstable_by_key(|state| state.entity);
        self.slots.sort_unstable_by_key(|state| state.entity);
        self.balances.sort_unstable_by_key(|state| state.entity);
        self.buffs.sort_unstable_by_key(|state| state.entity);
        self.header.player_count = self.players.len() as u32;
        self.header.mek_count = self.meks.len() as u32;
        self.header.slot_count = self.slots.len() as u32;
        self.header.balance_count = self.balances.len() as u32;
        self.header.buff_count = self.buffs.len() as u32;
        self.header.hash = hash_snapshot(&self);
        self
    }
}

/// Content hash over the bincode encoding with the hash, tick and clock
/// fields zeroed, so an idle cycle hashes identically to the one before it
/// and the server can suppress the rebroadcast. The ahash seeds are pinned
/// so the value is stable across runs and platforms.
pub fn hash_snapshot(snapshot: &WorldSnapshot) -> u64 {
    let mut clone = snapshot.clone();
    clone.header.hash = 0;
    clone.header.tick = 0;
    clone.header.server_time_ms = 0;
    let encoded = bincode::serialize(&clone).expect("snapshot serialization for hashing");
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    hasher.write(&encoded);
    hasher.finish()
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode snapshot frame: {0}")]
    Decode(#[source] bincode::Error),
}

pub fn encode_snapshot(snapshot: &WorldSnapshot) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(snapshot).map_err(CodecError::Encode)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<WorldSnapshot, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}
