use std::collections::HashMap;

use bevy::prelude::*;
use essence_proto::{
    encode_snapshot, BalanceState, BuffState, MekState, PlayerState, Scalar, SlotState,
    SnapshotHeader, WorldSnapshot,
};

use crate::{
    components::{ActiveBuff, EssenceBalance, EssenceSlot, EssenceTracking, MekUnit, PlayerAccount},
    resources::{StoreConfig, StoreTick, WorldClock},
};

/// Per-cycle record of how the latest snapshot differs from the previous
/// one. `hash_changed` is what gates the broadcast; the counts feed logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeSummary {
    pub tick: u64,
    pub hash_changed: bool,
    pub players_changed: usize,
    pub players_removed: usize,
    pub meks_changed: usize,
    pub meks_removed: usize,
    pub slots_changed: usize,
    pub slots_removed: usize,
    pub balances_changed: usize,
    pub balances_removed: usize,
    pub buffs_changed: usize,
    pub buffs_removed: usize,
    pub config_changed: bool,
}

#[derive(Resource, Default)]
pub struct SnapshotHistory {
    pub last_snapshot: Option<WorldSnapshot>,
    pub encoded_snapshot: Option<Vec<u8>>,
    pub last_change: Option<ChangeSummary>,
    last_hash: Option<u64>,
    players: HashMap<u64, PlayerState>,
    meks: HashMap<u64, MekState>,
    slots: HashMap<u64, SlotState>,
    balances: HashMap<u64, BalanceState>,
    buffs: HashMap<u64, BuffState>,
}

pub fn capture_snapshot(
    tick: Res<StoreTick>,
    clock: Res<WorldClock>,
    config: Res<StoreConfig>,
    players: Query<(Entity, &PlayerAccount, &EssenceTracking)>,
    meks: Query<(Entity, &MekUnit)>,
    slots: Query<(Entity, &EssenceSlot)>,
    balances: Query<(Entity, &EssenceBalance)>,
    buffs: Query<(Entity, &ActiveBuff)>,
    mut history: ResMut<SnapshotHistory>,
) {
    let player_states: Vec<PlayerState> = players
        .iter()
        .map(|(entity, account, tracking)| player_state(entity, account, tracking))
        .collect();
    let mek_states: Vec<MekState> = meks
        .iter()
        .map(|(entity, unit)| mek_state(entity, unit))
        .collect();
    let slot_states: Vec<SlotState> = slots
        .iter()
        .map(|(entity, slot)| slot_state(entity, slot))
        .collect();
    let balance_states: Vec<BalanceState> = balances
        .iter()
        .map(|(entity, balance)| balance_state(entity, balance))
        .collect();
    let buff_states: Vec<BuffState> = buffs
        .iter()
        .map(|(entity, buff)| buff_state(entity, buff))
        .collect();

    let snapshot = WorldSnapshot {
        header: SnapshotHeader {
            tick: tick.0,
            server_time_ms: clock.now_ms,
            ..SnapshotHeader::default()
        },
        players: player_states,
        meks: mek_states,
        slots: slot_states,
        balances: balance_states,
        buffs: buff_states,
        config: Some(config.wire_state()),
    }
    .finalize();

    history.update(snapshot);
}

impl SnapshotHistory {
    fn update(&mut self, snapshot: WorldSnapshot) -> ChangeSummary {
        let mut players_index = HashMap::with_capacity(snapshot.players.len());
        for state in &snapshot.players {
            players_index.insert(state.entity, state.clone());
        }
        let mut meks_index = HashMap::with_capacity(snapshot.meks.len());
        for state in &snapshot.meks {
            meks_index.insert(state.entity, state.clone());
        }
        let mut slots_index = HashMap::with_capacity(snapshot.slots.len());
        for state in &snapshot.slots {
            slots_index.insert(state.entity, state.clone());
        }
        let mut balances_index = HashMap::with_capacity(snapshot.balances.len());
        for state in &snapshot.balances {
            balances_index.insert(state.entity, state.clone());
        }
        let mut buffs_index = HashMap::with_capacity(snapshot.buffs.len());
        for state in &snapshot.buffs {
            buffs_index.insert(state.entity, state.clone());
        }

        let summary = ChangeSummary {
            tick: snapshot.header.tick,
            hash_changed: self.last_hash != Some(snapshot.header.hash),
            players_changed: diff_changed(&self.players, &players_index),
            players_removed: diff_removed(&self.players, &players_index),
            meks_changed: diff_changed(&self.meks, &meks_index),
            meks_removed: diff_removed(&self.meks, &meks_index),
            slots_changed: diff_changed(&self.slots, &slots_index),
            slots_removed: diff_removed(&self.slots, &slots_index),
            balances_changed: diff_changed(&self.balances, &balances_index),
            balances_removed: diff_removed(&self.balances, &balances_index),
            buffs_changed: diff_changed(&self.buffs, &buffs_index),
            buffs_removed: diff_removed(&self.buffs, &buffs_index),
            config_changed: self
                .last_snapshot
                .as_ref()
                .map(|previous| previous.config != snapshot.config)
                .unwrap_or(true),
        };

        self.encoded_snapshot =
            Some(encode_snapshot(&snapshot).expect("snapshot serialization failed"));
        self.last_hash = Some(snapshot.header.hash);
        self.players = players_index;
        self.meks = meks_index;
        self.slots = slots_index;
        self.balances = balances_index;
        self.buffs = buffs_index;
        self.last_snapshot = Some(snapshot);
        self.last_change = Some(summary);
        summary
    }
}

fn diff_changed<T>(previous: &HashMap<u64, T>, current: &HashMap<u64, T>) -> usize
where
    T: PartialEq,
{
    current
        .iter()
        .filter(|(id, state)| match previous.get(id) {
            Some(prev) => prev != *state,
            None => true,
        })
        .count()
}

fn diff_removed<T>(previous: &HashMap<u64, T>, current: &HashMap<u64, T>) -> usize {
    previous.keys().filter(|id| !current.contains_key(id)).count()
}

pub(crate) fn player_state(
    entity: Entity,
    account: &PlayerAccount,
    tracking: &EssenceTracking,
) -> PlayerState {
    PlayerState {
        entity: entity.to_bits(),
        owner: account.owner,
        display_name: account.display_name.clone(),
        gold: account.gold,
        active: tracking.active,
        last_calculation_ms: tracking.last_calculation_ms,
        last_checkpoint_ms: tracking.last_checkpoint_ms,
        swap_count: tracking.swap_count,
        current_swap_cost: tracking.current_swap_cost,
    }
}

pub(crate) fn mek_state(entity: Entity, unit: &MekUnit) -> MekState {
    MekState {
        entity: entity.to_bits(),
        owner: unit.owner,
        head: unit.head,
        body: unit.body,
        item: unit.item,
        slotted: unit.slotted,
    }
}

pub(crate) fn slot_state(entity: Entity, slot: &EssenceSlot) -> SlotState {
    let (gold_cost, essence_requirements) = match &slot.requirement {
        Some(requirement) => (requirement.gold_cost, requirement.essence.clone()),
        None => (Scalar::zero(), Vec::new()),
    };
    SlotState {
        entity: entity.to_bits(),
        owner: slot.owner,
        slot_index: slot.index,
        unlocked: slot.unlocked,
        occupant: slot.occupant.map(Entity::to_bits),
        gold_cost,
        essence_requirements,
    }
}

pub(crate) fn balance_state(entity: Entity, balance: &EssenceBalance) -> BalanceState {
    BalanceState {
        entity: entity.to_bits(),
        owner: balance.owner,
        kind: balance.kind,
        amount: balance.amount,
        last_updated_ms: balance.last_updated_ms,
    }
}

pub(crate) fn buff_state(entity: Entity, buff: &ActiveBuff) -> BuffState {
    BuffState {
        entity: entity.to_bits(),
        owner: buff.owner,
        scope: buff.scope,
        source_type: buff.source_type,
        name: buff.name.clone(),
        description: buff.description.clone(),
        rate_multiplier: buff.rate_multiplier,
        cap_bonus: buff.cap_bonus,
        expires_at_ms: buff.expires_at_ms.unwrap_or(0),
    }
}
