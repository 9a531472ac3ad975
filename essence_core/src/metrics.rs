use bevy::prelude::*;

use essence_proto::Scalar;

use crate::{
    accrual::AccrualTelemetry,
    components::{ActiveBuff, EssenceBalance, EssenceSlot, EssenceTracking},
    resources::StoreConfig,
};

#[derive(Resource, Default, Debug, Clone)]
pub struct StoreMetrics {
    pub cycle: u64,
    pub players: u32,
    pub active_players: u32,
    pub slotted_meks: u32,
    pub balances: u32,
    pub capped_balances: u32,
    pub active_buffs: u32,
    pub total_essence: i128,
    pub last_sweep_ms: u64,
    pub players_skipped: u32,
}

pub fn collect_metrics(
    config: Res<StoreConfig>,
    telemetry: Res<AccrualTelemetry>,
    mut metrics: ResMut<StoreMetrics>,
    trackings: Query<&EssenceTracking>,
    slots: Query<&EssenceSlot>,
    balances: Query<&EssenceBalance>,
    buffs: Query<&ActiveBuff>,
) {
    metrics.cycle += 1;

    let mut players = 0u32;
    let mut active_players = 0u32;
    for tracking in trackings.iter() {
        players += 1;
        if tracking.active {
            active_players += 1;
        }
    }
    metrics.players = players;
    metrics.active_players = active_players;
    metrics.slotted_meks = slots.iter().filter(|slot| slot.occupant.is_some()).count() as u32;
    metrics.active_buffs = buffs.iter().count() as u32;

    let mut balance_count = 0u32;
    let mut capped = 0u32;
    let mut total = 0i128;
    for balance in balances.iter() {
        balance_count += 1;
        total += balance.amount.raw() as i128;
        // A balance counts as capped against the cap its owner actually
        // has, bonuses included.
        let mut cap = config.base_cap;
        for buff in buffs.iter() {
            if buff.owner == balance.owner && buff.scope.applies_to(balance.kind) {
                cap += buff.cap_bonus.max(Scalar::zero());
            }
        }
        if balance.amount >= cap {
            capped += 1;
        }
    }
    metrics.balances = balance_count;
    metrics.capped_balances = capped;
    metrics.total_essence = total;
    metrics.last_sweep_ms = telemetry.last_sweep_ms;
    metrics.players_skipped = telemetry.players_skipped;
}
