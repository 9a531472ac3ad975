use bevy::prelude::*;
use thiserror::Error;
use tracing::debug;

use essence_proto::{BuffScope, BuffSourceType, EssenceKind, OwnerId, Scalar};
use essence_runtime::resolve_params;

use crate::{
    accrual::{checkpoint_all, checkpoint_owner, AccrualError},
    components::{ActiveBuff, EssenceBalance, EssenceSlot, EssenceTracking, MekUnit, PlayerAccount},
    resources::{StoreConfig, WorldClock},
    slots::{next_swap_cost, SLOT_COUNT},
    snapshot::buff_state,
};

/// Mutations accepted by the store. Every player-targeted op settles that
/// player's accrual first, so time already elapsed is banked at the rates
/// that were in force while it passed.
#[derive(Debug, Clone)]
pub enum StoreOp {
    ForgeMek {
        owner: OwnerId,
        head: EssenceKind,
        body: EssenceKind,
        item: EssenceKind,
    },
    SlotMek {
        owner: OwnerId,
        slot_index: u8,
        mek: Entity,
    },
    UnslotMek {
        owner: OwnerId,
        slot_index: u8,
    },
    SwapMek {
        owner: OwnerId,
        slot_index: u8,
        mek: Entity,
    },
    UnlockSlot {
        owner: OwnerId,
        slot_index: u8,
    },
    Grant {
        owner: OwnerId,
        kind: EssenceKind,
        amount: Scalar,
    },
    Spend {
        owner: OwnerId,
        kind: EssenceKind,
        amount: Scalar,
    },
    GrantBuff {
        owner: OwnerId,
        scope: BuffScope,
        source_type: BuffSourceType,
        name: String,
        rate_multiplier: Scalar,
        cap_bonus: Scalar,
        ttl_ms: Option<u64>,
    },
    RevokeBuff {
        owner: OwnerId,
        name: String,
    },
    SetBaseRate(Scalar),
    SetBaseCap(Scalar),
    Checkpoint {
        owner: Option<OwnerId>,
    },
    AdvanceClock(u64),
    SetClock(u64),
}

/// What an accepted op did, echoed back for logging.
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    MekForged { mek: Entity },
    Slotted { owner: OwnerId, slot_index: u8 },
    Unslotted { owner: OwnerId, slot_index: u8, deactivated: bool },
    Swapped { owner: OwnerId, slot_index: u8, cost: Scalar, swap_count: u32 },
    SlotUnlocked { owner: OwnerId, slot_index: u8, gold_spent: Scalar },
    Granted { owner: OwnerId, kind: EssenceKind, amount: Scalar, clamped: bool },
    Spent { owner: OwnerId, kind: EssenceKind, remaining: Scalar },
    BuffGranted { buff: Entity },
    BuffRevoked { name: String },
    RateSet(Scalar),
    CapSet(Scalar),
    Checkpointed { players: u32 },
    ClockAdvanced { now_ms: u64 },
}

#[derive(Debug, Error)]
pub enum OpError {
    #[error("owner {0} is not registered")]
    UnknownOwner(OwnerId),
    #[error("mek {0:?} does not exist")]
    UnknownMek(Entity),
    #[error("slot index {0} is out of range")]
    SlotOutOfRange(u8),
    #[error("slot {0} is locked")]
    SlotLocked(u8),
    #[error("slot {0} is already unlocked")]
    SlotAlreadyUnlocked(u8),
    #[error("slot {0} is occupied")]
    SlotOccupied(u8),
    #[error("slot {0} is empty")]
    SlotEmpty(u8),
    #[error("mek is already slotted in slot {0}")]
    MekAlreadySlotted(u8),
    #[error("mek belongs to owner {actual}, not {requested}")]
    WrongMekOwner { requested: OwnerId, actual: OwnerId },
    #[error("needs {needed} gold, only {available} available")]
    InsufficientGold { needed: Scalar, available: Scalar },
    #[error("needs {needed} {kind:?} essence, only {available} available")]
    InsufficientEssence {
        kind: EssenceKind,
        needed: Scalar,
        available: Scalar,
    },
    #[error("no buff named {0:?} on that owner")]
    UnknownBuff(String),
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("slot {0} carries no unlock requirement")]
    MissingRequirement(u8),
    #[error(transparent)]
    Accrual(#[from] AccrualError),
}

/// Applies one op against the live world.
///
/// Verification happens before any mutation, so a rejected op leaves the
/// world untouched apart from the settlement checkpoint.
pub fn apply_op(world: &mut World, op: StoreOp) -> Result<OpOutcome, OpError> {
    match op {
        StoreOp::ForgeMek {
            owner,
            head,
            body,
            item,
        } => forge_mek(world, owner, head, body, item),
        StoreOp::SlotMek {
            owner,
            slot_index,
            mek,
        } => slot_mek(world, owner, slot_index, mek),
        StoreOp::UnslotMek { owner, slot_index } => unslot_mek(world, owner, slot_index),
        StoreOp::SwapMek {
            owner,
            slot_index,
            mek,
        } => swap_mek(world, owner, slot_index, mek),
        StoreOp::UnlockSlot { owner, slot_index } => unlock_slot(world, owner, slot_index),
        StoreOp::Grant {
            owner,
            kind,
            amount,
        } => grant(world, owner, kind, amount),
        StoreOp::Spend {
            owner,
            kind,
            amount,
        } => spend(world, owner, kind, amount),
        StoreOp::GrantBuff {
            owner,
            scope,
            source_type,
            name,
            rate_multiplier,
            cap_bonus,
            ttl_ms,
        } => grant_buff(
            world,
            owner,
            scope,
            source_type,
            name,
            rate_multiplier,
            cap_bonus,
            ttl_ms,
        ),
        StoreOp::RevokeBuff { owner, name } => revoke_buff(world, owner, name),
        StoreOp::SetBaseRate(rate) => {
            let now_ms = world.resource::<WorldClock>().now_ms;
            checkpoint_all(world, now_ms);
            world.resource_mut::<StoreConfig>().base_rate_per_day = rate;
            Ok(OpOutcome::RateSet(rate))
        }
        StoreOp::SetBaseCap(cap) => {
            let now_ms = world.resource::<WorldClock>().now_ms;
            checkpoint_all(world, now_ms);
            world.resource_mut::<StoreConfig>().base_cap = cap;
            Ok(OpOutcome::CapSet(cap))
        }
        StoreOp::Checkpoint { owner } => {
            let now_ms = world.resource::<WorldClock>().now_ms;
            match owner {
                Some(owner) => {
                    let player = find_player(world, owner)?;
                    checkpoint_owner(world, player, now_ms)?;
                    Ok(OpOutcome::Checkpointed { players: 1 })
                }
                None => {
                    let players = checkpoint_all(world, now_ms);
                    Ok(OpOutcome::Checkpointed { players })
                }
            }
        }
        StoreOp::AdvanceClock(delta_ms) => {
            let mut clock = world.resource_mut::<WorldClock>();
            clock.advance(delta_ms);
            Ok(OpOutcome::ClockAdvanced {
                now_ms: clock.now_ms,
            })
        }
        StoreOp::SetClock(now_ms) => {
            world.resource_mut::<WorldClock>().set(now_ms);
            Ok(OpOutcome::ClockAdvanced { now_ms })
        }
    }
}

fn find_player(world: &mut World, owner: OwnerId) -> Result<Entity, OpError> {
    let mut query = world.query::<(Entity, &PlayerAccount)>();
    query
        .iter(world)
        .find(|(_, account)| account.owner == owner)
        .map(|(entity, _)| entity)
        .ok_or(OpError::UnknownOwner(owner))
}

fn find_slot(world: &mut World, owner: OwnerId, slot_index: u8) -> Result<Entity, OpError> {
    if slot_index as usize >= SLOT_COUNT {
        return Err(OpError::SlotOutOfRange(slot_index));
    }
    let mut query = world.query::<(Entity, &EssenceSlot)>();
    query
        .iter(world)
        .find(|(_, slot)| slot.owner == owner && slot.index == slot_index)
        .map(|(entity, _)| entity)
        .ok_or(OpError::SlotOutOfRange(slot_index))
}

// Settlement before a mutation is best-effort: a player with a dangling
// occupant can still be operated on, the failure just gets logged.
fn settle(world: &mut World, player: Entity, now_ms: u64) {
    if let Err(err) = checkpoint_owner(world, player, now_ms) {
        debug!(target: "mek_forge::accrual", error = %err, "op.settle_skipped");
    }
}

fn forge_mek(
    world: &mut World,
    owner: OwnerId,
    head: EssenceKind,
    body: EssenceKind,
    item: EssenceKind,
) -> Result<OpOutcome, OpError> {
    find_player(world, owner)?;
    let mek = world
        .spawn(MekUnit {
            owner,
            head,
            body,
            item,
            slotted: None,
        })
        .id();
    Ok(OpOutcome::MekForged { mek })
}

fn slot_mek(
    world: &mut World,
    owner: OwnerId,
    slot_index: u8,
    mek: Entity,
) -> Result<OpOutcome, OpError> {
    let now_ms = world.resource::<WorldClock>().now_ms;
    let player = find_player(world, owner)?;
    settle(world, player, now_ms);

    let unit = world.get::<MekUnit>(mek).ok_or(OpError::UnknownMek(mek))?;
    if unit.owner != owner {
        return Err(OpError::WrongMekOwner {
            requested: owner,
            actual: unit.owner,
        });
    }
    if let Some(current) = unit.slotted {
        return Err(OpError::MekAlreadySlotted(current));
    }
    let slot = find_slot(world, owner, slot_index)?;
    {
        let state = world.get::<EssenceSlot>(slot).ok_or(OpError::SlotOutOfRange(slot_index))?;
        if !state.unlocked {
            return Err(OpError::SlotLocked(slot_index));
        }
        if state.occupant.is_some() {
            return Err(OpError::SlotOccupied(slot_index));
        }
    }

    if let Some(mut state) = world.get_mut::<EssenceSlot>(slot) {
        state.occupant = Some(mek);
    }
    if let Some(mut unit) = world.get_mut::<MekUnit>(mek) {
        unit.slotted = Some(slot_index);
    }
    // First occupied slot opens the accrual window.
    if let Some(mut tracking) = world.get_mut::<EssenceTracking>(player) {
        if !tracking.active {
            tracking.active = true;
            tracking.last_calculation_ms = now_ms;
            tracking.last_checkpoint_ms = now_ms;
        }
    }
    Ok(OpOutcome::Slotted { owner, slot_index })
}

fn unslot_mek(world: &mut World, owner: OwnerId, slot_index: u8) -> Result<OpOutcome, OpError> {
    let now_ms = world.resource::<WorldClock>().now_ms;
    let player = find_player(world, owner)?;
    settle(world, player, now_ms);

    let slot = find_slot(world, owner, slot_index)?;
    let occupant = world
        .get::<EssenceSlot>(slot)
        .and_then(|state| state.occupant)
        .ok_or(OpError::SlotEmpty(slot_index))?;

    if let Some(mut state) = world.get_mut::<EssenceSlot>(slot) {
        state.occupant = None;
    }
    // Tolerates a despawned occupant; the slot still has to vacate.
    if let Some(mut unit) = world.get_mut::<MekUnit>(occupant) {
        unit.slotted = None;
    }

    let any_occupied = {
        let mut query = world.query::<&EssenceSlot>();
        query
            .iter(world)
            .any(|state| state.owner == owner && state.occupant.is_some())
    };
    let mut deactivated = false;
    if !any_occupied {
        if let Some(mut tracking) = world.get_mut::<EssenceTracking>(player) {
            if tracking.active {
                tracking.active = false;
                deactivated = true;
            }
        }
    }
    Ok(OpOutcome::Unslotted {
        owner,
        slot_index,
        deactivated,
    })
}

fn swap_mek(
    world: &mut World,
    owner: OwnerId,
    slot_index: u8,
    mek: Entity,
) -> Result<OpOutcome, OpError> {
    let now_ms = world.resource::<WorldClock>().now_ms;
    let player = find_player(world, owner)?;
    // Settles at the outgoing mek's contribution before the lineup changes.
    settle(world, player, now_ms);

    let unit = world.get::<MekUnit>(mek).ok_or(OpError::UnknownMek(mek))?;
    if unit.owner != owner {
        return Err(OpError::WrongMekOwner {
            requested: owner,
            actual: unit.owner,
        });
    }
    if let Some(current) = unit.slotted {
        return Err(OpError::MekAlreadySlotted(current));
    }
    let slot = find_slot(world, owner, slot_index)?;
    let outgoing = {
        let state = world.get::<EssenceSlot>(slot).ok_or(OpError::SlotOutOfRange(slot_index))?;
        if !state.unlocked {
            return Err(OpError::SlotLocked(slot_index));
        }
        state.occupant.ok_or(OpError::SlotEmpty(slot_index))?
    };

    let config = world.resource::<StoreConfig>().clone();
    let swap_count = world
        .get::<EssenceTracking>(player)
        .ok_or(OpError::UnknownOwner(owner))?
        .swap_count;
    let cost = next_swap_cost(swap_count, &config);
    let available = world
        .get::<PlayerAccount>(player)
        .ok_or(OpError::UnknownOwner(owner))?
        .gold;
    if available < cost {
        return Err(OpError::InsufficientGold {
            needed: cost,
            available,
        });
    }

    if let Some(mut account) = world.get_mut::<PlayerAccount>(player) {
        account.gold = account.gold - cost;
    }
    if let Some(mut unit) = world.get_mut::<MekUnit>(outgoing) {
        unit.slotted = None;
    }
    if let Some(mut unit) = world.get_mut::<MekUnit>(mek) {
        unit.slotted = Some(slot_index);
    }
    if let Some(mut state) = world.get_mut::<EssenceSlot>(slot) {
        state.occupant = Some(mek);
    }
    let swap_count = swap_count + 1;
    if let Some(mut tracking) = world.get_mut::<EssenceTracking>(player) {
        tracking.swap_count = swap_count;
        tracking.current_swap_cost = cost;
    }
    Ok(OpOutcome::Swapped {
        owner,
        slot_index,
        cost,
        swap_count,
    })
}

fn unlock_slot(world: &mut World, owner: OwnerId, slot_index: u8) -> Result<OpOutcome, OpError> {
    let now_ms = world.resource::<WorldClock>().now_ms;
    let player = find_player(world, owner)?;
    // Settled balances are what the unlock gets to spend.
    settle(world, player, now_ms);

    let slot = find_slot(world, owner, slot_index)?;
    let requirement = {
        let state = world.get::<EssenceSlot>(slot).ok_or(OpError::SlotOutOfRange(slot_index))?;
        if state.unlocked {
            return Err(OpError::SlotAlreadyUnlocked(slot_index));
        }
        state
            .requirement
            .clone()
            .ok_or(OpError::MissingRequirement(slot_index))?
    };

    let available = world
        .get::<PlayerAccount>(player)
        .ok_or(OpError::UnknownOwner(owner))?
        .gold;
    if available < requirement.gold_cost {
        return Err(OpError::InsufficientGold {
            needed: requirement.gold_cost,
            available,
        });
    }
    let mut debits: Vec<(Entity, Scalar)> = Vec::with_capacity(requirement.essence.len());
    for &(kind, needed) in &requirement.essence {
        let found = {
            let mut query = world.query::<(Entity, &EssenceBalance)>();
            query
                .iter(world)
                .find(|(_, balance)| balance.owner == owner && balance.kind == kind)
                .map(|(entity, balance)| (entity, balance.amount))
        };
        match found {
            Some((entity, amount)) if amount >= needed => debits.push((entity, needed)),
            Some((_, amount)) => {
                return Err(OpError::InsufficientEssence {
                    kind,
                    needed,
                    available: amount,
                })
            }
            None => {
                return Err(OpError::InsufficientEssence {
                    kind,
                    needed,
                    available: Scalar::zero(),
                })
            }
        }
    }

    if let Some(mut account) = world.get_mut::<PlayerAccount>(player) {
        account.gold = account.gold - requirement.gold_cost;
    }
    for (entity, debit) in debits {
        if let Some(mut balance) = world.get_mut::<EssenceBalance>(entity) {
            balance.amount = balance.amount - debit;
            balance.last_updated_ms = now_ms;
        }
    }
    if let Some(mut state) = world.get_mut::<EssenceSlot>(slot) {
        state.unlocked = true;
        state.requirement = None;
    }
    Ok(OpOutcome::SlotUnlocked {
        owner,
        slot_index,
        gold_spent: requirement.gold_cost,
    })
}

fn grant(
    world: &mut World,
    owner: OwnerId,
    kind: EssenceKind,
    amount: Scalar,
) -> Result<OpOutcome, OpError> {
    if !amount.is_positive() {
        return Err(OpError::NonPositiveAmount);
    }
    let now_ms = world.resource::<WorldClock>().now_ms;
    let player = find_player(world, owner)?;
    settle(world, player, now_ms);

    // Grants clamp against the same cap accrual uses. Contribution count
    // does not matter here, the cap is count-independent.
    let cap = {
        let buffs: Vec<_> = {
            let mut query = world.query::<(Entity, &ActiveBuff)>();
            query
                .iter(world)
                .filter(|(_, buff)| buff.owner == owner)
                .map(|(entity, buff)| buff_state(entity, buff))
                .collect()
        };
        let config_state = world.resource::<StoreConfig>().wire_state();
        match resolve_params(Some(&config_state), kind, 0, &buffs) {
            Ok(params) => Some(params.cap),
            Err(err) => {
                debug!(target: "mek_forge::accrual", error = %err, "grant.unclamped");
                None
            }
        }
    };

    let existing = {
        let mut query = world.query::<(Entity, &EssenceBalance)>();
        query
            .iter(world)
            .find(|(_, balance)| balance.owner == owner && balance.kind == kind)
            .map(|(entity, balance)| (entity, balance.amount))
    };
    let (total, clamped) = match existing {
        Some((entity, current)) => {
            let raw = current + amount;
            let total = cap.map_or(raw, |cap| raw.min(cap));
            if let Some(mut balance) = world.get_mut::<EssenceBalance>(entity) {
                balance.amount = total;
                balance.last_updated_ms = now_ms;
            }
            (total, total < raw)
        }
        None => {
            let total = cap.map_or(amount, |cap| amount.min(cap));
            world.spawn(EssenceBalance {
                owner,
                kind,
                amount: total,
                last_updated_ms: now_ms,
            });
            (total, total < amount)
        }
    };
    Ok(OpOutcome::Granted {
        owner,
        kind,
        amount: total,
        clamped,
    })
}

fn spend(
    world: &mut World,
    owner: OwnerId,
    kind: EssenceKind,
    amount: Scalar,
) -> Result<OpOutcome, OpError> {
    if !amount.is_positive() {
        return Err(OpError::NonPositiveAmount);
    }
    let now_ms = world.resource::<WorldClock>().now_ms;
    let player = find_player(world, owner)?;
    settle(world, player, now_ms);

    let existing = {
        let mut query = world.query::<(Entity, &EssenceBalance)>();
        query
            .iter(world)
            .find(|(_, balance)| balance.owner == owner && balance.kind == kind)
            .map(|(entity, balance)| (entity, balance.amount))
    };
    let Some((entity, available)) = existing else {
        return Err(OpError::InsufficientEssence {
            kind,
            needed: amount,
            available: Scalar::zero(),
        });
    };
    if available < amount {
        return Err(OpError::InsufficientEssence {
            kind,
            needed: amount,
            available,
        });
    }
    let remaining = available - amount;
    if let Some(mut balance) = world.get_mut::<EssenceBalance>(entity) {
        balance.amount = remaining;
        balance.last_updated_ms = now_ms;
    }
    Ok(OpOutcome::Spent {
        owner,
        kind,
        remaining,
    })
}

#[allow(clippy::too_many_arguments)]
fn grant_buff(
    world: &mut World,
    owner: OwnerId,
    scope: BuffScope,
    source_type: BuffSourceType,
    name: String,
    rate_multiplier: Scalar,
    cap_bonus: Scalar,
    ttl_ms: Option<u64>,
) -> Result<OpOutcome, OpError> {
    let now_ms = world.resource::<WorldClock>().now_ms;
    let player = find_player(world, owner)?;
    // Time before the buff landed accrues at the unbuffed rate.
    settle(world, player, now_ms);

    let buff = world
        .spawn(ActiveBuff {
            owner,
            scope,
            source_type,
            name,
            description: String::new(),
            rate_multiplier,
            cap_bonus,
            expires_at_ms: ttl_ms.map(|ttl| now_ms.saturating_add(ttl)),
        })
        .id();
    Ok(OpOutcome::BuffGranted { buff })
}

fn revoke_buff(world: &mut World, owner: OwnerId, name: String) -> Result<OpOutcome, OpError> {
    let now_ms = world.resource::<WorldClock>().now_ms;
    let player = find_player(world, owner)?;
    // Banks the boosted window before the multiplier disappears.
    settle(world, player, now_ms);

    let buff = {
        let mut query = world.query::<(Entity, &ActiveBuff)>();
        query
            .iter(world)
            .find(|(_, buff)| buff.owner == owner && buff.name == name)
            .map(|(entity, _)| entity)
    };
    match buff {
        Some(entity) => {
            world.despawn(entity);
            Ok(OpOutcome::BuffRevoked { name })
        }
        None => Err(OpError::UnknownBuff(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::AccrualTelemetry;
    use crate::resources::StoreTick;
    use crate::slots::requirements_for_owner;
    use essence_proto::{scalar_from_f32, MS_PER_DAY};

    fn store_world() -> World {
        let mut world = World::new();
        world.insert_resource(StoreConfig::default());
        world.insert_resource(WorldClock::default());
        world.insert_resource(StoreTick::default());
        world.insert_resource(AccrualTelemetry::default());
        world
    }

    fn spawn_player(world: &mut World, owner: OwnerId) -> Entity {
        let config = world.resource::<StoreConfig>().clone();
        let requirements = requirements_for_owner(owner, &config);
        let player = world
            .spawn((
                PlayerAccount {
                    owner,
                    display_name: format!("pilot-{:02}", owner.0),
                    gold: Scalar::from_i64(100_000),
                },
                EssenceTracking::default(),
            ))
            .id();
        world.spawn(EssenceSlot {
            owner,
            index: 0,
            unlocked: true,
            occupant: None,
            requirement: None,
        });
        for (offset, requirement) in requirements.into_iter().enumerate() {
            world.spawn(EssenceSlot {
                owner,
                index: offset as u8 + 1,
                unlocked: false,
                occupant: None,
                requirement: Some(requirement),
            });
        }
        player
    }

    fn forge(world: &mut World, owner: OwnerId, kind: EssenceKind) -> Entity {
        match apply_op(
            world,
            StoreOp::ForgeMek {
                owner,
                head: kind,
                body: kind,
                item: kind,
            },
        )
        .unwrap()
        {
            OpOutcome::MekForged { mek } => mek,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    fn balance_amount(world: &mut World, owner: OwnerId, kind: EssenceKind) -> Option<Scalar> {
        let mut query = world.query::<&EssenceBalance>();
        query
            .iter(world)
            .find(|balance| balance.owner == owner && balance.kind == kind)
            .map(|balance| balance.amount)
    }

    #[test]
    fn slotting_opens_the_accrual_window() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);
        let mek = forge(&mut world, owner, EssenceKind::Stone);

        world.resource_mut::<WorldClock>().set(5_000);
        apply_op(
            &mut world,
            StoreOp::SlotMek {
                owner,
                slot_index: 0,
                mek,
            },
        )
        .unwrap();

        let tracking = world.get::<EssenceTracking>(player).unwrap();
        assert!(tracking.active);
        assert_eq!(tracking.last_calculation_ms, 5_000);
        assert_eq!(world.get::<MekUnit>(mek).unwrap().slotted, Some(0));
    }

    #[test]
    fn unslotting_the_last_mek_deactivates() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);
        let mek = forge(&mut world, owner, EssenceKind::Stone);
        apply_op(
            &mut world,
            StoreOp::SlotMek {
                owner,
                slot_index: 0,
                mek,
            },
        )
        .unwrap();

        let outcome = apply_op(&mut world, StoreOp::UnslotMek { owner, slot_index: 0 }).unwrap();
        assert_eq!(
            outcome,
            OpOutcome::Unslotted {
                owner,
                slot_index: 0,
                deactivated: true,
            }
        );
        assert!(!world.get::<EssenceTracking>(player).unwrap().active);
        assert_eq!(world.get::<MekUnit>(mek).unwrap().slotted, None);
    }

    #[test]
    fn swap_charges_the_escalating_ladder() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);
        let first = forge(&mut world, owner, EssenceKind::Stone);
        let second = forge(&mut world, owner, EssenceKind::Disco);
        let third = forge(&mut world, owner, EssenceKind::Laser);
        apply_op(
            &mut world,
            StoreOp::SlotMek {
                owner,
                slot_index: 0,
                mek: first,
            },
        )
        .unwrap();

        let outcome = apply_op(
            &mut world,
            StoreOp::SwapMek {
                owner,
                slot_index: 0,
                mek: second,
            },
        )
        .unwrap();
        assert_eq!(
            outcome,
            OpOutcome::Swapped {
                owner,
                slot_index: 0,
                cost: Scalar::from_i64(1_000),
                swap_count: 1,
            }
        );
        let outcome = apply_op(
            &mut world,
            StoreOp::SwapMek {
                owner,
                slot_index: 0,
                mek: third,
            },
        )
        .unwrap();
        assert_eq!(
            outcome,
            OpOutcome::Swapped {
                owner,
                slot_index: 0,
                cost: Scalar::from_i64(1_500),
                swap_count: 2,
            }
        );

        let account = world.get::<PlayerAccount>(player).unwrap();
        assert_eq!(account.gold, Scalar::from_i64(100_000 - 2_500));
        let tracking = world.get::<EssenceTracking>(player).unwrap();
        assert_eq!(tracking.current_swap_cost, Scalar::from_i64(1_500));
        // The displaced meks are free again.
        assert_eq!(world.get::<MekUnit>(first).unwrap().slotted, None);
        assert_eq!(world.get::<MekUnit>(second).unwrap().slotted, None);
        assert_eq!(world.get::<MekUnit>(third).unwrap().slotted, Some(0));
    }

    #[test]
    fn swap_on_an_empty_slot_is_rejected() {
        let mut world = store_world();
        let owner = OwnerId(1);
        spawn_player(&mut world, owner);
        let mek = forge(&mut world, owner, EssenceKind::Stone);

        let err = apply_op(
            &mut world,
            StoreOp::SwapMek {
                owner,
                slot_index: 0,
                mek,
            },
        )
        .unwrap_err();
        assert!(matches!(err, OpError::SlotEmpty(0)));
    }

    #[test]
    fn unlock_spends_gold_and_every_required_essence() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);
        let requirement = requirements_for_owner(owner, world.resource::<StoreConfig>())[0].clone();

        for &(kind, amount) in &requirement.essence {
            apply_op(
                &mut world,
                StoreOp::Grant {
                    owner,
                    kind,
                    amount,
                },
            )
            .unwrap();
        }
        let outcome = apply_op(&mut world, StoreOp::UnlockSlot { owner, slot_index: 1 }).unwrap();
        assert_eq!(
            outcome,
            OpOutcome::SlotUnlocked {
                owner,
                slot_index: 1,
                gold_spent: Scalar::from_i64(10_000),
            }
        );

        let account = world.get::<PlayerAccount>(player).unwrap();
        assert_eq!(account.gold, Scalar::from_i64(90_000));
        for &(kind, _) in &requirement.essence {
            assert_eq!(balance_amount(&mut world, owner, kind), Some(Scalar::zero()));
        }
        let unlocked = {
            let mut query = world.query::<&EssenceSlot>();
            query
                .iter(&world)
                .find(|slot| slot.owner == owner && slot.index == 1)
                .map(|slot| (slot.unlocked, slot.requirement.is_none()))
        };
        assert_eq!(unlocked, Some((true, true)));
    }

    #[test]
    fn unlock_rejects_before_spending_anything() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);

        let err = apply_op(&mut world, StoreOp::UnlockSlot { owner, slot_index: 1 }).unwrap_err();
        assert!(matches!(err, OpError::InsufficientEssence { .. }));
        // Nothing was charged.
        assert_eq!(
            world.get::<PlayerAccount>(player).unwrap().gold,
            Scalar::from_i64(100_000)
        );
    }

    #[test]
    fn grants_clamp_at_the_resolved_cap() {
        let mut world = store_world();
        let owner = OwnerId(1);
        spawn_player(&mut world, owner);

        let outcome = apply_op(
            &mut world,
            StoreOp::Grant {
                owner,
                kind: EssenceKind::Moss,
                amount: Scalar::from_i64(25),
            },
        )
        .unwrap();
        assert_eq!(
            outcome,
            OpOutcome::Granted {
                owner,
                kind: EssenceKind::Moss,
                amount: Scalar::from_i64(10),
                clamped: true,
            }
        );
    }

    #[test]
    fn cap_bonus_buffs_raise_the_grant_ceiling() {
        let mut world = store_world();
        let owner = OwnerId(1);
        spawn_player(&mut world, owner);
        apply_op(
            &mut world,
            StoreOp::GrantBuff {
                owner,
                scope: BuffScope::AllKinds,
                source_type: BuffSourceType::Achievement,
                name: "hoarder".to_string(),
                rate_multiplier: Scalar::one(),
                cap_bonus: Scalar::from_i64(5),
                ttl_ms: None,
            },
        )
        .unwrap();

        let outcome = apply_op(
            &mut world,
            StoreOp::Grant {
                owner,
                kind: EssenceKind::Moss,
                amount: Scalar::from_i64(25),
            },
        )
        .unwrap();
        assert_eq!(
            outcome,
            OpOutcome::Granted {
                owner,
                kind: EssenceKind::Moss,
                amount: Scalar::from_i64(15),
                clamped: true,
            }
        );
    }

    #[test]
    fn spending_more_than_the_balance_fails() {
        let mut world = store_world();
        let owner = OwnerId(1);
        spawn_player(&mut world, owner);
        apply_op(
            &mut world,
            StoreOp::Grant {
                owner,
                kind: EssenceKind::Candy,
                amount: Scalar::from_i64(3),
            },
        )
        .unwrap();

        let err = apply_op(
            &mut world,
            StoreOp::Spend {
                owner,
                kind: EssenceKind::Candy,
                amount: Scalar::from_i64(4),
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OpError::InsufficientEssence { kind: EssenceKind::Candy, .. }
        ));
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Candy),
            Some(Scalar::from_i64(3))
        );
    }

    #[test]
    fn revoking_a_missing_buff_is_an_error() {
        let mut world = store_world();
        let owner = OwnerId(1);
        spawn_player(&mut world, owner);

        let err = apply_op(
            &mut world,
            StoreOp::RevokeBuff {
                owner,
                name: "ghost".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, OpError::UnknownBuff(_)));
    }

    #[test]
    fn checkpoint_after_a_day_matches_the_posted_rate() {
        let mut world = store_world();
        let owner = OwnerId(1);
        spawn_player(&mut world, owner);
        let mek = forge(&mut world, owner, EssenceKind::Stone);
        apply_op(
            &mut world,
            StoreOp::Grant {
                owner,
                kind: EssenceKind::Stone,
                amount: Scalar::from_i64(2),
            },
        )
        .unwrap();
        apply_op(
            &mut world,
            StoreOp::SlotMek {
                owner,
                slot_index: 0,
                mek,
            },
        )
        .unwrap();

        // Head, body and item all hit Stone: 0.1/day each over one day.
        apply_op(&mut world, StoreOp::AdvanceClock(MS_PER_DAY)).unwrap();
        apply_op(&mut world, StoreOp::Checkpoint { owner: Some(owner) }).unwrap();
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Stone),
            Some(scalar_from_f32(2.3))
        );

        apply_op(&mut world, StoreOp::AdvanceClock(90 * MS_PER_DAY)).unwrap();
        apply_op(&mut world, StoreOp::Checkpoint { owner: Some(owner) }).unwrap();
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Stone),
            Some(Scalar::from_i64(10))
        );
    }

    #[test]
    fn rate_changes_settle_before_applying() {
        let mut world = store_world();
        let owner = OwnerId(1);
        spawn_player(&mut world, owner);
        let mek = forge(&mut world, owner, EssenceKind::Stone);
        apply_op(
            &mut world,
            StoreOp::SlotMek {
                owner,
                slot_index: 0,
                mek,
            },
        )
        .unwrap();

        // One day at 0.1/day per hit, then the base rate doubles.
        apply_op(&mut world, StoreOp::AdvanceClock(MS_PER_DAY)).unwrap();
        apply_op(&mut world, StoreOp::SetBaseRate(scalar_from_f32(0.2))).unwrap();
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Stone),
            Some(scalar_from_f32(0.3))
        );

        apply_op(&mut world, StoreOp::AdvanceClock(MS_PER_DAY)).unwrap();
        apply_op(&mut world, StoreOp::Checkpoint { owner: Some(owner) }).unwrap();
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Stone),
            Some(scalar_from_f32(0.9))
        );
    }

    #[test]
    fn ops_touch_only_the_targeted_owner() {
        let mut world = store_world();
        let first = OwnerId(1);
        let second = OwnerId(2);
        spawn_player(&mut world, first);
        spawn_player(&mut world, second);

        apply_op(
            &mut world,
            StoreOp::Grant {
                owner: first,
                kind: EssenceKind::Tiles,
                amount: Scalar::from_i64(4),
            },
        )
        .unwrap();

        assert_eq!(
            balance_amount(&mut world, first, EssenceKind::Tiles),
            Some(Scalar::from_i64(4))
        );
        assert_eq!(balance_amount(&mut world, second, EssenceKind::Tiles), None);
    }

    #[test]
    fn unknown_owners_are_rejected() {
        let mut world = store_world();
        let err = apply_op(
            &mut world,
            StoreOp::Checkpoint {
                owner: Some(OwnerId(99)),
            },
        )
        .unwrap_err();
        assert!(matches!(err, OpError::UnknownOwner(OwnerId(99))));
    }
}
