use bevy::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use essence_proto::{accrue_over_ms, BuffState, EssenceKind, OwnerId};
use essence_runtime::{resolve_params, ConfigError};

use crate::{
    components::{ActiveBuff, EssenceBalance, EssenceSlot, EssenceTracking, MekUnit, PlayerAccount},
    resources::{StoreConfig, StoreTick, WorldClock},
    snapshot::buff_state,
};

const KIND_COUNT: usize = EssenceKind::VARIANTS.len();

#[derive(Debug, Error)]
pub enum AccrualError {
    #[error("entity {0:?} has no player account")]
    MissingAccount(Entity),
    #[error("entity {0:?} has no tracking state")]
    MissingTracking(Entity),
    #[error("slot {slot} occupant {mek:?} no longer exists")]
    MissingOccupant { slot: u8, mek: Entity },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result of materializing accrued essence for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    pub owner: OwnerId,
    pub skipped_inactive: bool,
    pub accrued_kinds: u32,
    pub balances_updated: u32,
    pub balances_capped: u32,
}

impl CheckpointStats {
    fn inactive(owner: OwnerId) -> Self {
        Self {
            owner,
            skipped_inactive: true,
            accrued_kinds: 0,
            balances_updated: 0,
            balances_capped: 0,
        }
    }
}

/// Rolling stats from the latest checkpoint sweep.
#[derive(Resource, Default, Debug, Clone)]
pub struct AccrualTelemetry {
    pub sweeps_total: u64,
    pub last_sweep_ms: u64,
    pub last_sweep_tick: u64,
    pub players_processed: u32,
    pub players_skipped: u32,
    pub balances_updated: u32,
    pub balances_capped: u32,
    config_invalid_reported: bool,
}

/// Materializes accrued essence for one player at `now_ms`.
///
/// Contribution counts come from the meks occupying the player's unlocked
/// slots (head, body and item each add one hit to their kind). Each
/// contributing kind resolves `(rate, cap)` through the same resolver the
/// clients use, then stores `min(amount + accrue_over_ms(rate, elapsed), cap)`.
/// Balances are created on first contribution.
pub fn checkpoint_owner(
    world: &mut World,
    player: Entity,
    now_ms: u64,
) -> Result<CheckpointStats, AccrualError> {
    let owner = world
        .get::<PlayerAccount>(player)
        .ok_or(AccrualError::MissingAccount(player))?
        .owner;
    let tracking = world
        .get::<EssenceTracking>(player)
        .ok_or(AccrualError::MissingTracking(player))?;
    if !tracking.active {
        return Ok(CheckpointStats::inactive(owner));
    }
    let elapsed_ms = now_ms.saturating_sub(tracking.last_calculation_ms);

    let occupants: Vec<(u8, Entity)> = {
        let mut slots = world.query::<&EssenceSlot>();
        slots
            .iter(world)
            .filter(|slot| slot.owner == owner && slot.unlocked)
            .filter_map(|slot| slot.occupant.map(|occupant| (slot.index, occupant)))
            .collect()
    };

    let mut counts = [0u32; KIND_COUNT];
    for (slot_index, occupant) in occupants {
        let mek = world
            .get::<MekUnit>(occupant)
            .ok_or(AccrualError::MissingOccupant {
                slot: slot_index,
                mek: occupant,
            })?;
        counts[mek.head.index()] += 1;
        counts[mek.body.index()] += 1;
        counts[mek.item.index()] += 1;
    }

    let buffs: Vec<BuffState> = {
        let mut query = world.query::<(Entity, &ActiveBuff)>();
        query
            .iter(world)
            .filter(|(_, buff)| buff.owner == owner)
            .map(|(entity, buff)| buff_state(entity, buff))
            .collect()
    };

    let mut balance_entities: [Option<Entity>; KIND_COUNT] = [None; KIND_COUNT];
    {
        let mut query = world.query::<(Entity, &EssenceBalance)>();
        for (entity, balance) in query.iter(world) {
            if balance.owner == owner {
                balance_entities[balance.kind.index()] = Some(entity);
            }
        }
    }

    let config_state = world.resource::<StoreConfig>().wire_state();
    let mut stats = CheckpointStats {
        owner,
        skipped_inactive: false,
        accrued_kinds: 0,
        balances_updated: 0,
        balances_capped: 0,
    };

    // Kinds are visited in catalog order so balance rows spawn in the same
    // order on every run with the same script.
    for (idx, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let kind = EssenceKind::VARIANTS[idx];
        let params = resolve_params(Some(&config_state), kind, count, &buffs)?;
        let earned = accrue_over_ms(params.rate_per_day, elapsed_ms);
        stats.accrued_kinds += 1;
        match balance_entities[idx] {
            Some(entity) => {
                if let Some(mut balance) = world.get_mut::<EssenceBalance>(entity) {
                    let next = (balance.amount + earned).min(params.cap);
                    if next != balance.amount {
                        stats.balances_updated += 1;
                    }
                    balance.amount = next;
                    balance.last_updated_ms = now_ms;
                    if next == params.cap {
                        stats.balances_capped += 1;
                    }
                }
            }
            None => {
                let amount = earned.min(params.cap);
                world.spawn(EssenceBalance {
                    owner,
                    kind,
                    amount,
                    last_updated_ms: now_ms,
                });
                stats.balances_updated += 1;
                if amount == params.cap {
                    stats.balances_capped += 1;
                }
            }
        }
    }

    if let Some(mut tracking) = world.get_mut::<EssenceTracking>(player) {
        tracking.last_calculation_ms = now_ms;
        tracking.last_checkpoint_ms = now_ms;
    }

    Ok(stats)
}

/// Checkpoints every player, isolating failures per player. Returns the
/// number of players processed.
pub fn checkpoint_all(world: &mut World, now_ms: u64) -> u32 {
    let players: Vec<Entity> = {
        let mut query = world.query_filtered::<Entity, With<EssenceTracking>>();
        query.iter(world).collect()
    };
    let mut processed = 0u32;
    for player in players {
        match checkpoint_owner(world, player, now_ms) {
            Ok(_) => processed += 1,
            Err(err) => {
                let owner = world
                    .get::<PlayerAccount>(player)
                    .map(|account| account.owner.0)
                    .unwrap_or_default();
                warn!(
                    target: "mek_forge::accrual",
                    owner,
                    error = %err,
                    "checkpoint.player_skipped"
                );
            }
        }
    }
    processed
}

/// Scheduled sweep: checkpoints every active player whose
/// `checkpoint_interval_ms` has elapsed. One failing player is logged and
/// skipped without aborting the sweep.
pub fn run_scheduled_checkpoints(world: &mut World) {
    let config_state = world.resource::<StoreConfig>().wire_state();
    let config_valid =
        resolve_params(Some(&config_state), EssenceKind::VARIANTS[0], 0, &[]).is_ok();
    if !config_valid {
        let mut telemetry = world.resource_mut::<AccrualTelemetry>();
        if !telemetry.config_invalid_reported {
            telemetry.config_invalid_reported = true;
            warn!(
                target: "mek_forge::accrual",
                "checkpoint.sweep_suspended=config_invalid"
            );
        }
        return;
    }
    if world.resource::<AccrualTelemetry>().config_invalid_reported {
        world
            .resource_mut::<AccrualTelemetry>()
            .config_invalid_reported = false;
        info!(target: "mek_forge::accrual", "checkpoint.config_recovered");
    }

    let now_ms = world.resource::<WorldClock>().now_ms;
    let interval = world.resource::<StoreConfig>().checkpoint_interval_ms;
    let due: Vec<Entity> = {
        let mut query = world.query::<(Entity, &EssenceTracking)>();
        query
            .iter(world)
            .filter(|(_, tracking)| {
                tracking.active
                    && now_ms.saturating_sub(tracking.last_checkpoint_ms) >= interval
            })
            .map(|(entity, _)| entity)
            .collect()
    };
    if due.is_empty() {
        return;
    }

    let mut processed = 0u32;
    let mut skipped = 0u32;
    let mut updated = 0u32;
    let mut capped = 0u32;
    for player in due {
        match checkpoint_owner(world, player, now_ms) {
            Ok(stats) => {
                processed += 1;
                updated += stats.balances_updated;
                capped += stats.balances_capped;
            }
            Err(err) => {
                skipped += 1;
                let owner = world
                    .get::<PlayerAccount>(player)
                    .map(|account| account.owner.0)
                    .unwrap_or_default();
                warn!(
                    target: "mek_forge::accrual",
                    owner,
                    error = %err,
                    "checkpoint.player_skipped"
                );
            }
        }
    }

    let tick = world.resource::<StoreTick>().0;
    let mut telemetry = world.resource_mut::<AccrualTelemetry>();
    telemetry.sweeps_total += 1;
    telemetry.last_sweep_ms = now_ms;
    telemetry.last_sweep_tick = tick;
    telemetry.players_processed = processed;
    telemetry.players_skipped = skipped;
    telemetry.balances_updated = updated;
    telemetry.balances_capped = capped;
    info!(
        target: "mek_forge::accrual",
        players = processed,
        skipped,
        balances = updated,
        capped,
        "checkpoint.sweep_completed"
    );
}

/// Despawns buffs whose expiry has passed. No settlement happens here: the
/// next checkpoint accrues the whole elapsed window at the post-expiry rate.
pub fn expire_buffs(
    mut commands: Commands,
    clock: Res<WorldClock>,
    buffs: Query<(Entity, &ActiveBuff)>,
) {
    for (entity, buff) in buffs.iter() {
        let Some(expires_at_ms) = buff.expires_at_ms else {
            continue;
        };
        if expires_at_ms <= clock.now_ms {
            info!(
                target: "mek_forge::accrual",
                owner = buff.owner.0,
                name = %buff.name,
                "buff.expired"
            );
            commands.entity(entity).despawn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::requirements_for_owner;
    use essence_proto::{scalar_from_f32, BuffScope, BuffSourceType, Scalar, MS_PER_DAY};

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

    fn slot_demo_mek(world: &mut World, player: Entity, owner: OwnerId) -> Entity {
        let mek = world
            .spawn(MekUnit {
                owner,
                head: EssenceKind::Stone,
                body: EssenceKind::Disco,
                item: EssenceKind::Laser,
                slotted: Some(0),
            })
            .id();
        let slot = {
            let mut query = world.query::<(Entity, &EssenceSlot)>();
            query
                .iter(world)
                .find(|(_, slot)| slot.owner == owner && slot.index == 0)
                .map(|(entity, _)| entity)
                .unwrap()
        };
        world.get_mut::<EssenceSlot>(slot).unwrap().occupant = Some(mek);
        let mut tracking = world.get_mut::<EssenceTracking>(player).unwrap();
        tracking.active = true;
        tracking.last_calculation_ms = 0;
        mek
    }

    fn balance_amount(world: &mut World, owner: OwnerId, kind: EssenceKind) -> Option<Scalar> {
        let mut query = world.query::<&EssenceBalance>();
        query
            .iter(world)
            .find(|balance| balance.owner == owner && balance.kind == kind)
            .map(|balance| balance.amount)
    }

    #[test]
    fn one_day_accrues_a_tenth_per_hit() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);
        slot_demo_mek(&mut world, player, owner);
        world.spawn(EssenceBalance {
            owner,
            kind: EssenceKind::Stone,
            amount: Scalar::from_f32(2.0),
            last_updated_ms: 0,
        });

        let stats = checkpoint_owner(&mut world, player, MS_PER_DAY).unwrap();
        assert_eq!(stats.accrued_kinds, 3);
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Stone),
            Some(scalar_from_f32(2.1))
        );
        // The other two variations materialize fresh rows at 0.1.
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Disco),
            Some(scalar_from_f32(0.1))
        );
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Laser),
            Some(scalar_from_f32(0.1))
        );
    }

    #[test]
    fn long_idle_windows_cap_out() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);
        slot_demo_mek(&mut world, player, owner);
        world.spawn(EssenceBalance {
            owner,
            kind: EssenceKind::Stone,
            amount: Scalar::from_f32(2.0),
            last_updated_ms: 0,
        });

        let stats = checkpoint_owner(&mut world, player, 90 * MS_PER_DAY).unwrap();
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Stone),
            Some(Scalar::from_i64(10))
        );
        assert_eq!(stats.balances_capped, 1);
    }

    #[test]
    fn inactive_players_are_skipped() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);

        let stats = checkpoint_owner(&mut world, player, MS_PER_DAY).unwrap();
        assert!(stats.skipped_inactive);
        assert_eq!(balance_amount(&mut world, owner, EssenceKind::Stone), None);
    }

    #[test]
    fn buff_multiplier_raises_the_checkpoint_rate() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);
        slot_demo_mek(&mut world, player, owner);
        world.spawn(ActiveBuff {
            owner,
            scope: BuffScope::Kind(EssenceKind::Stone),
            source_type: BuffSourceType::Event,
            name: "stone-rush".to_string(),
            description: String::new(),
            rate_multiplier: scalar_from_f32(1.5),
            cap_bonus: Scalar::zero(),
            expires_at_ms: None,
        });

        checkpoint_owner(&mut world, player, MS_PER_DAY).unwrap();
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Stone),
            Some(scalar_from_f32(0.15))
        );
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Disco),
            Some(scalar_from_f32(0.1))
        );
    }

    #[test]
    fn dangling_occupants_fail_the_player() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);
        let mek = slot_demo_mek(&mut world, player, owner);
        world.despawn(mek);

        let err = checkpoint_owner(&mut world, player, MS_PER_DAY).unwrap_err();
        assert!(matches!(err, AccrualError::MissingOccupant { slot: 0, .. }));
    }

    #[test]
    fn sweep_fires_on_the_interval_and_stamps_players() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);
        slot_demo_mek(&mut world, player, owner);

        // Half a day: not due yet.
        world.resource_mut::<WorldClock>().set(MS_PER_DAY / 2);
        run_scheduled_checkpoints(&mut world);
        assert_eq!(world.resource::<AccrualTelemetry>().sweeps_total, 0);

        world.resource_mut::<WorldClock>().set(MS_PER_DAY);
        run_scheduled_checkpoints(&mut world);
        let telemetry = world.resource::<AccrualTelemetry>().clone();
        assert_eq!(telemetry.sweeps_total, 1);
        assert_eq!(telemetry.players_processed, 1);
        assert_eq!(telemetry.players_skipped, 0);
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Stone),
            Some(scalar_from_f32(0.1))
        );

        // Freshly stamped players are no longer due.
        run_scheduled_checkpoints(&mut world);
        assert_eq!(world.resource::<AccrualTelemetry>().sweeps_total, 1);
    }

    #[test]
    fn sweep_isolates_broken_players() {
        let mut world = store_world();
        let healthy = OwnerId(1);
        let broken = OwnerId(2);
        let healthy_player = spawn_player(&mut world, healthy);
        slot_demo_mek(&mut world, healthy_player, healthy);
        let broken_player = spawn_player(&mut world, broken);
        let mek = slot_demo_mek(&mut world, broken_player, broken);
        world.despawn(mek);

        world.resource_mut::<WorldClock>().set(MS_PER_DAY);
        run_scheduled_checkpoints(&mut world);

        let telemetry = world.resource::<AccrualTelemetry>().clone();
        assert_eq!(telemetry.players_processed, 1);
        assert_eq!(telemetry.players_skipped, 1);
        assert_eq!(
            balance_amount(&mut world, healthy, EssenceKind::Stone),
            Some(scalar_from_f32(0.1))
        );
    }

    #[test]
    fn invalid_config_suspends_the_sweep() {
        let mut world = store_world();
        let owner = OwnerId(1);
        let player = spawn_player(&mut world, owner);
        slot_demo_mek(&mut world, player, owner);
        world.resource_mut::<StoreConfig>().base_cap = Scalar::zero();

        world.resource_mut::<WorldClock>().set(MS_PER_DAY);
        run_scheduled_checkpoints(&mut world);
        assert_eq!(world.resource::<AccrualTelemetry>().sweeps_total, 0);
        assert_eq!(balance_amount(&mut world, owner, EssenceKind::Stone), None);

        // Repairing the config resumes accrual from the original baseline.
        world.resource_mut::<StoreConfig>().base_cap = Scalar::from_i64(10);
        run_scheduled_checkpoints(&mut world);
        assert_eq!(world.resource::<AccrualTelemetry>().sweeps_total, 1);
        assert_eq!(
            balance_amount(&mut world, owner, EssenceKind::Stone),
            Some(scalar_from_f32(0.1))
        );
    }

    #[test]
    fn expired_buffs_are_despawned() {
        let mut app = App::new();
        app.insert_resource(WorldClock::default());
        app.add_systems(Update, expire_buffs);
        let expiring = app
            .world
            .spawn(ActiveBuff {
                owner: OwnerId(1),
                scope: BuffScope::AllKinds,
                source_type: BuffSourceType::Consumable,
                name: "sugar-high".to_string(),
                description: String::new(),
                rate_multiplier: scalar_from_f32(2.0),
                cap_bonus: Scalar::zero(),
                expires_at_ms: Some(5_000),
            })
            .id();
        let permanent = app
            .world
            .spawn(ActiveBuff {
                owner: OwnerId(1),
                scope: BuffScope::AllKinds,
                source_type: BuffSourceType::Achievement,
                name: "veteran".to_string(),
                description: String::new(),
                rate_multiplier: scalar_from_f32(1.1),
                cap_bonus: Scalar::zero(),
                expires_at_ms: None,
            })
            .id();

        app.world.resource_mut::<WorldClock>().set(4_999);
        app.update();
        assert!(app.world.get::<ActiveBuff>(expiring).is_some());

        app.world.resource_mut::<WorldClock>().set(5_000);
        app.update();
        assert!(app.world.get::<ActiveBuff>(expiring).is_none());
        assert!(app.world.get::<ActiveBuff>(permanent).is_some());
    }
}
