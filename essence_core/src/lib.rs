//! Core store crate for the Mek Forge essence prototype.
//!
//! Runs the headless Bevy store: accrual checkpoints, buff expiry, metrics
//! and snapshot capture resolve once per call to [`run_cycle`]. All domain
//! mutations go through [`apply_op`], which settles accrued time before it
//! touches anything.

mod components;
pub mod accrual;
pub mod log_stream;
pub mod metrics;
pub mod network;
mod ops;
mod resources;
mod slots;
mod snapshot;
mod worldgen;

use bevy::prelude::*;

pub use accrual::{
    checkpoint_all, checkpoint_owner, AccrualError, AccrualTelemetry, CheckpointStats,
};
pub use components::{
    ActiveBuff, EssenceBalance, EssenceSlot, EssenceTracking, MekUnit, PlayerAccount,
    SlotRequirement,
};
pub use essence_proto::{
    accrue_over_ms, scalar_from_f32, BuffScope, BuffSourceType, EssenceKind, OwnerId, Scalar,
    WorldSnapshot, MS_PER_DAY,
};
pub use metrics::StoreMetrics;
pub use ops::{apply_op, OpError, OpOutcome, StoreOp};
pub use resources::{
    capability_enabled, StoreCapabilities, StoreConfig, StoreConfigError, StoreTick, WorldClock,
    CONFIG_PATH_ENV,
};
pub use slots::{next_swap_cost, requirements_for_owner, SLOT_COUNT};
pub use snapshot::{capture_snapshot, ChangeSummary, SnapshotHistory};

/// Construct a Bevy [`App`] configured with the store cycle pipeline,
/// loading configuration from the path in `ESSENCE_CONFIG_PATH` when set.
///
/// A present-but-broken config file is a startup error, not a fallback to
/// defaults; the caller decides whether to die or retry.
pub fn build_headless_app() -> Result<App, StoreConfigError> {
    Ok(build_headless_app_from(StoreConfig::load()?))
}

/// Construct the store around an already-validated configuration.
pub fn build_headless_app_from(config: StoreConfig) -> App {
    let mut app = App::new();

    app.insert_resource(config)
        .insert_resource(StoreTick::default())
        .insert_resource(WorldClock::default())
        .insert_resource(StoreCapabilities::default())
        .insert_resource(SnapshotHistory::default())
        .insert_resource(AccrualTelemetry::default())
        .insert_resource(StoreMetrics::default())
        .add_plugins(MinimalPlugins)
        .add_systems(Startup, worldgen::spawn_initial_world)
        .add_systems(
            Update,
            (
                advance_tick,
                accrual::run_scheduled_checkpoints
                    .run_if(capability_enabled(StoreCapabilities::ACCRUAL)),
                accrual::expire_buffs.run_if(capability_enabled(StoreCapabilities::BUFF_EXPIRY)),
                metrics::collect_metrics,
                snapshot::capture_snapshot,
            )
                .chain(),
        );

    app
}

fn advance_tick(mut tick: ResMut<StoreTick>) {
    tick.0 = tick.0.wrapping_add(1);
}

/// Execute a single store cycle.
///
/// Each call processes the chained systems configured in
/// [`build_headless_app_from`] (tick increment → checkpoint sweep → buff
/// expiry → metrics → snapshot capture). Callers own broadcasting and
/// command handling.
pub fn run_cycle(app: &mut App) {
    app.update();
}
