mod common;

use essence_core::{
    apply_op, build_headless_app, EssenceKind, OpOutcome, OwnerId, Scalar, SnapshotHistory,
    StoreOp, WorldSnapshot, MS_PER_DAY,
};

fn latest_snapshot(app: &mut bevy::app::App) -> WorldSnapshot {
    app.world
        .resource::<SnapshotHistory>()
        .last_snapshot
        .as_ref()
        .cloned()
        .expect("snapshot captured")
}

fn run_store(cycles: usize) -> WorldSnapshot {
    common::ensure_test_config();
    let mut app = build_headless_app().expect("store config should load");
    for _ in 0..cycles {
        app.update();
    }
    latest_snapshot(&mut app)
}

/// A session that exercises forging, the hangar, grants, the clock and a
/// full checkpoint sweep, so replay equality covers the mutating paths and
/// not just worldgen.
fn run_scripted_session() -> WorldSnapshot {
    common::ensure_test_config();
    let mut app = build_headless_app().expect("store config should load");
    app.update();

    let owner = OwnerId(1);
    apply_op(&mut app.world, StoreOp::AdvanceClock(MS_PER_DAY / 2)).expect("advance clock");
    let mek = match apply_op(
        &mut app.world,
        StoreOp::ForgeMek {
            owner,
            head: EssenceKind::Moss,
            body: EssenceKind::Moss,
            item: EssenceKind::Laser,
        },
    )
    .expect("forge")
    {
        OpOutcome::MekForged { mek } => mek,
        other => panic!("unexpected outcome {other:?}"),
    };
    apply_op(&mut app.world, StoreOp::UnslotMek { owner, slot_index: 0 }).expect("unslot");
    apply_op(
        &mut app.world,
        StoreOp::SlotMek {
            owner,
            slot_index: 0,
            mek,
        },
    )
    .expect("slot");
    apply_op(
        &mut app.world,
        StoreOp::Grant {
            owner,
            kind: EssenceKind::Candy,
            amount: Scalar::from_f32(1.5),
        },
    )
    .expect("grant");
    apply_op(&mut app.world, StoreOp::AdvanceClock(3 * MS_PER_DAY)).expect("advance clock");
    apply_op(&mut app.world, StoreOp::Checkpoint { owner: None }).expect("checkpoint");
    app.update();

    latest_snapshot(&mut app)
}

fn assert_snapshots_match(first: &WorldSnapshot, second: &WorldSnapshot) {
    assert_eq!(first.header.hash, second.header.hash);
    assert_eq!(first.players, second.players);
    assert_eq!(first.meks, second.meks);
    assert_eq!(first.slots, second.slots);
    assert_eq!(first.balances, second.balances);
    assert_eq!(first.buffs, second.buffs);
    assert_eq!(first.config, second.config);
}

#[test]
fn identical_runs_produce_identical_snapshots() {
    let first = run_store(120);
    let second = run_store(120);

    assert_eq!(first.header.tick, 120);
    assert_snapshots_match(&first, &second);
}

#[test]
fn scripted_sessions_replay_identically() {
    let first = run_scripted_session();
    let second = run_scripted_session();

    // The script moved real money around; a trivially empty world would
    // make the equality below meaningless.
    assert!(first
        .balances
        .iter()
        .any(|balance| balance.amount.is_positive()));
    assert_snapshots_match(&first, &second);
}
