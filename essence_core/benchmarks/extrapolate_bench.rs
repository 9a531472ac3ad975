use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use essence_runtime::{
    BalanceBoard, BalanceState, ConfigState, EssenceKind, MekState, OwnerId, Scalar, SlotState,
    SnapshotHeader, WorldSnapshot, MS_PER_DAY,
};

fn demo_config() -> ConfigState {
    ConfigState {
        base_rate_per_day: Scalar::from_f32(0.1),
        base_cap: Scalar::from_i64(10),
        swap_base_cost: Scalar::from_i64(1_000),
        swap_cost_increment: Scalar::from_i64(500),
        swap_cost_max: Scalar::from_i64(10_000),
        slot_gold_costs: [Scalar::from_i64(10_000); 4],
        slot_requirement_counts: [2, 3, 4, 5],
        slot_requirement_amounts: [Scalar::from_i64(5); 4],
    }
}

/// One snapshot with every owner carrying a slotted mek and a full set of
/// balance rows, so each board advances all twelve kinds.
fn demo_snapshot(owners: usize) -> WorldSnapshot {
    let mut snapshot = WorldSnapshot {
        header: SnapshotHeader {
            tick: 1,
            server_time_ms: 0,
            ..SnapshotHeader::default()
        },
        config: Some(demo_config()),
        ..WorldSnapshot::default()
    };
    let mut entity = 1u64;
    for index in 0..owners {
        let owner = OwnerId(index as u64 + 1);
        let mek = entity;
        entity += 1;
        snapshot.meks.push(MekState {
            entity: mek,
            owner,
            head: EssenceKind::Stone,
            body: EssenceKind::Disco,
            item: EssenceKind::Laser,
            slotted: Some(0),
        });
        snapshot.slots.push(SlotState {
            entity,
            owner,
            slot_index: 0,
            unlocked: true,
            occupant: Some(mek),
            gold_cost: Scalar::zero(),
            essence_requirements: Vec::new(),
        });
        entity += 1;
        for kind in EssenceKind::VARIANTS {
            snapshot.balances.push(BalanceState {
                entity,
                owner,
                kind,
                amount: Scalar::from_f32(1.0),
                last_updated_ms: 0,
            });
            entity += 1;
        }
    }
    snapshot.finalize()
}

fn seeded_boards(owners: usize) -> Vec<BalanceBoard> {
    let snapshot = demo_snapshot(owners);
    (1..=owners as u64)
        .map(|id| {
            let mut board = BalanceBoard::new(OwnerId(id));
            board.apply_snapshot(&snapshot);
            board
        })
        .collect()
}

fn bench_extrapolate(c: &mut Criterion) {
    let mut group = c.benchmark_group("extrapolate");

    for boards in [1usize, 8, 64] {
        group.bench_with_input(
            BenchmarkId::new("boards", boards),
            &boards,
            |b, &boards| {
                b.iter_batched(
                    || seeded_boards(boards),
                    |mut boards| {
                        for board in boards.iter_mut() {
                            board.advance(MS_PER_DAY);
                        }
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(extrapolate_benches, bench_extrapolate);
criterion_main!(extrapolate_benches);
