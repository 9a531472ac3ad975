use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use essence_core::{build_headless_app_from, run_cycle, StoreConfig, WorldClock, MS_PER_DAY};

fn bench_checkpoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkpoint");

    for players in [4u32, 16, 64, 256] {
        group.bench_with_input(
            BenchmarkId::new("players", players),
            &players,
            |b, &players| {
                b.iter_batched(
                    || {
                        let config = StoreConfig {
                            demo_players: players,
                            ..StoreConfig::default()
                        };
                        let mut app = build_headless_app_from(config);
                        // Seed the world, then make every player due.
                        run_cycle(&mut app);
                        app.world.resource_mut::<WorldClock>().set(MS_PER_DAY);
                        app
                    },
                    |mut app| {
                        run_cycle(&mut app);
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(checkpoint_benches, bench_checkpoint);
criterion_main!(checkpoint_benches);
