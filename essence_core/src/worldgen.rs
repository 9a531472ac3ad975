use bevy::prelude::*;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing::info;

use essence_proto::{EssenceKind, OwnerId, Scalar};

use crate::{
    components::{EssenceSlot, EssenceTracking, MekUnit, PlayerAccount},
    resources::StoreConfig,
    slots::requirements_for_owner,
};

/// Seeds the demo roster: a handful of players, each with a hangar of random
/// meks and the first mek already slotted so accrual is live from tick one.
///
/// Everything flows from `world_seed`, so two servers started on the same
/// config produce the same roster.
pub fn spawn_initial_world(mut commands: Commands, config: Res<StoreConfig>) {
    let mut rng = SmallRng::seed_from_u64(config.world_seed);
    for id in 1..=config.demo_players {
        let owner = OwnerId(id as u64);
        let mut first_mek = None;
        for mek_index in 0..config.meks_per_player {
            let mek = commands
                .spawn(MekUnit {
                    owner,
                    head: random_kind(&mut rng),
                    body: random_kind(&mut rng),
                    item: random_kind(&mut rng),
                    slotted: (mek_index == 0).then_some(0),
                })
                .id();
            if mek_index == 0 {
                first_mek = Some(mek);
            }
        }

        commands.spawn((
            PlayerAccount {
                owner,
                display_name: format!("pilot-{id:02}"),
                gold: Scalar::from_i64(100_000),
            },
            EssenceTracking {
                active: first_mek.is_some(),
                ..Default::default()
            },
        ));

        commands.spawn(EssenceSlot {
            owner,
            index: 0,
            unlocked: true,
            occupant: first_mek,
            requirement: None,
        });
        for (offset, requirement) in requirements_for_owner(owner, &config).into_iter().enumerate()
        {
            commands.spawn(EssenceSlot {
                owner,
                index: offset as u8 + 1,
                unlocked: false,
                occupant: None,
                requirement: Some(requirement),
            });
        }
    }
    info!(
        target: "mek_forge::server",
        players = config.demo_players,
        meks_per_player = config.meks_per_player,
        seed = config.world_seed,
        "worldgen.seeded"
    );
}

fn random_kind(rng: &mut SmallRng) -> EssenceKind {
    EssenceKind::VARIANTS[rng.gen_range(0..EssenceKind::VARIANTS.len())]
}
