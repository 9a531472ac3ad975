use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use bevy::prelude::{App, Entity};
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use essence_core::log_stream::{start_log_stream_server, LogStreamHandle};
use essence_core::network::{broadcast_latest, start_snapshot_server, SnapshotServer};
use essence_core::{
    apply_op, build_headless_app_from, checkpoint_all, run_cycle, scalar_from_f32, BuffScope,
    BuffSourceType, EssenceKind, OwnerId, SnapshotHistory, StoreCapabilities, StoreConfig,
    StoreMetrics, StoreOp, StoreTick, WorldClock,
};

fn main() {
    let (config, config_path) = match StoreConfig::load_from_env() {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("Refusing to start on a broken config: {err}");
            std::process::exit(1);
        }
    };

    // The log stream starts before the subscriber because its layer feeds
    // the subscriber.
    let log_handle = start_log_stream_server(config.log_stream_bind);
    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer());
    match &log_handle {
        Some(handle) => registry.with(handle.layer()).init(),
        None => registry.init(),
    }
    match &config_path {
        Some(path) => info!(
            target: "mek_forge::config",
            path = %path.display(),
            "config.loaded=file"
        ),
        None => info!(target: "mek_forge::config", "config.loaded=defaults"),
    }

    let mut app = build_headless_app_from(config.clone());

    let snapshot_server = start_snapshot_server(config.snapshot_bind);
    let (command_tx, command_rx) = unbounded::<Command>();
    spawn_command_listener(config.command_bind, command_tx.clone());
    let _watcher = config_path
        .as_ref()
        .and_then(|path| spawn_config_watcher(path, command_tx.clone()));

    // First cycle seeds the world and hands late joiners a baseline frame.
    complete_cycle(&mut app, snapshot_server.as_ref(), log_handle.as_ref());

    info!(
        target: "mek_forge::server",
        command_bind = %config.command_bind,
        snapshot_bind = %config.snapshot_bind,
        log_stream_bind = %config.log_stream_bind,
        "Mek Forge essence store ready"
    );

    let mut last_cycle = Instant::now();
    loop {
        match command_rx.recv_timeout(Duration::from_millis(config.cycle_interval_ms)) {
            Ok(command) => {
                advance_wall_clock(&mut app, &mut last_cycle);
                handle_command(&mut app, command, snapshot_server.as_ref(), log_handle.as_ref());
                while let Ok(queued) = command_rx.try_recv() {
                    handle_command(&mut app, queued, snapshot_server.as_ref(), log_handle.as_ref());
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                advance_wall_clock(&mut app, &mut last_cycle);
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
        complete_cycle(&mut app, snapshot_server.as_ref(), log_handle.as_ref());
    }
}

/// The store clock follows wall time between cycles. Demo clock jumps
/// applied through `clock` commands persist because this only ever adds
/// the elapsed interval.
fn advance_wall_clock(app: &mut App, last_cycle: &mut Instant) {
    let elapsed = last_cycle.elapsed();
    *last_cycle = Instant::now();
    app.world
        .resource_mut::<WorldClock>()
        .advance(elapsed.as_millis() as u64);
}

fn complete_cycle(
    app: &mut App,
    snapshot_server: Option<&SnapshotServer>,
    log_handle: Option<&LogStreamHandle>,
) {
    let tick = app.world.resource::<StoreTick>().0.wrapping_add(1);
    if let Some(handle) = log_handle {
        handle.set_tick(tick);
    }
    run_cycle(app);

    let streaming = app
        .world
        .resource::<StoreCapabilities>()
        .intersects(StoreCapabilities::STREAMING | StoreCapabilities::ALWAYS_ON);
    let history = app.world.resource::<SnapshotHistory>();
    if streaming {
        broadcast_latest(snapshot_server, history);
    }
    let hash_changed = history
        .last_change
        .map(|change| change.hash_changed)
        .unwrap_or(false);
    // Idle cycles stay quiet in the log too.
    if hash_changed {
        let metrics = app.world.resource::<StoreMetrics>();
        info!(
            target: "mek_forge::server",
            tick,
            players = metrics.players,
            active = metrics.active_players,
            balances = metrics.balances,
            capped = metrics.capped_balances,
            buffs = metrics.active_buffs,
            "cycle.completed"
        );
    }
}

#[derive(Debug)]
enum Command {
    Cycle(u32),
    Checkpoint {
        owner: Option<u64>,
    },
    Forge {
        owner: u64,
        head: EssenceKind,
        body: EssenceKind,
        item: EssenceKind,
    },
    Slot {
        owner: u64,
        slot_index: u8,
        mek: u64,
    },
    Unslot {
        owner: u64,
        slot_index: u8,
    },
    Swap {
        owner: u64,
        slot_index: u8,
        mek: u64,
    },
    Unlock {
        owner: u64,
        slot_index: u8,
    },
    Grant {
        owner: u64,
        kind: EssenceKind,
        amount: f32,
    },
    Spend {
        owner: u64,
        kind: EssenceKind,
        amount: f32,
    },
    Buff {
        owner: u64,
        name: String,
        multiplier: f32,
        cap_bonus: f32,
        ttl_ms: Option<u64>,
        kind: Option<EssenceKind>,
        source: BuffSourceType,
    },
    Unbuff {
        owner: u64,
        name: String,
    },
    Rate(f32),
    Cap(f32),
    Clock {
        ms: u64,
        absolute: bool,
    },
    ReloadConfig,
}

fn handle_command(
    app: &mut App,
    command: Command,
    snapshot_server: Option<&SnapshotServer>,
    log_handle: Option<&LogStreamHandle>,
) {
    let (verb, op) = match command {
        Command::Cycle(cycles) => {
            info!(target: "mek_forge::server", cycles, "command.applied=cycle");
            // The loop runs one more cycle after every command batch.
            for _ in 1..cycles {
                complete_cycle(app, snapshot_server, log_handle);
            }
            return;
        }
        Command::ReloadConfig => {
            handle_config_reload(app);
            return;
        }
        Command::Checkpoint { owner } => (
            "checkpoint",
            StoreOp::Checkpoint {
                owner: owner.map(OwnerId),
            },
        ),
        Command::Forge {
            owner,
            head,
            body,
            item,
        } => (
            "forge",
            StoreOp::ForgeMek {
                owner: OwnerId(owner),
                head,
                body,
                item,
            },
        ),
        Command::Slot {
            owner,
            slot_index,
            mek,
        } => (
            "slot",
            StoreOp::SlotMek {
                owner: OwnerId(owner),
                slot_index,
                mek: Entity::from_bits(mek),
            },
        ),
        Command::Unslot { owner, slot_index } => (
            "unslot",
            StoreOp::UnslotMek {
                owner: OwnerId(owner),
                slot_index,
            },
        ),
        Command::Swap {
            owner,
            slot_index,
            mek,
        } => (
            "swap",
            StoreOp::SwapMek {
                owner: OwnerId(owner),
                slot_index,
                mek: Entity::from_bits(mek),
            },
        ),
        Command::Unlock { owner, slot_index } => (
            "unlock",
            StoreOp::UnlockSlot {
                owner: OwnerId(owner),
                slot_index,
            },
        ),
        Command::Grant {
            owner,
            kind,
            amount,
        } => (
            "grant",
            StoreOp::Grant {
                owner: OwnerId(owner),
                kind,
                amount: scalar_from_f32(amount),
            },
        ),
        Command::Spend {
            owner,
            kind,
            amount,
        } => (
            "spend",
            StoreOp::Spend {
                owner: OwnerId(owner),
                kind,
                amount: scalar_from_f32(amount),
            },
        ),
        Command::Buff {
            owner,
            name,
            multiplier,
            cap_bonus,
            ttl_ms,
            kind,
            source,
        } => (
            "buff",
            StoreOp::GrantBuff {
                owner: OwnerId(owner),
                scope: match kind {
                    Some(kind) => BuffScope::Kind(kind),
                    None => BuffScope::AllKinds,
                },
                source_type: source,
                name,
                rate_multiplier: scalar_from_f32(multiplier),
                cap_bonus: scalar_from_f32(cap_bonus),
                ttl_ms,
            },
        ),
        Command::Unbuff { owner, name } => (
            "unbuff",
            StoreOp::RevokeBuff {
                owner: OwnerId(owner),
                name,
            },
        ),
        Command::Rate(rate) => ("rate", StoreOp::SetBaseRate(scalar_from_f32(rate))),
        Command::Cap(cap) => ("cap", StoreOp::SetBaseCap(scalar_from_f32(cap))),
        Command::Clock { ms, absolute } => {
            if absolute {
                ("clock", StoreOp::SetClock(ms))
            } else {
                ("clock", StoreOp::AdvanceClock(ms))
            }
        }
    };

    match apply_op(&mut app.world, op) {
        Ok(outcome) => info!(
            target: "mek_forge::server",
            ?outcome,
            "command.applied={}",
            verb
        ),
        Err(err) => warn!(
            target: "mek_forge::server",
            error = %err,
            "command.rejected={}",
            verb
        ),
    }
}

fn handle_config_reload(app: &mut App) {
    // Elapsed time settles at the rates that were in force while it passed.
    let now_ms = app.world.resource::<WorldClock>().now_ms;
    checkpoint_all(&mut app.world, now_ms);

    match StoreConfig::load() {
        Ok(config) => {
            // Bind addresses and the cycle cadence take effect on restart.
            app.world.insert_resource(config);
            info!(target: "mek_forge::config", "config.reloaded");
        }
        Err(err) => warn!(
            target: "mek_forge::config",
            error = %err,
            "config.reload_failed=keeping_previous"
        ),
    }
}

/// Watches the config file and queues a reload when it changes. The
/// returned watcher must stay alive for the watch to hold. A save can fire
/// several modify events; each queues one reload.
fn spawn_config_watcher(path: &Path, sender: Sender<Command>) -> Option<RecommendedWatcher> {
    let handler = move |result: Result<Event, notify::Error>| match result {
        Ok(event) => {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                let _ = sender.send(Command::ReloadConfig);
            }
        }
        Err(err) => warn!(target: "mek_forge::config", error = %err, "config.watch_error"),
    };
    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(
                target: "mek_forge::config",
                error = %err,
                "config.watch_unavailable=hot_reload_disabled"
            );
            return None;
        }
    };
    if let Err(err) = watcher.watch(path, RecursiveMode::NonRecursive) {
        warn!(
            target: "mek_forge::config",
            error = %err,
            "config.watch_unavailable=hot_reload_disabled"
        );
        return None;
    }
    info!(target: "mek_forge::config", path = %path.display(), "config.watching");
    Some(watcher)
}

fn spawn_command_listener(bind_addr: SocketAddr, sender: Sender<Command>) {
    let listener = TcpListener::bind(bind_addr).expect("command listener bind failed");
    listener
        .set_nonblocking(true)
        .expect("set_nonblocking failed");

    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("Command client connected: {}", addr);
                let sender = sender.clone();
                thread::spawn(move || handle_client(stream, sender));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                warn!("Error accepting command client: {}", err);
                thread::sleep(Duration::from_millis(200));
            }
        }
    });
}

fn handle_client(stream: TcpStream, sender: Sender<Command>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_command(trimmed) {
                    Some(command) => {
                        if sender.send(command).is_err() {
                            break;
                        }
                    }
                    None => warn!("Invalid command: {}", trimmed),
                }
            }
            Err(err) => {
                warn!("Command read error: {}", err);
                break;
            }
        }
    }
}

fn parse_command(input: &str) -> Option<Command> {
    let mut parts = input.split_whitespace();
    match parts.next()? {
        "cycle" => {
            let cycles = parts.next().unwrap_or("1").parse().ok()?;
            Some(Command::Cycle(cycles))
        }
        "checkpoint" => {
            let owner = match parts.next() {
                Some(raw) => Some(raw.parse().ok()?),
                None => None,
            };
            Some(Command::Checkpoint { owner })
        }
        "forge" => {
            let owner = parts.next()?.parse().ok()?;
            let head = parts.next()?.parse().ok()?;
            let body = parts.next()?.parse().ok()?;
            let item = parts.next()?.parse().ok()?;
            Some(Command::Forge {
                owner,
                head,
                body,
                item,
            })
        }
        "slot" => {
            let owner = parts.next()?.parse().ok()?;
            let slot_index = parts.next()?.parse().ok()?;
            let mek = parts.next()?.parse().ok()?;
            Some(Command::Slot {
                owner,
                slot_index,
                mek,
            })
        }
        "unslot" => {
            let owner = parts.next()?.parse().ok()?;
            let slot_index = parts.next()?.parse().ok()?;
            Some(Command::Unslot { owner, slot_index })
        }
        "swap" => {
            let owner = parts.next()?.parse().ok()?;
            let slot_index = parts.next()?.parse().ok()?;
            let mek = parts.next()?.parse().ok()?;
            Some(Command::Swap {
                owner,
                slot_index,
                mek,
            })
        }
        "unlock" => {
            let owner = parts.next()?.parse().ok()?;
            let slot_index = parts.next()?.parse().ok()?;
            Some(Command::Unlock { owner, slot_index })
        }
        "grant" => {
            let owner = parts.next()?.parse().ok()?;
            let kind = parts.next()?.parse().ok()?;
            let amount = parts.next()?.parse().ok()?;
            Some(Command::Grant {
                owner,
                kind,
                amount,
            })
        }
        "spend" => {
            let owner = parts.next()?.parse().ok()?;
            let kind = parts.next()?.parse().ok()?;
            let amount = parts.next()?.parse().ok()?;
            Some(Command::Spend {
                owner,
                kind,
                amount,
            })
        }
        "buff" => {
            let owner = parts.next()?.parse().ok()?;
            let name = parts.next()?.to_string();
            let multiplier = parts.next()?.parse().ok()?;
            let cap_bonus = parts.next().unwrap_or("0").parse().ok()?;
            let ttl_ms: u64 = parts.next().unwrap_or("0").parse().ok()?;
            let kind = match parts.next() {
                Some(raw) => Some(raw.parse().ok()?),
                None => None,
            };
            let source = match parts.next() {
                Some(raw) => raw.parse().ok()?,
                None => BuffSourceType::Event,
            };
            Some(Command::Buff {
                owner,
                name,
                multiplier,
                cap_bonus,
                ttl_ms: (ttl_ms > 0).then_some(ttl_ms),
                kind,
                source,
            })
        }
        "unbuff" => {
            let owner = parts.next()?.parse().ok()?;
            let name = parts.next()?.to_string();
            Some(Command::Unbuff { owner, name })
        }
        "rate" => {
            let rate = parts.next()?.parse().ok()?;
            Some(Command::Rate(rate))
        }
        "cap" => {
            let cap = parts.next()?.parse().ok()?;
            Some(Command::Cap(cap))
        }
        "clock" => {
            let raw = parts.next()?;
            match raw.strip_prefix('+') {
                Some(stripped) => Some(Command::Clock {
                    ms: stripped.parse().ok()?,
                    absolute: false,
                }),
                None => Some(Command::Clock {
                    ms: raw.parse().ok()?,
                    absolute: true,
                }),
            }
        }
        "reload" => Some(Command::ReloadConfig),
        _ => None,
    }
}
