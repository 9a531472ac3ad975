use std::{
    env, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use bevy::prelude::*;
use bitflags::bitflags;
use serde::Deserialize;
use thiserror::Error;

use essence_proto::{scalar_from_f32, ConfigState, Scalar, MS_PER_DAY};

/// Environment variable naming the JSON config file to load at startup and
/// to watch for hot reloads.
pub const CONFIG_PATH_ENV: &str = "ESSENCE_CONFIG_PATH";

/// Global configuration for the headless essence store.
#[derive(Resource, Debug, Clone)]
pub struct StoreConfig {
    pub base_rate_per_day: Scalar,
    pub base_cap: Scalar,
    pub swap_base_cost: Scalar,
    pub swap_cost_increment: Scalar,
    pub swap_cost_max: Scalar,
    pub slot_gold_costs: [Scalar; 4],
    pub slot_requirement_counts: [u8; 4],
    pub slot_requirement_amounts: [Scalar; 4],
    pub world_seed: u64,
    pub demo_players: u32,
    pub meks_per_player: u32,
    pub checkpoint_interval_ms: u64,
    pub cycle_interval_ms: u64,
    pub snapshot_bind: SocketAddr,
    pub command_bind: SocketAddr,
    pub log_stream_bind: SocketAddr,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_rate_per_day: scalar_from_f32(0.1),
            base_cap: scalar_from_f32(10.0),
            swap_base_cost: scalar_from_f32(1_000.0),
            swap_cost_increment: scalar_from_f32(500.0),
            swap_cost_max: scalar_from_f32(10_000.0),
            slot_gold_costs: [
                scalar_from_f32(10_000.0),
                scalar_from_f32(50_000.0),
                scalar_from_f32(150_000.0),
                scalar_from_f32(500_000.0),
            ],
            slot_requirement_counts: [2, 3, 4, 5],
            slot_requirement_amounts: [
                scalar_from_f32(5.0),
                scalar_from_f32(7.0),
                scalar_from_f32(9.0),
                scalar_from_f32(10.0),
            ],
            world_seed: 123_456_789,
            demo_players: 3,
            meks_per_player: 4,
            checkpoint_interval_ms: MS_PER_DAY,
            cycle_interval_ms: 250,
            snapshot_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42000),
            command_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42001),
            log_stream_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42002),
        }
    }
}

impl StoreConfig {
    /// Loads from the file named by [`CONFIG_PATH_ENV`], falling back to
    /// defaults when the variable is unset. A present but unreadable or
    /// malformed file is an error; the server refuses to start on a config
    /// it cannot honor.
    pub fn load() -> Result<Self, StoreConfigError> {
        Self::load_from_env().map(|(config, _)| config)
    }

    /// [`StoreConfig::load`], additionally reporting the path the config
    /// came from so callers can watch it for edits.
    pub fn load_from_env() -> Result<(Self, Option<PathBuf>), StoreConfigError> {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                let path = PathBuf::from(path);
                let config = Self::from_file(&path)?;
                Ok((config, Some(path)))
            }
            Err(_) => Ok((Self::default(), None)),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<StoreConfigFile>(json).map(StoreConfig::from)
    }

    pub fn from_file(path: &Path) -> Result<Self, StoreConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| StoreConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&contents)?;
        Ok(config)
    }

    /// Economy parameters as carried in every snapshot, so clients resolve
    /// rates and caps from the same numbers the store accrues with.
    pub fn wire_state(&self) -> ConfigState {
        ConfigState {
            base_rate_per_day: self.base_rate_per_day,
            base_cap: self.base_cap,
            swap_base_cost: self.swap_base_cost,
            swap_cost_increment: self.swap_cost_increment,
            swap_cost_max: self.swap_cost_max,
            slot_gold_costs: self.slot_gold_costs,
            slot_requirement_counts: self.slot_requirement_counts,
            slot_requirement_amounts: self.slot_requirement_amounts,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreConfigError {
    #[error("failed to parse store config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read store config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// On-disk shape of [`StoreConfig`]: human units, every field optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct StoreConfigFile {
    base_rate_per_day: f32,
    base_cap: f32,
    swap_base_cost: f32,
    swap_cost_increment: f32,
    swap_cost_max: f32,
    slot_gold_costs: [f32; 4],
    slot_requirement_counts: [u8; 4],
    slot_requirement_amounts: [f32; 4],
    world_seed: u64,
    demo_players: u32,
    meks_per_player: u32,
    checkpoint_interval_ms: u64,
    cycle_interval_ms: u64,
    snapshot_bind: SocketAddr,
    command_bind: SocketAddr,
    log_stream_bind: SocketAddr,
}

impl Default for StoreConfigFile {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for StoreConfigFile {
    fn from(config: &StoreConfig) -> Self {
        Self {
            base_rate_per_day: config.base_rate_per_day.to_f32(),
            base_cap: config.base_cap.to_f32(),
            swap_base_cost: config.swap_base_cost.to_f32(),
            swap_cost_increment: config.swap_cost_increment.to_f32(),
            swap_cost_max: config.swap_cost_max.to_f32(),
            slot_gold_costs: config.slot_gold_costs.map(|cost| cost.to_f32()),
            slot_requirement_counts: config.slot_requirement_counts,
            slot_requirement_amounts: config.slot_requirement_amounts.map(|amount| amount.to_f32()),
            world_seed: config.world_seed,
            demo_players: config.demo_players,
            meks_per_player: config.meks_per_player,
            checkpoint_interval_ms: config.checkpoint_interval_ms,
            cycle_interval_ms: config.cycle_interval_ms,
            snapshot_bind: config.snapshot_bind,
            command_bind: config.command_bind,
            log_stream_bind: config.log_stream_bind,
        }
    }
}

impl From<StoreConfigFile> for StoreConfig {
    fn from(file: StoreConfigFile) -> Self {
        Self {
            base_rate_per_day: scalar_from_f32(file.base_rate_per_day),
            base_cap: scalar_from_f32(file.base_cap),
            swap_base_cost: scalar_from_f32(file.swap_base_cost),
            swap_cost_increment: scalar_from_f32(file.swap_cost_increment),
            swap_cost_max: scalar_from_f32(file.swap_cost_max),
            slot_gold_costs: file.slot_gold_costs.map(scalar_from_f32),
            slot_requirement_counts: file.slot_requirement_counts,
            slot_requirement_amounts: file.slot_requirement_amounts.map(scalar_from_f32),
            world_seed: file.world_seed,
            demo_players: file.demo_players,
            meks_per_player: file.meks_per_player,
            checkpoint_interval_ms: file.checkpoint_interval_ms,
            cycle_interval_ms: file.cycle_interval_ms,
            snapshot_bind: file.snapshot_bind,
            command_bind: file.command_bind,
            log_stream_bind: file.log_stream_bind,
        }
    }
}

/// Authoritative store clock in milliseconds. Advanced by the server loop
/// and by clock ops; systems never read the wall clock.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldClock {
    pub now_ms: u64,
}

impl WorldClock {
    pub fn advance(&mut self, delta_ms: u64) {
        self.now_ms = self.now_ms.saturating_add(delta_ms);
    }

    pub fn set(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }
}

/// Tracks total store cycles elapsed.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTick(pub u64);

bitflags! {
    /// Feature switches for the update chain. `ALWAYS_ON` bypasses the
    /// per-system flags.
    #[derive(Resource, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StoreCapabilities: u32 {
        const ACCRUAL = 1 << 0;
        const BUFF_EXPIRY = 1 << 1;
        const STREAMING = 1 << 2;
        const ALWAYS_ON = 1 << 3;
    }
}

impl Default for StoreCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

/// Run condition for systems gated behind `required`.
pub fn capability_enabled(
    required: StoreCapabilities,
) -> impl FnMut(Res<StoreCapabilities>) -> bool + Clone {
    move |caps: Res<StoreCapabilities>| caps.intersects(required | StoreCapabilities::ALWAYS_ON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use essence_proto::Scalar;

    #[test]
    fn defaults_carry_the_documented_economy() {
        let config = StoreConfig::default();
        assert_eq!(config.base_rate_per_day, Scalar::from_raw(100_000));
        assert_eq!(config.base_cap, Scalar::from_i64(10));
        assert_eq!(config.swap_base_cost, Scalar::from_i64(1_000));
        assert_eq!(config.swap_cost_max, Scalar::from_i64(10_000));
        assert_eq!(config.slot_requirement_counts, [2, 3, 4, 5]);
        assert_eq!(config.checkpoint_interval_ms, MS_PER_DAY);
    }

    #[test]
    fn partial_json_overrides_keep_remaining_defaults() {
        let config = StoreConfig::from_json_str(r#"{"base_cap": 25.0, "demo_players": 1}"#)
            .expect("partial config should parse");
        assert_eq!(config.base_cap, Scalar::from_i64(25));
        assert_eq!(config.demo_players, 1);
        assert_eq!(config.base_rate_per_day, Scalar::from_raw(100_000));
        assert_eq!(config.meks_per_player, StoreConfig::default().meks_per_player);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(StoreConfig::from_json_str(r#"{"base_cap": "ten"}"#).is_err());
        assert!(StoreConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn file_units_round_trip_exactly() {
        let original = StoreConfig::default();
        let through_file = StoreConfig::from(StoreConfigFile::from(&original));
        assert_eq!(through_file.base_rate_per_day, original.base_rate_per_day);
        assert_eq!(through_file.base_cap, original.base_cap);
        assert_eq!(through_file.slot_gold_costs, original.slot_gold_costs);
        assert_eq!(
            through_file.slot_requirement_amounts,
            original.slot_requirement_amounts
        );
    }

    #[test]
    fn wire_state_mirrors_resource_fields() {
        let config = StoreConfig::default();
        let wire = config.wire_state();
        assert_eq!(wire.base_rate_per_day, config.base_rate_per_day);
        assert_eq!(wire.base_cap, config.base_cap);
        assert_eq!(wire.slot_gold_costs, config.slot_gold_costs);
        assert_eq!(wire.slot_requirement_counts, config.slot_requirement_counts);
    }
}
