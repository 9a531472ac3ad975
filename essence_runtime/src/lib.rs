//! Client-side display runtime for Mek Forge.
//!
//! This crate re-exports the wire contracts from `essence_proto` and layers
//! the pieces a view needs on top of them: rate/cap resolution, baseline
//! tracking with extrapolation, per-owner balance boards and buff
//! attribution. Nothing here depends on the Bevy runtime in `essence_core`,
//! so thin clients can link it without pulling in the store.

pub mod attribution;
pub mod board;
pub mod display;
pub mod feed;
pub mod resolver;

// Re-export the wire types so clients depend on one crate.
pub use essence_proto::*;

pub use attribution::{format_multiplier, AttributionPanel, AttributionRow};
pub use board::{contribution_counts, BalanceBoard, BoardRow};
pub use display::{DisplayCell, DisplayPhase, DisplayState};
pub use feed::{drain_into, FeedError, ScriptedSource, SnapshotSource};
pub use resolver::{resolve_params, AccrualParams, ConfigError};
