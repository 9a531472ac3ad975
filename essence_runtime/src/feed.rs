use std::collections::VecDeque;

use essence_proto::{CodecError, WorldSnapshot};
use thiserror::Error;

use crate::board::BalanceBoard;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("snapshot source disconnected")]
    Disconnected,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Push-based subscription surface: subscribe by constructing a source,
/// receive frames over time via `try_next`, unsubscribe by dropping it.
/// Transports stay behind this seam. Tests and replays drive it with a
/// scripted frame list; a live transport maps its decode failures into
/// `Codec`.
pub trait SnapshotSource {
    /// Next delivered frame, `None` when nothing new has arrived.
    fn try_next(&mut self) -> Result<Option<WorldSnapshot>, FeedError>;
}

/// Replays a pre-recorded frame sequence in delivery order.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    frames: VecDeque<WorldSnapshot>,
    disconnect_when_drained: bool,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = WorldSnapshot>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            disconnect_when_drained: false,
        }
    }

    /// After the last frame, report `Disconnected` instead of quiescence.
    pub fn disconnect_when_drained(mut self) -> Self {
        self.disconnect_when_drained = true;
        self
    }

    pub fn push(&mut self, frame: WorldSnapshot) {
        self.frames.push_back(frame);
    }
}

impl SnapshotSource for ScriptedSource {
    fn try_next(&mut self) -> Result<Option<WorldSnapshot>, FeedError> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None if self.disconnect_when_drained => Err(FeedError::Disconnected),
            None => Ok(None),
        }
    }
}

/// Drains every pending frame into the board, in delivery order. Returns
/// how many frames were applied.
pub fn drain_into(
    source: &mut dyn SnapshotSource,
    board: &mut BalanceBoard,
) -> Result<u32, FeedError> {
    let mut applied = 0;
    while let Some(frame) = source.try_next()? {
        board.apply_snapshot(&frame);
        applied += 1;
    }
    Ok(applied)
}
