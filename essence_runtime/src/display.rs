use std::fmt;

use essence_proto::{accrue_over_ms, Scalar};

use crate::resolver::AccrualParams;

/// Baseline tracker plus extrapolation engine for one resource in one view.
///
/// Holds the last authoritative `(amount, timestamp)` pair and the value
/// currently shown. Views own their state exclusively; two views of the same
/// resource each carry their own `DisplayState` and may transiently disagree
/// by a sub-tick amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayState {
    baseline_amount: Scalar,
    baseline_time_ms: u64,
    displayed: Scalar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayPhase {
    /// Rate is zero or negative; nothing to animate.
    Idle,
    /// Actively counting up.
    Running,
    /// Pinned at the cap until a baseline or cap change frees it.
    Capped,
}

impl DisplayState {
    pub fn from_snapshot(amount: Scalar, timestamp_ms: u64, params: AccrualParams) -> Self {
        Self {
            baseline_amount: amount,
            baseline_time_ms: timestamp_ms,
            displayed: amount.min(params.cap),
        }
    }

    /// Replaces the baseline unconditionally. The newest delivered value is
    /// authoritative even when its timestamp is not newer than the stored
    /// one; no reordering or reconciliation happens here. The shown value
    /// snaps to `min(amount, cap)` in the same step, downward jumps included.
    pub fn on_snapshot(&mut self, amount: Scalar, timestamp_ms: u64, params: AccrualParams) {
        self.baseline_amount = amount;
        self.baseline_time_ms = timestamp_ms;
        self.displayed = amount.min(params.cap);
    }

    /// One extrapolation tick at clock `now_ms`.
    ///
    /// Negative elapsed time (clock skew, stale baseline) clamps to zero.
    /// The shown value never decreases between baselines; the only downward
    /// path is the cap clamp when a cap buff expired.
    pub fn advance(&mut self, now_ms: u64, params: AccrualParams) -> Scalar {
        let elapsed_ms = now_ms.saturating_sub(self.baseline_time_ms);
        let linear = self.baseline_amount + accrue_over_ms(params.rate_per_day, elapsed_ms);
        self.displayed = self.displayed.max(linear).min(params.cap);
        self.displayed
    }

    pub fn phase(&self, params: AccrualParams) -> DisplayPhase {
        if !params.rate_per_day.is_positive() {
            DisplayPhase::Idle
        } else if self.displayed >= params.cap {
            DisplayPhase::Capped
        } else {
            DisplayPhase::Running
        }
    }

    pub fn displayed(&self) -> Scalar {
        self.displayed
    }

    pub fn baseline_amount(&self) -> Scalar {
        self.baseline_amount
    }

    pub fn baseline_time_ms(&self) -> u64 {
        self.baseline_time_ms
    }
}

/// What a balance cell renders as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCell {
    /// No snapshot delivered yet.
    Loading,
    /// Configuration feed missing or invalid.
    Degraded,
    Value(Scalar),
}

impl fmt::Display for DisplayCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayCell::Loading => f.write_str("..."),
            DisplayCell::Degraded => f.write_str("--"),
            DisplayCell::Value(amount) => write!(f, "{amount}"),
        }
    }
}
