use std::collections::HashMap;

use essence_proto::{
    BuffState, ConfigState, EssenceKind, OwnerId, Scalar, WorldSnapshot,
};

use crate::attribution::AttributionPanel;
use crate::display::{DisplayCell, DisplayPhase, DisplayState};
use crate::resolver::{resolve_params, AccrualParams, ConfigError};

/// One view's balance state for one account: demultiplexes delivered
/// snapshots into per-kind baselines and extrapolates them on demand.
///
/// The account is injected at construction; the board never assumes a
/// default identity. Each view owns its board exclusively: a list and a
/// detail panel over the same account run two boards that may transiently
/// disagree by a sub-tick amount.
///
/// A snapshot rebaselines a row only when the delivered
/// `(amount, last_updated_ms)` pair differs from the stored baseline pair.
/// That reproduces the change-driven subscription: buff or config updates
/// arriving without a balance change never snap the animation back, while
/// any changed pair, older timestamps included, replaces the baseline
/// unconditionally (last delivered wins).
pub struct BalanceBoard {
    owner: OwnerId,
    rows: HashMap<EssenceKind, DisplayState>,
    params: HashMap<EssenceKind, Result<AccrualParams, ConfigError>>,
    buffs: Vec<BuffState>,
    counts: HashMap<EssenceKind, u32>,
    config: Option<ConfigState>,
    has_snapshot: bool,
    tick: u64,
    server_time_ms: u64,
}

/// Row view handed to rendering code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardRow {
    pub kind: EssenceKind,
    pub cell: DisplayCell,
    pub params: Option<AccrualParams>,
    pub phase: Option<DisplayPhase>,
    pub contribution_count: u32,
}

impl BalanceBoard {
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            rows: HashMap::new(),
            params: HashMap::new(),
            buffs: Vec::new(),
            counts: HashMap::new(),
            config: None,
            has_snapshot: false,
            tick: 0,
            server_time_ms: 0,
        }
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn is_loading(&self) -> bool {
        !self.has_snapshot
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn server_time_ms(&self) -> u64 {
        self.server_time_ms
    }

    /// Present when the configuration feed is missing or rejected; every
    /// balance cell renders degraded until it recovers.
    pub fn config_error(&self) -> Option<ConfigError> {
        self.params.values().find_map(|result| result.err())
    }

    pub fn apply_snapshot(&mut self, snapshot: &WorldSnapshot) {
        self.has_snapshot = true;
        self.tick = snapshot.header.tick;
        self.server_time_ms = snapshot.header.server_time_ms;
        self.config = snapshot.config.clone();

        self.buffs = snapshot
            .buffs
            .iter()
            .filter(|buff| buff.owner == self.owner)
            .cloned()
            .collect();
        self.buffs.sort_unstable_by_key(|buff| buff.entity);

        self.counts = contribution_counts(self.owner, snapshot);
        self.rebuild_params();

        let mut delivered: Vec<EssenceKind> = Vec::new();
        for state in snapshot
            .balances
            .iter()
            .filter(|balance| balance.owner == self.owner)
        {
            delivered.push(state.kind);
            let params = self.params_or_unclamped(state.kind, state.amount);
            match self.rows.get_mut(&state.kind) {
                Some(row) => {
                    let unchanged = row.baseline_amount() == state.amount
                        && row.baseline_time_ms() == state.last_updated_ms;
                    if !unchanged {
                        row.on_snapshot(state.amount, state.last_updated_ms, params);
                    }
                }
                None => {
                    self.rows.insert(
                        state.kind,
                        DisplayState::from_snapshot(state.amount, state.last_updated_ms, params),
                    );
                }
            }
        }
        self.rows.retain(|kind, _| delivered.contains(kind));
    }

    /// One extrapolation pass over every row. Rows without usable
    /// configuration are left untouched (they render degraded anyway).
    pub fn advance(&mut self, now_ms: u64) {
        for (kind, row) in self.rows.iter_mut() {
            if let Some(Ok(params)) = self.params.get(kind) {
                row.advance(now_ms, *params);
            }
        }
    }

    /// True while at least one row still has headroom and a positive rate.
    /// Views use this to stop scheduling ticks once everything is idle or
    /// capped, and to resume after a fresh baseline re-enables accrual.
    pub fn any_running(&self) -> bool {
        self.rows.iter().any(|(kind, row)| {
            matches!(
                self.params.get(kind),
                Some(Ok(params)) if row.phase(*params) == DisplayPhase::Running
            )
        })
    }

    pub fn cell(&self, kind: EssenceKind) -> DisplayCell {
        if !self.has_snapshot {
            return DisplayCell::Loading;
        }
        match self.params.get(&kind) {
            Some(Err(_)) | None => DisplayCell::Degraded,
            Some(Ok(_)) => match self.rows.get(&kind) {
                Some(row) => DisplayCell::Value(row.displayed()),
                None => DisplayCell::Value(Scalar::zero()),
            },
        }
    }

    pub fn contribution_count(&self, kind: EssenceKind) -> u32 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// All catalog rows in display order.
    pub fn rows(&self) -> Vec<BoardRow> {
        EssenceKind::VARIANTS
            .iter()
            .map(|kind| {
                let params = match self.params.get(kind) {
                    Some(Ok(params)) => Some(*params),
                    _ => None,
                };
                let phase = match (params, self.rows.get(kind)) {
                    (Some(params), Some(row)) => Some(row.phase(params)),
                    _ => None,
                };
                BoardRow {
                    kind: *kind,
                    cell: self.cell(*kind),
                    params,
                    phase,
                    contribution_count: self.contribution_count(*kind),
                }
            })
            .collect()
    }

    pub fn attribution(&self, kind: EssenceKind) -> AttributionPanel {
        AttributionPanel::build(
            kind,
            self.config.as_ref(),
            self.contribution_count(kind),
            &self.buffs,
        )
    }

    fn rebuild_params(&mut self) {
        self.params.clear();
        for kind in EssenceKind::VARIANTS {
            let count = self.counts.get(&kind).copied().unwrap_or(0);
            self.params.insert(
                kind,
                resolve_params(self.config.as_ref(), kind, count, &self.buffs),
            );
        }
    }

    fn params_or_unclamped(&self, kind: EssenceKind, amount: Scalar) -> AccrualParams {
        match self.params.get(&kind) {
            Some(Ok(params)) => *params,
            // Degraded rows still track their baseline so the display can
            // recover without waiting for the next balance change.
            _ => AccrualParams::idle(amount),
        }
    }
}

/// Slotted mek variation hits per kind: head, body and item each count once.
pub fn contribution_counts(
    owner: OwnerId,
    snapshot: &WorldSnapshot,
) -> HashMap<EssenceKind, u32> {
    let mut counts = HashMap::new();
    for slot in &snapshot.slots {
        if slot.owner != owner || !slot.unlocked {
            continue;
        }
        let Some(occupant) = slot.occupant else {
            continue;
        };
        let Some(mek) = snapshot.meks.iter().find(|mek| mek.entity == occupant) else {
            continue;
        };
        for kind in [mek.head, mek.body, mek.item] {
            *counts.entry(kind).or_insert(0) += 1;
        }
    }
    counts
}
