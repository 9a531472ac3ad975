use essence_proto::{scalar_one, scalar_zero, BuffState, ConfigState, EssenceKind, Scalar};
use thiserror::Error;

/// Resolved accrual parameters for one resource, valid until the next
/// snapshot or configuration change. Recomputed per render, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualParams {
    pub rate_per_day: Scalar,
    pub cap: Scalar,
}

impl AccrualParams {
    pub fn idle(cap: Scalar) -> Self {
        Self {
            rate_per_day: scalar_zero(),
            cap,
        }
    }
}

/// Configuration problems degrade the display; they are reported, not
/// retried, because retrying cannot fix bad configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no configuration feed delivered")]
    Missing,
    #[error("base accrual rate is negative")]
    NegativeRate,
    #[error("base cap must be positive")]
    NonPositiveCap,
}

/// Resolves `(rate_per_day, cap)` for `kind`.
///
/// `rate_per_day = base_rate × contribution_count × Π(rate_multiplier)` and
/// `cap = base_cap + Σ(cap_bonus)`, over the buffs whose scope covers `kind`.
/// `buffs` must already be scoped to the owning account. The fold visits
/// buffs sorted by wire id, so permuting the input slice cannot change the
/// fixed-point result.
pub fn resolve_params(
    config: Option<&ConfigState>,
    kind: EssenceKind,
    contribution_count: u32,
    buffs: &[BuffState],
) -> Result<AccrualParams, ConfigError> {
    let config = config.ok_or(ConfigError::Missing)?;
    if config.base_rate_per_day < scalar_zero() {
        return Err(ConfigError::NegativeRate);
    }
    if !config.base_cap.is_positive() {
        return Err(ConfigError::NonPositiveCap);
    }

    let mut in_scope: Vec<&BuffState> = buffs
        .iter()
        .filter(|buff| buff.scope.applies_to(kind))
        .collect();
    in_scope.sort_unstable_by_key(|buff| buff.entity);

    let mut rate = config.base_rate_per_day * Scalar::from_i64(contribution_count as i64);
    let mut cap = config.base_cap;
    for buff in in_scope {
        // Sub-identity values are bad data; treat them as no contribution,
        // mirroring the backend's `|| 1.0` defaulting.
        rate *= buff.rate_multiplier.max(scalar_one());
        cap += buff.cap_bonus.max(scalar_zero());
    }

    Ok(AccrualParams {
        rate_per_day: rate,
        cap,
    })
}
