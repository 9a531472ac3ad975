use essence_proto::{scalar_one, BuffState, ConfigState, EssenceKind, Scalar};

use crate::resolver::{resolve_params, AccrualParams, ConfigError};

/// Read-only decomposition of one resource's rate/cap boosts, row per buff.
/// The totals come from the resolver; the panel formats and never mutates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionPanel {
    pub kind: EssenceKind,
    pub base_rate: Scalar,
    pub base_cap: Scalar,
    pub contribution_count: u32,
    pub rows: Vec<AttributionRow>,
    pub totals: Result<AccrualParams, ConfigError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionRow {
    pub source: &'static str,
    pub name: String,
    pub description: String,
    /// Own multiplier, e.g. `×1.20 (+20.0%)`; `-` when the buff leaves the
    /// rate alone.
    pub rate_text: String,
    /// Own cap bonus, e.g. `+5.000000`; `-` when the buff leaves the cap
    /// alone.
    pub cap_text: String,
}

impl AttributionPanel {
    /// `buffs` must already be scoped to the owning account; the panel
    /// applies the kind filter itself so each row matches what the resolver
    /// folded in.
    pub fn build(
        kind: EssenceKind,
        config: Option<&ConfigState>,
        contribution_count: u32,
        buffs: &[BuffState],
    ) -> Self {
        let mut in_scope: Vec<&BuffState> = buffs
            .iter()
            .filter(|buff| buff.scope.applies_to(kind))
            .collect();
        in_scope.sort_unstable_by_key(|buff| buff.entity);

        let rows = in_scope
            .iter()
            .map(|buff| AttributionRow {
                source: buff.source_type.label(),
                name: buff.name.clone(),
                description: buff.description.clone(),
                rate_text: if buff.rate_multiplier > scalar_one() {
                    format_multiplier(buff.rate_multiplier)
                } else {
                    "-".to_string()
                },
                cap_text: if buff.cap_bonus.is_positive() {
                    format!("+{}", buff.cap_bonus)
                } else {
                    "-".to_string()
                },
            })
            .collect();

        let (base_rate, base_cap) = match config {
            Some(config) => (config.base_rate_per_day, config.base_cap),
            None => (Scalar::zero(), Scalar::zero()),
        };

        Self {
            kind,
            base_rate,
            base_cap,
            contribution_count,
            rows,
            totals: resolve_params(config, kind, contribution_count, buffs),
        }
    }

    pub fn has_buffs(&self) -> bool {
        !self.rows.is_empty()
    }
}

/// `×1.20 (+20.0%)` for a 1.2 multiplier. Rendered from raw units so the
/// text is exact.
pub fn format_multiplier(multiplier: Scalar) -> String {
    let hundredths = multiplier.raw() / 10_000;
    let tenths_of_percent = (multiplier.raw() - Scalar::SCALE) / 1_000;
    let sign = if tenths_of_percent < 0 { "-" } else { "+" };
    let magnitude = tenths_of_percent.unsigned_abs();
    format!(
        "×{}.{:02} ({}{}.{}%)",
        hundredths / 100,
        hundredths % 100,
        sign,
        magnitude / 10,
        magnitude % 10
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use essence_proto::{BuffScope, BuffSourceType, OwnerId};
    use insta::assert_snapshot;

    fn config() -> ConfigState {
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

    fn buff(
        entity: u64,
        scope: BuffScope,
        source_type: BuffSourceType,
        name: &str,
        multiplier: f32,
        cap_bonus: i64,
    ) -> BuffState {
        BuffState {
            entity,
            owner: OwnerId(1),
            scope,
            source_type,
            name: name.to_string(),
            description: format!("{name} description"),
            rate_multiplier: Scalar::from_f32(multiplier),
            cap_bonus: Scalar::from_i64(cap_bonus),
            expires_at_ms: 0,
        }
    }

    #[test]
    fn multiplier_formatting_is_exact() {
        assert_snapshot!(format_multiplier(Scalar::from_f32(1.2)), @"×1.20 (+20.0%)");
        assert_snapshot!(format_multiplier(Scalar::from_f32(1.5)), @"×1.50 (+50.0%)");
        assert_snapshot!(format_multiplier(Scalar::from_f32(2.05)), @"×2.05 (+105.0%)");
    }

    #[test]
    fn panel_rows_match_scope_and_order() {
        let buffs = vec![
            buff(
                3,
                BuffScope::Kind(EssenceKind::Disco),
                BuffSourceType::Equipment,
                "mirror plating",
                1.5,
                0,
            ),
            buff(
                1,
                BuffScope::AllKinds,
                BuffSourceType::Achievement,
                "collector",
                1.2,
                5,
            ),
            buff(
                2,
                BuffScope::Kind(EssenceKind::Stone),
                BuffSourceType::Event,
                "quarry week",
                2.0,
                0,
            ),
        ];
        let panel = AttributionPanel::build(EssenceKind::Disco, Some(&config()), 1, &buffs);

        assert_eq!(panel.rows.len(), 2);
        assert_eq!(panel.rows[0].name, "collector");
        assert_eq!(panel.rows[0].source, "Achievement");
        assert_eq!(panel.rows[0].cap_text, "+5.000000");
        assert_eq!(panel.rows[1].name, "mirror plating");
        assert_eq!(panel.rows[1].cap_text, "-");
    }

    #[test]
    fn totals_agree_with_resolver() {
        let buffs = vec![
            buff(1, BuffScope::AllKinds, BuffSourceType::Event, "a", 1.2, 0),
            buff(2, BuffScope::AllKinds, BuffSourceType::Event, "b", 1.5, 4),
        ];
        let panel = AttributionPanel::build(EssenceKind::Disco, Some(&config()), 1, &buffs);
        let direct = resolve_params(Some(&config()), EssenceKind::Disco, 1, &buffs);
        assert_eq!(panel.totals, direct);
        assert_eq!(
            panel.totals.unwrap().rate_per_day,
            Scalar::from_f32(0.18)
        );
    }

    #[test]
    fn empty_panel_reports_no_buffs() {
        let panel = AttributionPanel::build(EssenceKind::Moss, Some(&config()), 0, &[]);
        assert!(!panel.has_buffs());
        assert!(panel.totals.is_ok());
    }

    #[test]
    fn missing_config_panel_degrades_totals_only() {
        let buffs = vec![buff(1, BuffScope::AllKinds, BuffSourceType::Event, "a", 1.2, 0)];
        let panel = AttributionPanel::build(EssenceKind::Moss, None, 1, &buffs);
        assert_eq!(panel.rows.len(), 1);
        assert_eq!(panel.totals, Err(ConfigError::Missing));
    }
}
