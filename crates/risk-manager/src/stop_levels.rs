//! Initial stop-loss and take-profit levels for a new entry.

use leverage_core::config::{StopLossConfig, StopSelection, TakeProfitMode};
use leverage_core::types::{MarketRegime, PartialExit, Side};
use leverage_core::RiskProfile;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which distance the stop was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSource {
    Percentage,
    Atr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLevels {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Stop distance from entry, in percent, after clamping.
    pub stop_distance_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub source: StopSource,
    /// Ladder sorted by threshold; empty when partial take-profit is disabled.
    pub partial_exits: Vec<PartialExit>,
}

/// Stateless stop/target calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopLevelCalculator;

impl StopLevelCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn levels(
        &self,
        entry: Decimal,
        side: Side,
        atr: Option<Decimal>,
        regime: MarketRegime,
        profile: &RiskProfile,
    ) -> StopLevels {
        let stops = &profile.stops;
        let atr = atr.filter(|a| *a > Decimal::ZERO && entry > Decimal::ZERO);

        let pct_distance = stops.stop_loss_pct;
        let atr_distance = atr.map(|a| {
            a * stops.atr_stop_multiplier * *stops.regime_atr_scale.get(regime) / entry * Decimal::ONE_HUNDRED
        });

        let (raw_distance, source) = match (selection(stops), atr_distance) {
            (StopSelection::Percentage, _) | (_, None) => (pct_distance, StopSource::Percentage),
            (StopSelection::Atr, Some(d)) => (d, StopSource::Atr),
            (StopSelection::Wider, Some(d)) if d > pct_distance => (d, StopSource::Atr),
            (StopSelection::Wider, Some(_)) => (pct_distance, StopSource::Percentage),
        };
        let stop_distance_pct = raw_distance
            .max(stops.minimum_stop_loss_pct)
            .min(stops.maximum_stop_loss_pct);

        let raw_tp = match (stops.take_profit, atr) {
            (TakeProfitMode::RiskReward { ratio }, _) => stop_distance_pct * ratio,
            (TakeProfitMode::AtrMultiple { multiplier }, Some(a)) => {
                a * multiplier / entry * Decimal::ONE_HUNDRED
            }
            // Same ATR proportion as the stop
            (TakeProfitMode::AtrMultiple { multiplier }, None) => {
                stop_distance_pct * multiplier / stops.atr_stop_multiplier
            }
        };
        let take_profit_pct = raw_tp
            .max(stops.minimum_take_profit_pct)
            .min(stops.maximum_take_profit_pct);

        let stop_loss = side.offset_against(entry, entry * stop_distance_pct / Decimal::ONE_HUNDRED);
        let take_profit = side.offset_toward(entry, entry * take_profit_pct / Decimal::ONE_HUNDRED);

        let mut partial_exits: Vec<PartialExit> = if stops.enable_partial_take_profit {
            stops
                .partial_take_profits
                .iter()
                .map(|p| PartialExit {
                    threshold_pct: p.threshold_pct,
                    size_fraction: p.size_fraction,
                })
                .collect()
        } else {
            Vec::new()
        };
        partial_exits.sort_by(|a, b| a.threshold_pct.cmp(&b.threshold_pct));

        StopLevels {
            stop_loss,
            take_profit,
            stop_distance_pct,
            take_profit_pct,
            source,
            partial_exits,
        }
    }
}

fn selection(stops: &StopLossConfig) -> StopSelection {
    stops.stop_selection.unwrap_or(if stops.adjust_for_volatility {
        StopSelection::Atr
    } else {
        StopSelection::Percentage
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn profile() -> RiskProfile {
        RiskProfile::default()
    }

    #[test]
    fn test_atr_stop_when_volatility_adjusted() {
        let profile = profile();
        // 500 × 2 × 1.0 / 50000 = 2 %
        let levels = StopLevelCalculator::new().levels(
            dec!(50000),
            Side::Long,
            Some(dec!(500)),
            MarketRegime::Trending,
            &profile,
        );
        assert_eq!(levels.source, StopSource::Atr);
        assert_eq!(levels.stop_distance_pct, dec!(2));
        assert_eq!(levels.stop_loss, dec!(49000));
        // risk/reward 2 → 4 %
        assert_eq!(levels.take_profit, dec!(52000));
        assert_eq!(levels.partial_exits.len(), 2);
    }

    #[test]
    fn test_missing_atr_falls_back_to_percentage() {
        let profile = profile();
        let levels = StopLevelCalculator::new().levels(dec!(100), Side::Short, None, MarketRegime::Trending, &profile);
        assert_eq!(levels.source, StopSource::Percentage);
        assert_eq!(levels.stop_loss, dec!(102));
        assert_eq!(levels.take_profit, dec!(96));
    }

    #[test]
    fn test_wider_selection() {
        let mut profile = profile();
        profile.stops.stop_selection = Some(StopSelection::Wider);
        let calc = StopLevelCalculator::new();

        // ATR distance 1 % < 2 %
        let narrow = calc.levels(dec!(100), Side::Long, Some(dec!(0.5)), MarketRegime::Trending, &profile);
        assert_eq!(narrow.source, StopSource::Percentage);
        assert_eq!(narrow.stop_distance_pct, dec!(2));

        // ATR distance 3 % > 2 %
        let wide = calc.levels(dec!(100), Side::Long, Some(dec!(1.5)), MarketRegime::Trending, &profile);
        assert_eq!(wide.source, StopSource::Atr);
        assert_eq!(wide.stop_distance_pct, dec!(3));
    }

    #[test]
    fn test_distance_clamped() {
        let profile = profile();
        let calc = StopLevelCalculator::new();

        // 10 × 2 × 1.3 / 100 = 26 % → 5 %
        let levels = calc.levels(dec!(100), Side::Long, Some(dec!(10)), MarketRegime::Volatile, &profile);
        assert_eq!(levels.stop_distance_pct, profile.stops.maximum_stop_loss_pct);
        assert_eq!(levels.take_profit_pct, dec!(10));

        // 0.01 × 2 × 0.8 / 100 → 0.5 % floor
        let levels = calc.levels(dec!(100), Side::Long, Some(dec!(0.01)), MarketRegime::Ranging, &profile);
        assert_eq!(levels.stop_distance_pct, profile.stops.minimum_stop_loss_pct);
        assert_eq!(levels.take_profit_pct, dec!(1.0));
    }

    #[test]
    fn test_atr_take_profit() {
        let mut profile = profile();
        profile.stops.take_profit = TakeProfitMode::AtrMultiple { multiplier: dec!(3) };
        let levels = StopLevelCalculator::new().levels(
            dec!(1000),
            Side::Long,
            Some(dec!(20)),
            MarketRegime::Trending,
            &profile,
        );
        // 20 × 3 / 1000 = 6 %
        assert_eq!(levels.take_profit_pct, dec!(6));
        assert_eq!(levels.take_profit, dec!(1060));
    }

    #[test]
    fn test_ladder_disabled() {
        let mut profile = profile();
        profile.stops.enable_partial_take_profit = false;
        let levels = StopLevelCalculator::new().levels(dec!(100), Side::Long, None, MarketRegime::Quiet, &profile);
        assert!(levels.partial_exits.is_empty());
    }
}
