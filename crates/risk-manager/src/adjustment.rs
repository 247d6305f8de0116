//! Risk adjustment engine.
//!
//! Maps each signal dimension to an independent factor through the profile's
//! lookup tables, combines the factors into one bounded multiplier, and
//! applies it to the symbol's default leverage and the base risk percentage.
//! The engine holds no state: losing streaks and drawdown are left to the
//! circuit breaker and the safety controller.

use leverage_core::config::{CombinationRule, ResolvedLimits};
use leverage_core::types::{
    Dimension, Factor, LiquidityTier, MarketRegime, Reason, SignalSnapshot, SymbolId, TrendAlignment,
    TrendStrength, VolatilityTier,
};
use leverage_core::RiskProfile;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Output of one engine evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAdjustment {
    pub symbol: SymbolId,
    /// Combined multiplier after clamping, applied to default leverage.
    pub leverage_multiplier: Decimal,
    /// Combined multiplier after clamping, applied to base risk.
    pub risk_multiplier: Decimal,
    /// `default_leverage × leverage_multiplier + tier offset`, before bounds.
    pub target_leverage: Decimal,
    /// Risk per trade in percent of balance, already capped.
    pub risk_pct: Decimal,
    pub limits: ResolvedLimits,
    pub reasons: Vec<Reason>,
}

/// Stateless combiner of signal factors.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskAdjustmentEngine;

impl RiskAdjustmentEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a snapshot against the profile.
    pub fn compute(&self, signal: &SignalSnapshot, profile: &RiskProfile) -> RiskAdjustment {
        let tables = &profile.adjustments;
        let mut reasons = Vec::new();
        let mut factors = Vec::with_capacity(6);

        let volatility = dimension(
            signal.volatility_tier,
            VolatilityTier::NEUTRAL,
            Dimension::Volatility,
            &mut reasons,
        );
        let factor = match volatility {
            VolatilityTier::Low => tables.volatility.low,
            VolatilityTier::Normal => tables.volatility.normal,
            VolatilityTier::High => tables.volatility.high,
            VolatilityTier::Extreme => tables.volatility.extreme,
        };
        factors.push(factor);
        reasons.push(Reason::new(Factor::Volatility(volatility), factor));

        let strength = dimension(
            signal.trend_strength,
            TrendStrength::NEUTRAL,
            Dimension::TrendStrength,
            &mut reasons,
        );
        let factor = match strength {
            TrendStrength::Weak => tables.trend_strength.weak,
            TrendStrength::Strong => tables.trend_strength.strong,
            TrendStrength::VeryStrong => tables.trend_strength.very_strong,
        };
        factors.push(factor);
        reasons.push(Reason::new(Factor::TrendStrength(strength), factor));

        let alignment = dimension(
            signal.trend_alignment,
            TrendAlignment::NEUTRAL,
            Dimension::TrendAlignment,
            &mut reasons,
        );
        let factor = match alignment {
            TrendAlignment::With => tables.trend_alignment.with,
            TrendAlignment::Against => tables.trend_alignment.against,
            TrendAlignment::Sideways => tables.trend_alignment.sideways,
        };
        factors.push(factor);
        reasons.push(Reason::new(Factor::TrendAlignment(alignment), factor));

        let regime = dimension(
            signal.market_regime,
            MarketRegime::NEUTRAL,
            Dimension::Regime,
            &mut reasons,
        );
        let factor = *tables.regime.get(regime);
        factors.push(factor);
        reasons.push(Reason::new(Factor::Regime(regime), factor));

        // Highest band whose lower bound the exposure has reached
        let exposure = signal.position_notional_pct_of_balance;
        if let Some(band) = tables
            .exposure
            .iter()
            .filter(|b| exposure >= b.above_pct)
            .max_by(|a, b| a.above_pct.cmp(&b.above_pct))
        {
            factors.push(band.multiplier);
            reasons.push(Reason::new(Factor::Exposure(band.above_pct), band.multiplier));
        }

        if signal.streak > 0 {
            let wins = signal.streak.unsigned_abs();
            if let Some(band) = tables
                .win_streak
                .iter()
                .filter(|b| wins >= b.min_wins)
                .max_by_key(|b| b.min_wins)
            {
                factors.push(band.multiplier);
                reasons.push(Reason::new(Factor::WinStreak(band.min_wins), band.multiplier));
            }
        }

        let raw = combine(tables.combination, &factors);
        let combined = raw
            .max(tables.min_combined_multiplier)
            .min(tables.max_combined_multiplier);
        if combined != raw {
            reasons.push(
                Reason::new(Factor::CombinedClamp, combined).with_note(format!("raw multiplier {raw}")),
            );
        }

        let limits = profile.resolve_limits(&signal.symbol, signal.liquidity_tier);
        let tier_fixed = profile
            .symbol_override(&signal.symbol)
            .and_then(|o| o.liquidity_tier)
            .is_some();
        if signal.liquidity_tier.is_none() && !tier_fixed {
            reasons.push(
                Reason::new(Factor::MissingDimension(Dimension::LiquidityTier), Decimal::ONE)
                    .with_note(format!("using {:?}", LiquidityTier::NEUTRAL)),
            );
        }

        let mut target_leverage = limits.bounds.default_leverage * combined;
        if !limits.leverage_offset.is_zero() {
            target_leverage += limits.leverage_offset;
            reasons.push(Reason::new(Factor::SymbolTierOffset(limits.tier), limits.leverage_offset));
        }

        let risk = &profile.risk;
        let raw_risk = risk.base_risk_percentage * combined;
        let risk_pct = raw_risk
            .max(risk.min_risk_percentage)
            .min(risk.max_risk_percentage);
        if risk_pct != raw_risk {
            reasons.push(Reason::new(Factor::RiskCap, risk_pct).with_note(format!("raw risk {raw_risk}%")));
        }

        debug!(
            symbol = %signal.symbol,
            combined = %combined,
            target_leverage = %target_leverage,
            risk_pct = %risk_pct,
            "Risk adjustment computed"
        );

        RiskAdjustment {
            symbol: signal.symbol.clone(),
            leverage_multiplier: combined,
            risk_multiplier: combined,
            target_leverage,
            risk_pct,
            limits,
            reasons,
        }
    }
}

/// Combine factors under the configured rule.
pub fn combine(rule: CombinationRule, factors: &[Decimal]) -> Decimal {
    match rule {
        CombinationRule::Multiplicative => factors.iter().fold(Decimal::ONE, |acc, f| acc * f),
        CombinationRule::Additive => {
            Decimal::ONE + factors.iter().map(|f| f - Decimal::ONE).sum::<Decimal>()
        }
    }
}

fn dimension<T: Copy>(value: Option<T>, neutral: T, dim: Dimension, reasons: &mut Vec<Reason>) -> T {
    match value {
        Some(v) => v,
        None => {
            reasons.push(Reason::new(Factor::MissingDimension(dim), Decimal::ONE));
            neutral
        }
    }
}
