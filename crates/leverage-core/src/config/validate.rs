//! Load-time consistency checks for a [`RiskProfile`].
//!
//! Every rule is checked and all violations are returned together so a
//! broken profile can be fixed in one pass.

use rust_decimal::Decimal;

use super::{
    LeverageBounds, LiquidityTierTable, RiskProfile, StopLossConfig, TakeProfitMode, TrailingMode,
    TrailingStopConfig,
};
use crate::types::LiquidityTier;
use crate::{Error, Result};

pub fn validate_profile(profile: &RiskProfile) -> Result<()> {
    let mut errors = Vec::new();

    check_bounds("leverage", &profile.leverage, &mut errors);
    check_tiers(profile, &mut errors);
    check_symbols(profile, &mut errors);
    check_risk(profile, &mut errors);
    check_adjustments(profile, &mut errors);
    check_sizing(profile, &mut errors);
    check_stops(&profile.stops, &mut errors);
    check_trailing(&profile.trailing, &mut errors);
    check_breaker(profile, &mut errors);
    check_safety(profile, &mut errors);

    let confidence = profile.entry.min_confidence;
    if confidence < Decimal::ZERO || confidence > Decimal::ONE {
        errors.push("entry.min_confidence must be between 0 and 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::ConfigValidation { errors })
    }
}

fn check_bounds(path: &str, bounds: &LeverageBounds, errors: &mut Vec<String>) {
    if bounds.min_leverage <= Decimal::ZERO {
        errors.push(format!("{path}.min_leverage must be positive"));
    }
    if bounds.min_leverage > bounds.max_leverage {
        errors.push(format!(
            "{path}: min_leverage ({}) exceeds max_leverage ({})",
            bounds.min_leverage, bounds.max_leverage
        ));
    }
    if !bounds.contains(bounds.default_leverage) {
        errors.push(format!(
            "{path}: default_leverage ({}) outside [{}, {}]",
            bounds.default_leverage, bounds.min_leverage, bounds.max_leverage
        ));
    }
}

fn check_tiers(profile: &RiskProfile, errors: &mut Vec<String>) {
    let tiers: &LiquidityTierTable = &profile.liquidity_tiers;
    for (tier, limits) in tiers.iter() {
        if limits.max_position_size_usd <= Decimal::ZERO {
            errors.push(format!("liquidity_tiers.{}: max_position_size_usd must be positive", tier_key(tier)));
        }
    }
    // Resolved bounds for a symbol without overrides
    for (tier, _) in tiers.iter() {
        let limits = profile.resolve_limits("", Some(tier));
        check_bounds(&format!("liquidity_tiers.{}", tier_key(tier)), &limits.bounds, errors);
    }
}

fn check_symbols(profile: &RiskProfile, errors: &mut Vec<String>) {
    let mut symbols: Vec<_> = profile.symbol_specific_limits.iter().collect();
    symbols.sort_by(|a, b| a.0.cmp(b.0));

    for (symbol, o) in symbols {
        let path = format!("symbol_specific_limits.{symbol}");
        // Without a fixed tier the snapshot may select any of them
        let tiers: Vec<LiquidityTier> = match o.liquidity_tier {
            Some(tier) => vec![tier],
            None => vec![LiquidityTier::Tier1, LiquidityTier::Tier2, LiquidityTier::Tier3],
        };
        for tier in tiers {
            let limits = profile.resolve_limits(symbol, Some(tier));
            let before = errors.len();
            check_bounds(&path, &limits.bounds, errors);
            if errors.len() > before {
                // One report per symbol is enough
                break;
            }
        }
        if o.max_position_size_usd.is_some_and(|v| v <= Decimal::ZERO) {
            errors.push(format!("{path}.max_position_size_usd must be positive"));
        }
        if o.tick_size.is_some_and(|v| v <= Decimal::ZERO) {
            errors.push(format!("{path}.tick_size must be positive"));
        }
    }
}

fn check_risk(profile: &RiskProfile, errors: &mut Vec<String>) {
    let risk = &profile.risk;
    if risk.min_risk_percentage <= Decimal::ZERO {
        errors.push("risk.min_risk_percentage must be positive".to_string());
    }
    if risk.min_risk_percentage > risk.max_risk_percentage {
        errors.push("risk.min_risk_percentage exceeds risk.max_risk_percentage".to_string());
    }
    if risk.base_risk_percentage < risk.min_risk_percentage || risk.base_risk_percentage > risk.max_risk_percentage {
        errors.push(format!(
            "risk.base_risk_percentage ({}) outside [{}, {}]",
            risk.base_risk_percentage, risk.min_risk_percentage, risk.max_risk_percentage
        ));
    }
}

fn check_adjustments(profile: &RiskProfile, errors: &mut Vec<String>) {
    let adj = &profile.adjustments;
    if adj.min_combined_multiplier <= Decimal::ZERO {
        errors.push("adjustments.min_combined_multiplier must be positive".to_string());
    }
    if adj.min_combined_multiplier > adj.max_combined_multiplier {
        errors.push("adjustments.min_combined_multiplier exceeds max_combined_multiplier".to_string());
    }

    let factors = [
        ("volatility.low", adj.volatility.low),
        ("volatility.normal", adj.volatility.normal),
        ("volatility.high", adj.volatility.high),
        ("volatility.extreme", adj.volatility.extreme),
        ("trend_strength.weak", adj.trend_strength.weak),
        ("trend_strength.strong", adj.trend_strength.strong),
        ("trend_strength.very_strong", adj.trend_strength.very_strong),
        ("trend_alignment.with", adj.trend_alignment.with),
        ("trend_alignment.against", adj.trend_alignment.against),
        ("trend_alignment.sideways", adj.trend_alignment.sideways),
    ];
    for (name, value) in factors {
        if value <= Decimal::ZERO {
            errors.push(format!("adjustments.{name} must be positive"));
        }
    }
    for (regime, value) in adj.regime.iter() {
        if *value <= Decimal::ZERO {
            errors.push(format!("adjustments.regime.{regime} must be positive"));
        }
    }
    for band in &adj.exposure {
        if band.multiplier <= Decimal::ZERO || band.above_pct.is_sign_negative() {
            errors.push(format!("adjustments.exposure band at {}% is invalid", band.above_pct));
        }
    }
    for band in &adj.win_streak {
        if band.multiplier <= Decimal::ZERO {
            errors.push(format!("adjustments.win_streak band at {} wins is invalid", band.min_wins));
        }
    }
}

fn check_sizing(profile: &RiskProfile, errors: &mut Vec<String>) {
    if profile.sizing.default_tick_size <= Decimal::ZERO {
        errors.push("sizing.default_tick_size must be positive".to_string());
    }
    if profile.sizing.lot_size.is_some_and(|v| v <= Decimal::ZERO) {
        errors.push("sizing.lot_size must be positive".to_string());
    }
}

fn check_stops(stops: &StopLossConfig, errors: &mut Vec<String>) {
    if stops.minimum_stop_loss_pct <= Decimal::ZERO {
        errors.push("stops.minimum_stop_loss_pct must be positive".to_string());
    }
    if stops.minimum_stop_loss_pct > stops.maximum_stop_loss_pct {
        errors.push("stops.minimum_stop_loss_pct exceeds maximum_stop_loss_pct".to_string());
    }
    if stops.maximum_stop_loss_pct >= Decimal::ONE_HUNDRED {
        errors.push("stops.maximum_stop_loss_pct must be below 100".to_string());
    }
    if stops.minimum_take_profit_pct > stops.maximum_take_profit_pct {
        errors.push("stops.minimum_take_profit_pct exceeds maximum_take_profit_pct".to_string());
    }
    if stops.stop_loss_pct <= Decimal::ZERO {
        errors.push("stops.stop_loss_pct must be positive".to_string());
    }
    if stops.atr_stop_multiplier <= Decimal::ZERO {
        errors.push("stops.atr_stop_multiplier must be positive".to_string());
    }
    match stops.take_profit {
        TakeProfitMode::RiskReward { ratio } if ratio <= Decimal::ZERO => {
            errors.push("stops.take_profit.ratio must be positive".to_string());
        }
        TakeProfitMode::AtrMultiple { multiplier } if multiplier <= Decimal::ZERO => {
            errors.push("stops.take_profit.multiplier must be positive".to_string());
        }
        _ => {}
    }
    for (regime, value) in stops.regime_atr_scale.iter() {
        if *value <= Decimal::ZERO {
            errors.push(format!("stops.regime_atr_scale.{regime} must be positive"));
        }
    }

    let mut total = Decimal::ZERO;
    for pair in stops.partial_take_profits.windows(2) {
        if pair[1].threshold_pct <= pair[0].threshold_pct {
            errors.push("stops.partial_take_profits thresholds must be strictly increasing".to_string());
            break;
        }
    }
    for rung in &stops.partial_take_profits {
        if rung.threshold_pct <= Decimal::ZERO {
            errors.push(format!("stops.partial_take_profits threshold {} must be positive", rung.threshold_pct));
        }
        if rung.size_fraction <= Decimal::ZERO || rung.size_fraction > Decimal::ONE {
            errors.push(format!(
                "stops.partial_take_profits fraction {} must be in (0, 1]",
                rung.size_fraction
            ));
        }
        total += rung.size_fraction;
    }
    if total > Decimal::ONE {
        errors.push(format!("stops.partial_take_profits fractions sum to {total}, above 1"));
    }
}

fn check_trailing(trailing: &TrailingStopConfig, errors: &mut Vec<String>) {
    for (regime, mode) in trailing.regimes.iter() {
        let path = format!("trailing.regimes.{regime}");
        match mode {
            TrailingMode::Percentage {
                activation_pct,
                callback_pct,
            } => {
                if activation_pct.is_sign_negative() {
                    errors.push(format!("{path}.activation_pct must not be negative"));
                }
                if *callback_pct <= Decimal::ZERO || *callback_pct >= Decimal::ONE_HUNDRED {
                    errors.push(format!("{path}.callback_pct must be in (0, 100)"));
                }
            }
            TrailingMode::Step {
                profit_steps,
                callback_steps,
            } => {
                if profit_steps.is_empty() {
                    errors.push(format!("{path}.profit_steps must not be empty"));
                }
                if profit_steps.len() != callback_steps.len() {
                    errors.push(format!(
                        "{path}: profit_steps ({}) and callback_steps ({}) differ in length",
                        profit_steps.len(),
                        callback_steps.len()
                    ));
                }
                if profit_steps.windows(2).any(|w| w[1] <= w[0]) {
                    errors.push(format!("{path}.profit_steps must be strictly increasing"));
                }
                if callback_steps.windows(2).any(|w| w[1] > w[0]) {
                    errors.push(format!("{path}.callback_steps must not increase"));
                }
                if callback_steps
                    .iter()
                    .any(|c| *c <= Decimal::ZERO || *c >= Decimal::ONE_HUNDRED)
                {
                    errors.push(format!("{path}.callback_steps must be in (0, 100)"));
                }
            }
            TrailingMode::AtrBased {
                activation_threshold,
                multiplier,
                period,
            } => {
                if activation_threshold.is_sign_negative() {
                    errors.push(format!("{path}.activation_threshold must not be negative"));
                }
                if *multiplier <= Decimal::ZERO {
                    errors.push(format!("{path}.multiplier must be positive"));
                }
                if *period == 0 {
                    errors.push(format!("{path}.period must be positive"));
                }
            }
        }
    }

    let upgrade = &trailing.timeframe_upgrade;
    if upgrade.enabled && upgrade.trigger_pct <= Decimal::ZERO {
        errors.push("trailing.timeframe_upgrade.trigger_pct must be positive".to_string());
    }
    let mut map: Vec<_> = upgrade.upgrade_timeframe_map.iter().collect();
    map.sort();
    for (from, to) in map {
        if to <= from {
            errors.push(format!(
                "trailing.timeframe_upgrade maps {from} to {to}, which is not a longer timeframe"
            ));
        }
    }
}

fn check_breaker(profile: &RiskProfile, errors: &mut Vec<String>) {
    let cb = &profile.circuit_breaker;
    if cb.max_consecutive_losses == 0 {
        errors.push("circuit_breaker.max_consecutive_losses must be at least 1".to_string());
    }
    if cb.daily_loss_threshold_pct <= Decimal::ZERO {
        errors.push("circuit_breaker.daily_loss_threshold_pct must be positive".to_string());
    }
    if cb.pause_duration_minutes < 0 {
        errors.push("circuit_breaker.pause_duration_minutes must not be negative".to_string());
    }
    if cb.size_reduction_factor <= Decimal::ZERO || cb.size_reduction_factor > Decimal::ONE {
        errors.push("circuit_breaker.size_reduction_factor must be in (0, 1]".to_string());
    }
}

fn check_safety(profile: &RiskProfile, errors: &mut Vec<String>) {
    let safety = &profile.safety;
    if safety.max_adjustment_per_period <= Decimal::ZERO {
        errors.push("safety.max_adjustment_per_period must be positive".to_string());
    }
    if safety.adjustment_cooldown_minutes < 0 {
        errors.push("safety.adjustment_cooldown_minutes must not be negative".to_string());
    }
    if safety.rapid_drawdown_threshold_pct <= Decimal::ZERO {
        errors.push("safety.rapid_drawdown_threshold_pct must be positive".to_string());
    }
    if safety.rapid_drawdown_window_minutes <= 0 {
        errors.push("safety.rapid_drawdown_window_minutes must be positive".to_string());
    }
    if safety.emergency_leverage_cap <= Decimal::ZERO {
        errors.push("safety.emergency_leverage_cap must be positive".to_string());
    }
    if safety.force_manual_confirmation_threshold <= Decimal::ZERO {
        errors.push("safety.force_manual_confirmation_threshold must be positive".to_string());
    }
}

fn tier_key(tier: LiquidityTier) -> &'static str {
    match tier {
        LiquidityTier::Tier1 => "tier_1",
        LiquidityTier::Tier2 => "tier_2",
        LiquidityTier::Tier3 => "tier_3",
    }
}
