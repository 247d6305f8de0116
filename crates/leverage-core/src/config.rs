//! Risk profile configuration.
//!
//! The profile is loaded once at startup from a TOML/JSON file with `RISK_`
//! environment overrides layered on top, then validated. It is read-only for
//! the rest of the session and shared as `Arc<RiskProfile>`.

pub mod validate;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use tracing::info;

use crate::types::{LiquidityTier, MarketRegime, SymbolId, Timeframe};
use crate::Result;

/// Default location of the profile when `RISK_PROFILE_PATH` is unset.
pub const DEFAULT_PROFILE_PATH: &str = "config/risk_profile.toml";

/// Complete risk profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskProfile {
    /// Global leverage bounds, used when neither symbol nor tier overrides them.
    pub leverage: LeverageBounds,
    pub symbol_specific_limits: HashMap<SymbolId, SymbolOverride>,
    pub liquidity_tiers: LiquidityTierTable,
    pub risk: RiskSettings,
    pub adjustments: AdjustmentTables,
    pub sizing: SizingConfig,
    pub stops: StopLossConfig,
    pub trailing: TrailingStopConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub safety: SafetyConfig,
    pub entry: EntryConfig,
}

impl RiskProfile {
    /// Load a profile from `path` (format chosen by extension), apply
    /// `RISK_<SECTION>__<FIELD>` environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix("RISK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let profile: RiskProfile = settings.try_deserialize()?;
        profile.validate()?;

        info!(
            path = %path.display(),
            symbols = profile.symbol_specific_limits.len(),
            combination = ?profile.adjustments.combination,
            "Risk profile loaded"
        );

        Ok(profile)
    }

    /// Load from the path in `RISK_PROFILE_PATH` (or the default path).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = env::var("RISK_PROFILE_PATH").unwrap_or_else(|_| DEFAULT_PROFILE_PATH.to_string());
        Self::load(Path::new(&path))
    }

    /// Parse and validate a JSON profile.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let profile: RiskProfile = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Check internal consistency; every violation is reported at once.
    pub fn validate(&self) -> Result<()> {
        validate::validate_profile(self)
    }

    /// Look up a symbol override, tolerating case differences in keys.
    pub fn symbol_override(&self, symbol: &str) -> Option<&SymbolOverride> {
        self.symbol_specific_limits.get(symbol).or_else(|| {
            self.symbol_specific_limits
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(symbol))
                .map(|(_, v)| v)
        })
    }

    /// Resolve the effective limits for a symbol.
    ///
    /// Each bound is taken from the first level that defines it:
    /// symbol-specific, then liquidity-tier default, then global default.
    /// The tier itself comes from the symbol override, then the snapshot,
    /// then the neutral tier.
    pub fn resolve_limits(&self, symbol: &str, snapshot_tier: Option<LiquidityTier>) -> ResolvedLimits {
        let symbol_override = self.symbol_override(symbol);
        let tier = symbol_override
            .and_then(|o| o.liquidity_tier)
            .or(snapshot_tier)
            .unwrap_or(LiquidityTier::NEUTRAL);
        let tier_limits = self.liquidity_tiers.get(tier);

        let pick = |from_symbol: Option<Decimal>, from_tier: Option<Decimal>, global: Decimal| {
            match (from_symbol, from_tier) {
                (Some(v), _) => (v, LimitSource::Symbol),
                (None, Some(v)) => (v, LimitSource::Tier),
                (None, None) => (global, LimitSource::Global),
            }
        };

        let (min_leverage, min_source) = pick(
            symbol_override.and_then(|o| o.min_leverage),
            tier_limits.min_leverage,
            self.leverage.min_leverage,
        );
        let (max_leverage, max_source) = pick(
            symbol_override.and_then(|o| o.max_leverage),
            tier_limits.max_leverage,
            self.leverage.max_leverage,
        );
        let (default_leverage, default_source) = pick(
            symbol_override.and_then(|o| o.default_leverage),
            tier_limits.default_leverage,
            self.leverage.default_leverage,
        );

        ResolvedLimits {
            symbol: symbol.to_string(),
            tier,
            bounds: LeverageBounds {
                min_leverage,
                max_leverage,
                default_leverage,
            },
            min_source,
            max_source,
            default_source,
            leverage_offset: tier_limits.leverage_offset,
            max_position_size_usd: symbol_override
                .and_then(|o| o.max_position_size_usd)
                .unwrap_or(tier_limits.max_position_size_usd),
            tick_size: symbol_override
                .and_then(|o| o.tick_size)
                .unwrap_or(self.sizing.default_tick_size),
        }
    }
}

/// Leverage bounds `[min, max]` and the starting point `default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeverageBounds {
    pub min_leverage: Decimal,
    pub max_leverage: Decimal,
    pub default_leverage: Decimal,
}

impl Default for LeverageBounds {
    fn default() -> Self {
        Self {
            min_leverage: dec!(1),
            max_leverage: dec!(20),
            default_leverage: dec!(5),
        }
    }
}

impl LeverageBounds {
    pub fn clamp(&self, leverage: Decimal) -> Decimal {
        leverage.max(self.min_leverage).min(self.max_leverage)
    }

    pub fn contains(&self, leverage: Decimal) -> bool {
        leverage >= self.min_leverage && leverage <= self.max_leverage
    }
}

/// Per-symbol overrides; unset fields fall through to the tier, then global.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolOverride {
    pub min_leverage: Option<Decimal>,
    pub max_leverage: Option<Decimal>,
    pub default_leverage: Option<Decimal>,
    pub liquidity_tier: Option<LiquidityTier>,
    pub max_position_size_usd: Option<Decimal>,
    pub tick_size: Option<Decimal>,
}

/// Defaults and modifiers for one liquidity tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierLimits {
    #[serde(default)]
    pub min_leverage: Option<Decimal>,
    #[serde(default)]
    pub max_leverage: Option<Decimal>,
    #[serde(default)]
    pub default_leverage: Option<Decimal>,
    /// Added to target leverage after the combined multiplier is applied.
    #[serde(default)]
    pub leverage_offset: Decimal,
    pub max_position_size_usd: Decimal,
}

/// Tier defaults keyed by liquidity tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityTierTable {
    pub tier_1: TierLimits,
    pub tier_2: TierLimits,
    pub tier_3: TierLimits,
}

impl Default for LiquidityTierTable {
    fn default() -> Self {
        Self {
            tier_1: TierLimits {
                min_leverage: None,
                max_leverage: None,
                default_leverage: None,
                leverage_offset: dec!(1),
                max_position_size_usd: dec!(1000000),
            },
            tier_2: TierLimits {
                min_leverage: None,
                max_leverage: None,
                default_leverage: None,
                leverage_offset: Decimal::ZERO,
                max_position_size_usd: dec!(250000),
            },
            tier_3: TierLimits {
                min_leverage: None,
                max_leverage: Some(dec!(5)),
                default_leverage: Some(dec!(3)),
                leverage_offset: dec!(-1),
                max_position_size_usd: dec!(50000),
            },
        }
    }
}

impl LiquidityTierTable {
    pub fn get(&self, tier: LiquidityTier) -> &TierLimits {
        match tier {
            LiquidityTier::Tier1 => &self.tier_1,
            LiquidityTier::Tier2 => &self.tier_2,
            LiquidityTier::Tier3 => &self.tier_3,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (LiquidityTier, &TierLimits)> {
        [
            (LiquidityTier::Tier1, &self.tier_1),
            (LiquidityTier::Tier2, &self.tier_2),
            (LiquidityTier::Tier3, &self.tier_3),
        ]
        .into_iter()
    }
}

/// Which level of the fallback chain a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitSource {
    Symbol,
    Tier,
    Global,
}

/// Effective limits for one symbol after the fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLimits {
    pub symbol: SymbolId,
    pub tier: LiquidityTier,
    pub bounds: LeverageBounds,
    pub min_source: LimitSource,
    pub max_source: LimitSource,
    pub default_source: LimitSource,
    pub leverage_offset: Decimal,
    pub max_position_size_usd: Decimal,
    pub tick_size: Decimal,
}

/// Risk-per-trade settings, in percent of balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub base_risk_percentage: Decimal,
    pub min_risk_percentage: Decimal,
    pub max_risk_percentage: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            base_risk_percentage: dec!(1.0),
            min_risk_percentage: dec!(0.1),
            max_risk_percentage: dec!(2.0),
        }
    }
}

/// How per-dimension factors are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationRule {
    /// Product of all factors.
    #[default]
    Multiplicative,
    /// `1 + Σ(factor − 1)`.
    Additive,
}

/// Values keyed by market regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeTable<T> {
    pub trending: T,
    pub ranging: T,
    pub volatile: T,
    pub quiet: T,
}

impl<T> RegimeTable<T> {
    pub fn get(&self, regime: MarketRegime) -> &T {
        match regime {
            MarketRegime::Trending => &self.trending,
            MarketRegime::Ranging => &self.ranging,
            MarketRegime::Volatile => &self.volatile,
            MarketRegime::Quiet => &self.quiet,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (MarketRegime, &T)> {
        MarketRegime::ALL.into_iter().map(move |r| (r, self.get(r)))
    }
}

impl<T: Clone> RegimeTable<T> {
    pub fn uniform(value: T) -> Self {
        Self {
            trending: value.clone(),
            ranging: value.clone(),
            volatile: value.clone(),
            quiet: value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityFactors {
    pub low: Decimal,
    pub normal: Decimal,
    pub high: Decimal,
    pub extreme: Decimal,
}

impl Default for VolatilityFactors {
    fn default() -> Self {
        Self {
            low: dec!(1.2),
            normal: dec!(1.0),
            high: dec!(0.7),
            extreme: dec!(0.5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendStrengthFactors {
    pub weak: Decimal,
    pub strong: Decimal,
    pub very_strong: Decimal,
}

impl Default for TrendStrengthFactors {
    fn default() -> Self {
        Self {
            weak: dec!(1.0),
            strong: dec!(1.1),
            very_strong: dec!(1.2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendAlignmentFactors {
    pub with: Decimal,
    pub against: Decimal,
    pub sideways: Decimal,
}

impl Default for TrendAlignmentFactors {
    fn default() -> Self {
        Self {
            with: dec!(1.2),
            against: dec!(0.7),
            sideways: dec!(1.0),
        }
    }
}

/// Factor applied when exposure is at or above `above_pct` of balance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureBand {
    pub above_pct: Decimal,
    pub multiplier: Decimal,
}

/// Factor applied after at least `min_wins` consecutive wins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WinStreakBand {
    pub min_wins: u32,
    pub multiplier: Decimal,
}

/// Lookup tables and combination rule for the adjustment engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustmentTables {
    pub combination: CombinationRule,
    pub min_combined_multiplier: Decimal,
    pub max_combined_multiplier: Decimal,
    pub volatility: VolatilityFactors,
    pub trend_strength: TrendStrengthFactors,
    pub trend_alignment: TrendAlignmentFactors,
    pub regime: RegimeTable<Decimal>,
    pub exposure: Vec<ExposureBand>,
    pub win_streak: Vec<WinStreakBand>,
}

impl Default for AdjustmentTables {
    fn default() -> Self {
        Self {
            combination: CombinationRule::Multiplicative,
            min_combined_multiplier: dec!(0.3),
            max_combined_multiplier: dec!(1.5),
            volatility: VolatilityFactors::default(),
            trend_strength: TrendStrengthFactors::default(),
            trend_alignment: TrendAlignmentFactors::default(),
            regime: RegimeTable {
                trending: dec!(1.1),
                ranging: dec!(0.8),
                volatile: dec!(0.7),
                quiet: dec!(1.0),
            },
            exposure: vec![
                ExposureBand {
                    above_pct: dec!(50),
                    multiplier: dec!(0.9),
                },
                ExposureBand {
                    above_pct: dec!(100),
                    multiplier: dec!(0.75),
                },
                ExposureBand {
                    above_pct: dec!(200),
                    multiplier: dec!(0.5),
                },
            ],
            win_streak: vec![
                WinStreakBand {
                    min_wins: 3,
                    multiplier: dec!(1.05),
                },
                WinStreakBand {
                    min_wins: 5,
                    multiplier: dec!(1.1),
                },
            ],
        }
    }
}

/// Position sizing limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Price increment used when a symbol defines none.
    pub default_tick_size: Decimal,
    /// Minimum stop distance, in ticks, accepted for sizing.
    pub min_stop_distance_ticks: u32,
    /// Quantity increment; sizes are rounded down to it.
    pub lot_size: Option<Decimal>,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            default_tick_size: dec!(0.01),
            min_stop_distance_ticks: 5,
            lot_size: None,
        }
    }
}

/// Which stop distance wins when both are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSelection {
    /// The larger of the percentage and ATR distances.
    Wider,
    Atr,
    Percentage,
}

/// How the take-profit distance is derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TakeProfitMode {
    /// `ratio` × stop distance.
    RiskReward { ratio: Decimal },
    /// `multiplier` × ATR.
    AtrMultiple { multiplier: Decimal },
}

/// One configured ladder rung.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialTakeProfit {
    pub threshold_pct: Decimal,
    pub size_fraction: Decimal,
}

/// Initial stop-loss / take-profit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopLossConfig {
    pub stop_loss_pct: Decimal,
    pub atr_stop_multiplier: Decimal,
    /// Timeframe whose ATR drives the initial stop.
    pub atr_timeframe: Timeframe,
    pub adjust_for_volatility: bool,
    /// Unset: ATR when `adjust_for_volatility`, otherwise percentage.
    pub stop_selection: Option<StopSelection>,
    pub minimum_stop_loss_pct: Decimal,
    pub maximum_stop_loss_pct: Decimal,
    pub take_profit: TakeProfitMode,
    pub minimum_take_profit_pct: Decimal,
    pub maximum_take_profit_pct: Decimal,
    /// ATR multiplier scale per entry regime.
    pub regime_atr_scale: RegimeTable<Decimal>,
    pub enable_partial_take_profit: bool,
    pub partial_take_profits: Vec<PartialTakeProfit>,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: dec!(2.0),
            atr_stop_multiplier: dec!(2.0),
            atr_timeframe: Timeframe::H1,
            adjust_for_volatility: true,
            stop_selection: None,
            minimum_stop_loss_pct: dec!(0.5),
            maximum_stop_loss_pct: dec!(5.0),
            take_profit: TakeProfitMode::RiskReward { ratio: dec!(2.0) },
            minimum_take_profit_pct: dec!(1.0),
            maximum_take_profit_pct: dec!(15.0),
            regime_atr_scale: RegimeTable {
                trending: dec!(1.0),
                ranging: dec!(0.8),
                volatile: dec!(1.3),
                quiet: dec!(0.9),
            },
            enable_partial_take_profit: true,
            partial_take_profits: vec![
                PartialTakeProfit {
                    threshold_pct: dec!(1.5),
                    size_fraction: dec!(0.25),
                },
                PartialTakeProfit {
                    threshold_pct: dec!(3.0),
                    size_fraction: dec!(0.25),
                },
            ],
        }
    }
}

/// Trailing-stop callback model, selected per regime at position entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TrailingMode {
    /// Activate at `activation_pct` excursion, trail `callback_pct` behind the extreme.
    Percentage {
        activation_pct: Decimal,
        callback_pct: Decimal,
    },
    /// Callback tightens as excursion passes each entry of `profit_steps`.
    Step {
        profit_steps: Vec<Decimal>,
        callback_steps: Vec<Decimal>,
    },
    /// Activate at `activation_threshold` ATRs, trail `multiplier` ATRs behind.
    AtrBased {
        activation_threshold: Decimal,
        multiplier: Decimal,
        period: u32,
    },
}

/// Switch the trailing reference timeframe once excursion passes `trigger_pct`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeframeUpgradeConfig {
    pub enabled: bool,
    pub trigger_pct: Decimal,
    pub upgrade_timeframe_map: HashMap<Timeframe, Timeframe>,
}

impl Default for TimeframeUpgradeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_pct: dec!(3.0),
            upgrade_timeframe_map: HashMap::from([
                (Timeframe::M15, Timeframe::H1),
                (Timeframe::H1, Timeframe::H4),
                (Timeframe::H4, Timeframe::D1),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingStopConfig {
    pub enabled: bool,
    /// Reference ATR timeframe before any upgrade.
    pub base_timeframe: Timeframe,
    pub regimes: RegimeTable<TrailingMode>,
    pub timeframe_upgrade: TimeframeUpgradeConfig,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_timeframe: Timeframe::H1,
            regimes: RegimeTable {
                trending: TrailingMode::AtrBased {
                    activation_threshold: dec!(1.0),
                    multiplier: dec!(2.0),
                    period: 14,
                },
                ranging: TrailingMode::Percentage {
                    activation_pct: dec!(0.5),
                    callback_pct: dec!(0.25),
                },
                volatile: TrailingMode::Step {
                    profit_steps: vec![dec!(1.0), dec!(2.0), dec!(4.0)],
                    callback_steps: vec![dec!(0.8), dec!(0.6), dec!(0.4)],
                },
                quiet: TrailingMode::Percentage {
                    activation_pct: dec!(0.3),
                    callback_pct: dec!(0.15),
                },
            },
            timeframe_upgrade: TimeframeUpgradeConfig::default(),
        }
    }
}

/// Whether breaker state is shared across the account or kept per symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    #[default]
    Account,
    Symbol,
}

/// Configuration for circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub scope: BreakerScope,
    pub max_consecutive_losses: u32,
    /// Net realized daily loss, in percent of balance, that trips the breaker.
    pub daily_loss_threshold_pct: Decimal,
    pub pause_duration_minutes: i64,
    pub reduce_position_size_after_loss: bool,
    /// Risk multiplier applied after a trip until reset.
    pub size_reduction_factor: Decimal,
    pub reset_after_profitable_trade: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scope: BreakerScope::Account,
            max_consecutive_losses: 3,
            daily_loss_threshold_pct: dec!(5.0),
            pause_duration_minutes: 60,
            reduce_position_size_after_loss: true,
            size_reduction_factor: dec!(0.5),
            reset_after_profitable_trade: true,
        }
    }
}

/// Rate limits and emergency controls for leverage changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Largest leverage step allowed inside the cooldown window.
    pub max_adjustment_per_period: Decimal,
    pub adjustment_cooldown_minutes: i64,
    /// Drawdown increase, in percentage points, that counts as rapid.
    pub rapid_drawdown_threshold_pct: Decimal,
    pub rapid_drawdown_window_minutes: i64,
    pub emergency_leverage_cap: Decimal,
    /// Relative change (0.5 = 50 %) above which a decision needs acknowledgment.
    pub force_manual_confirmation_threshold: Decimal,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_adjustment_per_period: dec!(2.0),
            adjustment_cooldown_minutes: 15,
            rapid_drawdown_threshold_pct: dec!(5.0),
            rapid_drawdown_window_minutes: 60,
            emergency_leverage_cap: dec!(2.0),
            force_manual_confirmation_threshold: dec!(1.0),
        }
    }
}

/// Gates applied to strategy entry intents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    /// Minimum strategy confidence (0..1) to consider an entry.
    pub min_confidence: Decimal,
    pub max_open_positions_per_symbol: usize,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            min_confidence: Decimal::ZERO,
            max_open_positions_per_symbol: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn profile_with_symbol(symbol: &str, o: SymbolOverride) -> RiskProfile {
        let mut profile = RiskProfile::default();
        profile.symbol_specific_limits.insert(symbol.to_string(), o);
        profile
    }

    #[test]
    fn test_default_profile_is_valid() {
        RiskProfile::default().validate().unwrap();
    }

    #[test]
    fn test_resolution_prefers_symbol_then_tier_then_global() {
        let profile = profile_with_symbol(
            "BTCUSDT",
            SymbolOverride {
                max_leverage: Some(dec!(15)),
                liquidity_tier: Some(LiquidityTier::Tier3),
                ..Default::default()
            },
        );

        let limits = profile.resolve_limits("BTCUSDT", Some(LiquidityTier::Tier1));
        // Symbol tier wins over the snapshot tier
        assert_eq!(limits.tier, LiquidityTier::Tier3);
        // max from symbol
        assert_eq!(limits.bounds.max_leverage, dec!(15));
        assert_eq!(limits.max_source, LimitSource::Symbol);
        // default from tier 3
        assert_eq!(limits.bounds.default_leverage, dec!(3));
        assert_eq!(limits.default_source, LimitSource::Tier);
        // min from global
        assert_eq!(limits.bounds.min_leverage, dec!(1));
        assert_eq!(limits.min_source, LimitSource::Global);
        assert_eq!(limits.leverage_offset, dec!(-1));
        assert_eq!(limits.max_position_size_usd, dec!(50000));
    }

    #[test]
    fn test_unknown_symbol_uses_snapshot_tier_or_neutral() {
        let profile = RiskProfile::default();

        let limits = profile.resolve_limits("DOGEUSDT", Some(LiquidityTier::Tier1));
        assert_eq!(limits.tier, LiquidityTier::Tier1);
        assert_eq!(limits.bounds, profile.leverage);
        assert_eq!(limits.tick_size, profile.sizing.default_tick_size);

        let limits = profile.resolve_limits("DOGEUSDT", None);
        assert_eq!(limits.tier, LiquidityTier::Tier2);
        assert_eq!(limits.leverage_offset, Decimal::ZERO);
    }

    #[test]
    fn test_symbol_lookup_ignores_case() {
        let profile = profile_with_symbol(
            "btcusdt",
            SymbolOverride {
                tick_size: Some(dec!(0.1)),
                ..Default::default()
            },
        );
        assert_eq!(profile.resolve_limits("BTCUSDT", None).tick_size, dec!(0.1));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[leverage]
min_leverage = 2
max_leverage = 10
default_leverage = 4

[symbol_specific_limits.ETHUSDT]
max_leverage = 8

[adjustments]
combination = "additive"

[trailing.regimes.trending]
mode = "percentage"
activation_pct = 1.0
callback_pct = 0.5

[trailing.regimes.ranging]
mode = "percentage"
activation_pct = 0.5
callback_pct = 0.25

[trailing.regimes.volatile]
mode = "atr_based"
activation_threshold = 1.5
multiplier = 2.5
period = 14

[trailing.regimes.quiet]
mode = "step"
profit_steps = [0.5, 1.0]
callback_steps = [0.3, 0.2]
"#
        )
        .unwrap();

        let profile = RiskProfile::load(file.path()).unwrap();
        assert_eq!(profile.leverage.max_leverage, dec!(10));
        assert_eq!(profile.adjustments.combination, CombinationRule::Additive);
        assert!(matches!(
            profile.trailing.regimes.volatile,
            TrailingMode::AtrBased { period: 14, .. }
        ));
        assert_eq!(
            profile.resolve_limits("ETHUSDT", None).bounds.max_leverage,
            dec!(8)
        );
        // Untouched sections keep their defaults
        assert_eq!(profile.circuit_breaker.max_consecutive_losses, 3);
    }

    #[test]
    fn test_load_rejects_invalid_bounds() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{ "leverage": {{ "min_leverage": 10, "max_leverage": 5, "default_leverage": 7 }} }}"#
        )
        .unwrap();

        let err = RiskProfile::load(file.path()).unwrap_err();
        assert!(matches!(err, crate::Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_from_json_str_round_trips_defaults() {
        let json = serde_json::to_string(&RiskProfile::default()).unwrap();
        let profile = RiskProfile::from_json_str(&json).unwrap();
        assert_eq!(profile.stops, StopLossConfig::default());
    }

    #[test]
    fn test_shipped_profile_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/risk_profile.toml");
        let profile = RiskProfile::load(&path).unwrap();

        let sol = profile.resolve_limits("SOLUSDT", None);
        assert_eq!(sol.bounds.min_leverage, dec!(3));
        assert_eq!(sol.bounds.max_leverage, dec!(15));
        assert_eq!(sol.max_position_size_usd, dec!(150000));
        assert_eq!(profile.stops.partial_take_profits.len(), 2);
        assert_eq!(
            profile.trailing.timeframe_upgrade.upgrade_timeframe_map.get(&Timeframe::H1),
            Some(&Timeframe::H4)
        );
    }
}
