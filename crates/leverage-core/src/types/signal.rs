//! Per-tick signal snapshot consumed by the risk engine.
//!
//! Snapshots are produced by the external indicator pipeline. Every
//! categorical dimension is optional: values that are missing or that the
//! pipeline emits under a name we do not recognise deserialize to `None`, and
//! the engine substitutes the neutral table entry for them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Symbol identifier (e.g. `BTCUSDT`).
pub type SymbolId = String;

/// Volatility classification of the current market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityTier {
    Low,
    Normal,
    High,
    Extreme,
}

impl VolatilityTier {
    pub const NEUTRAL: Self = Self::Normal;
}

impl FromStr for VolatilityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "low" => Ok(Self::Low),
            "normal" | "medium" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "extreme" => Ok(Self::Extreme),
            other => Err(format!("unknown volatility tier: {other}")),
        }
    }
}

/// Trend strength (ADX-like classification).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStrength {
    Weak,
    Strong,
    VeryStrong,
}

impl TrendStrength {
    pub const NEUTRAL: Self = Self::Weak;
}

impl FromStr for TrendStrength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "weak" => Ok(Self::Weak),
            "strong" => Ok(Self::Strong),
            "very_strong" | "verystrong" => Ok(Self::VeryStrong),
            other => Err(format!("unknown trend strength: {other}")),
        }
    }
}

/// Whether the proposed trade goes with or against the prevailing trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendAlignment {
    With,
    Against,
    Sideways,
}

impl TrendAlignment {
    pub const NEUTRAL: Self = Self::Sideways;
}

impl FromStr for TrendAlignment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "with" | "with_trend" => Ok(Self::With),
            "against" | "against_trend" | "counter_trend" => Ok(Self::Against),
            "sideways" | "neutral" => Ok(Self::Sideways),
            other => Err(format!("unknown trend alignment: {other}")),
        }
    }
}

/// Market regime tag from the external regime classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Trending,
    Ranging,
    Volatile,
    Quiet,
}

impl MarketRegime {
    pub const NEUTRAL: Self = Self::Ranging;

    pub const ALL: [Self; 4] = [Self::Trending, Self::Ranging, Self::Volatile, Self::Quiet];
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trending => "trending",
            Self::Ranging => "ranging",
            Self::Volatile => "volatile",
            Self::Quiet => "quiet",
        };
        f.write_str(s)
    }
}

impl FromStr for MarketRegime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "trending" | "trend" => Ok(Self::Trending),
            "ranging" | "range" => Ok(Self::Ranging),
            "volatile" => Ok(Self::Volatile),
            "quiet" | "calm" => Ok(Self::Quiet),
            other => Err(format!("unknown market regime: {other}")),
        }
    }
}

/// Symbol liquidity tier (1 = most liquid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiquidityTier {
    #[serde(rename = "tier_1")]
    Tier1,
    #[serde(rename = "tier_2")]
    Tier2,
    #[serde(rename = "tier_3")]
    Tier3,
}

impl LiquidityTier {
    pub const NEUTRAL: Self = Self::Tier2;
}

impl FromStr for LiquidityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).trim_start_matches("tier").trim_start_matches('_') {
            "1" => Ok(Self::Tier1),
            "2" => Ok(Self::Tier2),
            "3" => Ok(Self::Tier3),
            other => Err(format!("unknown liquidity tier: {other}")),
        }
    }
}

/// Snapshot dimension names, used when reporting substitutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Volatility,
    TrendStrength,
    TrendAlignment,
    Regime,
    LiquidityTier,
}

/// Immutable per-symbol, per-tick view of the market and account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub symbol: SymbolId,
    pub timestamp: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient")]
    pub volatility_tier: Option<VolatilityTier>,
    #[serde(default, deserialize_with = "lenient")]
    pub trend_strength: Option<TrendStrength>,
    #[serde(default, deserialize_with = "lenient")]
    pub trend_alignment: Option<TrendAlignment>,
    #[serde(default, deserialize_with = "lenient")]
    pub market_regime: Option<MarketRegime>,
    /// Account drawdown from peak, in percent.
    #[serde(default)]
    pub drawdown_pct: Decimal,
    /// Positive = consecutive wins, negative = consecutive losses.
    #[serde(default)]
    pub streak: i32,
    /// Current position notional as a percentage of balance.
    #[serde(default)]
    pub position_notional_pct_of_balance: Decimal,
    #[serde(default, deserialize_with = "lenient")]
    pub liquidity_tier: Option<LiquidityTier>,
}

impl SignalSnapshot {
    /// Snapshot with every dimension at its neutral value.
    pub fn neutral(symbol: impl Into<SymbolId>, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            volatility_tier: Some(VolatilityTier::NEUTRAL),
            trend_strength: Some(TrendStrength::NEUTRAL),
            trend_alignment: Some(TrendAlignment::NEUTRAL),
            market_regime: Some(MarketRegime::NEUTRAL),
            drawdown_pct: Decimal::ZERO,
            streak: 0,
            position_notional_pct_of_balance: Decimal::ZERO,
            liquidity_tier: Some(LiquidityTier::NEUTRAL),
        }
    }

    pub fn with_volatility(mut self, tier: VolatilityTier) -> Self {
        self.volatility_tier = Some(tier);
        self
    }

    pub fn with_trend(mut self, strength: TrendStrength, alignment: TrendAlignment) -> Self {
        self.trend_strength = Some(strength);
        self.trend_alignment = Some(alignment);
        self
    }

    pub fn with_regime(mut self, regime: MarketRegime) -> Self {
        self.market_regime = Some(regime);
        self
    }

    pub fn with_liquidity_tier(mut self, tier: LiquidityTier) -> Self {
        self.liquidity_tier = Some(tier);
        self
    }

    pub fn with_drawdown(mut self, drawdown_pct: Decimal) -> Self {
        self.drawdown_pct = drawdown_pct;
        self
    }

    pub fn with_streak(mut self, streak: i32) -> Self {
        self.streak = streak;
        self
    }

    pub fn with_exposure(mut self, notional_pct_of_balance: Decimal) -> Self {
        self.position_notional_pct_of_balance = notional_pct_of_balance;
        self
    }

    /// Regime used for parameter selection, falling back to neutral.
    pub fn regime_or_neutral(&self) -> MarketRegime {
        self.market_regime.unwrap_or(MarketRegime::NEUTRAL)
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

/// Deserialize an optional categorical field, mapping unknown values to `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    };
    Ok(parsed)
}
