//! Leverage decisions and the reasons recorded while producing them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    Dimension, LiquidityTier, MarketRegime, SymbolId, TrendAlignment, TrendStrength,
    VolatilityTier,
};

/// What contributed to a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "factor", content = "value", rename_all = "snake_case")]
pub enum Factor {
    Volatility(VolatilityTier),
    TrendStrength(TrendStrength),
    TrendAlignment(TrendAlignment),
    Regime(MarketRegime),
    /// Exposure band, keyed by its lower bound in percent of balance.
    Exposure(Decimal),
    /// Win streak band, keyed by its minimum number of wins.
    WinStreak(u32),
    /// Combined multiplier hit the configured floor or ceiling.
    CombinedClamp,
    SymbolTierOffset(LiquidityTier),
    /// A snapshot dimension was absent or unrecognised; neutral entry used.
    MissingDimension(Dimension),
    /// Leverage clamped into the symbol bounds.
    BoundsClamp,
    /// Risk percentage clamped into its configured range.
    RiskCap,
    RateLimited,
    EmergencyDeleverage,
    ManualConfirmation,
    CircuitBreakerReduction,
}

/// One entry in a decision's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub factor: Factor,
    /// Multiplier, offset, or resulting value, depending on the factor.
    pub contribution: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Reason {
    pub fn new(factor: Factor, contribution: Decimal) -> Self {
        Self {
            factor,
            contribution,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// How the safety controller resolved a leverage request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// New leverage applied as requested (after bounds).
    Applied,
    /// Leverage equals the previously applied value.
    Unchanged,
    /// Change limited to the maximum step inside the cooldown window.
    RateLimited,
    /// Forced down by rapid drawdown.
    EmergencyDeleveraged,
    /// Computed but held until an external acknowledgment.
    AwaitingConfirmation,
}

/// Leverage and risk for one (symbol, tick); consumed by that tick only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeverageDecision {
    pub symbol: SymbolId,
    pub leverage: Decimal,
    pub risk_pct: Decimal,
    pub reasons: Vec<Reason>,
    pub clamped: bool,
    pub outcome: DecisionOutcome,
    pub requires_confirmation: bool,
    pub decided_at: DateTime<Utc>,
}

impl LeverageDecision {
    /// Whether the decision may be applied without an acknowledgment.
    pub fn is_auto_applicable(&self) -> bool {
        !self.requires_confirmation
    }

    pub fn has_factor(&self, factor: &Factor) -> bool {
        self.reasons.iter().any(|r| &r.factor == factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reason_serializes_tagged_factor() {
        let reason = Reason::new(Factor::Volatility(VolatilityTier::Extreme), dec!(0.5));
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["factor"]["factor"], "volatility");
        assert_eq!(json["factor"]["value"], "extreme");
        assert!(json.get("note").is_none());
    }

    #[test]
    fn test_has_factor() {
        let decision = LeverageDecision {
            symbol: "BTCUSDT".to_string(),
            leverage: dec!(3),
            risk_pct: dec!(1),
            reasons: vec![Reason::new(Factor::BoundsClamp, dec!(3))],
            clamped: true,
            outcome: DecisionOutcome::Applied,
            requires_confirmation: false,
            decided_at: Utc::now(),
        };
        assert!(decision.has_factor(&Factor::BoundsClamp));
        assert!(!decision.has_factor(&Factor::RateLimited));
        assert!(decision.is_auto_applicable());
    }
}
