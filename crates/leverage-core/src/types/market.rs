//! Market feed types: evaluation ticks and indicator timeframes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::SymbolId;

/// Candle timeframe an indicator (ATR) is computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" | "60m" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" | "24h" => Ok(Self::D1),
            other => Err(format!("unknown timeframe: {other}")),
        }
    }
}

/// One evaluation tick for a symbol: latest price plus ATR per timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: SymbolId,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    /// Monotonic tick counter from the feed.
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub atr: BTreeMap<Timeframe, Decimal>,
}

impl MarketTick {
    pub fn new(symbol: impl Into<SymbolId>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
            sequence: 0,
            atr: BTreeMap::new(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_atr(mut self, timeframe: Timeframe, atr: Decimal) -> Self {
        self.atr.insert(timeframe, atr);
        self
    }

    /// ATR for a timeframe, ignoring non-positive readings.
    pub fn atr(&self, timeframe: Timeframe) -> Option<Decimal> {
        self.atr
            .get(&timeframe)
            .copied()
            .filter(|v| *v > Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tick_deserializes_atr_by_timeframe() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "price": 50000,
            "timestamp": "2026-01-01T00:00:00Z",
            "sequence": 7,
            "atr": { "1h": 250, "4h": 600 }
        }"#;
        let tick: MarketTick = serde_json::from_str(json).unwrap();
        assert_eq!(tick.sequence, 7);
        assert_eq!(tick.atr(Timeframe::H1), Some(dec!(250)));
        assert_eq!(tick.atr(Timeframe::H4), Some(dec!(600)));
        assert_eq!(tick.atr(Timeframe::D1), None);
    }

    #[test]
    fn test_zero_atr_is_treated_as_missing() {
        let tick = MarketTick::new("BTCUSDT", dec!(100), Utc::now()).with_atr(Timeframe::H1, dec!(0));
        assert_eq!(tick.atr(Timeframe::H1), None);
    }

    #[test]
    fn test_timeframe_ordering_and_parsing() {
        assert!(Timeframe::H1 < Timeframe::H4);
        assert_eq!("60m".parse::<Timeframe>(), Ok(Timeframe::H1));
        assert_eq!(Timeframe::H4.to_string(), "4h");
    }
}
