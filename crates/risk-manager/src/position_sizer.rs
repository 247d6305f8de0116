//! Risk-based position sizing.

use leverage_core::config::SizingConfig;
use leverage_core::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Inputs for sizing a new entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingRequest {
    pub balance: Decimal,
    /// Risk per trade, in percent of balance.
    pub risk_pct: Decimal,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub leverage: Decimal,
    pub max_position_size_usd: Decimal,
    pub tick_size: Decimal,
}

/// Which ceiling reduced the risk-based quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCap {
    /// `balance × leverage` notional ceiling.
    Margin,
    /// Symbol or tier `max_position_size_usd`.
    Liquidity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizedOrder {
    pub quantity: Decimal,
    pub notional: Decimal,
    /// Amount at risk if the stop is hit, before any cap.
    pub risk_amount: Decimal,
    /// Risk actually taken after caps and rounding, in percent of balance.
    pub effective_risk_pct: Decimal,
    pub cap: Option<SizeCap>,
}

/// Converts a risk budget and stop distance into an order quantity.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn size(&self, req: &SizingRequest) -> Result<SizedOrder> {
        if req.balance <= Decimal::ZERO {
            return Err(Error::InvalidPosition(format!(
                "balance must be positive, got {}",
                req.balance
            )));
        }
        if req.entry_price <= Decimal::ZERO {
            return Err(Error::InvalidPosition(format!(
                "entry price must be positive, got {}",
                req.entry_price
            )));
        }

        let risk_amount = req.balance * req.risk_pct / Decimal::ONE_HUNDRED;
        let per_unit_risk = (req.entry_price - req.stop_price).abs();
        let minimum = req.tick_size * Decimal::from(self.config.min_stop_distance_ticks);
        if per_unit_risk.is_zero() || per_unit_risk < minimum {
            return Err(Error::InsufficientStopDistance {
                per_unit_risk,
                minimum,
            });
        }

        let mut quantity = risk_amount / per_unit_risk;
        let mut cap = None;

        let margin_ceiling = req.balance * req.leverage / req.entry_price;
        if quantity > margin_ceiling {
            quantity = margin_ceiling;
            cap = Some(SizeCap::Margin);
        }

        let liquidity_ceiling = req.max_position_size_usd / req.entry_price;
        if quantity > liquidity_ceiling {
            quantity = liquidity_ceiling;
            cap = Some(SizeCap::Liquidity);
        }

        if let Some(lot) = self.config.lot_size.filter(|l| *l > Decimal::ZERO) {
            quantity = (quantity / lot).floor() * lot;
        }
        if quantity <= Decimal::ZERO {
            return Err(Error::InvalidPosition(
                "computed quantity rounds to zero".to_string(),
            ));
        }

        let notional = quantity * req.entry_price;
        let effective_risk_pct = quantity * per_unit_risk / req.balance * Decimal::ONE_HUNDRED;

        debug!(
            quantity = %quantity,
            notional = %notional,
            risk_amount = %risk_amount,
            cap = ?cap,
            "Position sized"
        );

        Ok(SizedOrder {
            quantity,
            notional,
            risk_amount,
            effective_risk_pct,
            cap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> SizingRequest {
        SizingRequest {
            balance: dec!(10000),
            risk_pct: dec!(1),
            entry_price: dec!(100),
            stop_price: dec!(98),
            leverage: dec!(10),
            max_position_size_usd: dec!(1000000),
            tick_size: dec!(0.01),
        }
    }

    fn sizer() -> PositionSizer {
        PositionSizer::new(SizingConfig::default())
    }

    #[test]
    fn test_risk_based_quantity() {
        let order = sizer().size(&request()).unwrap();
        // 100 at risk / 2 per unit
        assert_eq!(order.quantity, dec!(50));
        assert_eq!(order.notional, dec!(5000));
        assert_eq!(order.risk_amount, dec!(100));
        assert_eq!(order.effective_risk_pct, dec!(1));
        assert_eq!(order.cap, None);
    }

    #[test]
    fn test_margin_ceiling() {
        let mut req = request();
        req.leverage = dec!(1.5);
        req.stop_price = dec!(99.5);

        let order = sizer().size(&req).unwrap();
        // 10000 × 1.5 / 100
        assert_eq!(order.quantity, dec!(150));
        assert_eq!(order.cap, Some(SizeCap::Margin));
        assert!(order.effective_risk_pct < req.risk_pct);
    }

    #[test]
    fn test_liquidity_ceiling() {
        let mut req = request();
        req.max_position_size_usd = dec!(2000);

        let order = sizer().size(&req).unwrap();
        assert_eq!(order.quantity, dec!(20));
        assert_eq!(order.cap, Some(SizeCap::Liquidity));
    }

    #[test]
    fn test_zero_stop_distance_rejected() {
        let mut req = request();
        req.stop_price = req.entry_price;
        assert!(matches!(
            sizer().size(&req),
            Err(Error::InsufficientStopDistance { .. })
        ));
    }

    #[test]
    fn test_stop_inside_tick_threshold_rejected() {
        let mut req = request();
        // 5 ticks of 0.01 required
        req.stop_price = dec!(99.97);
        match sizer().size(&req) {
            Err(Error::InsufficientStopDistance {
                per_unit_risk,
                minimum,
            }) => {
                assert_eq!(per_unit_risk, dec!(0.03));
                assert_eq!(minimum, dec!(0.05));
            }
            other => panic!("expected InsufficientStopDistance, got {other:?}"),
        }
    }

    #[test]
    fn test_rounds_down_to_lot_size() {
        let sizer = PositionSizer::new(SizingConfig {
            lot_size: Some(dec!(0.5)),
            ..Default::default()
        });
        let mut req = request();
        req.stop_price = dec!(97);

        // 100 / 3 = 33.33.. → 33.0
        let order = sizer.size(&req).unwrap();
        assert_eq!(order.quantity, dec!(33.0));
    }

    #[test]
    fn test_short_side_uses_absolute_distance() {
        let mut req = request();
        req.stop_price = dec!(102);
        assert_eq!(sizer().size(&req).unwrap().quantity, dec!(50));
    }
}
