//! Leveraged futures position state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{MarketRegime, SymbolId};
use crate::{Error, Result};

/// Direction of a futures position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Price movement from `from` to `to`, positive when it is profitable.
    pub fn favorable_move(&self, from: Decimal, to: Decimal) -> Decimal {
        (to - from) * self.sign()
    }

    /// The more profitable of two prices.
    pub fn best_of(&self, a: Decimal, b: Decimal) -> Decimal {
        match self {
            Side::Long => a.max(b),
            Side::Short => a.min(b),
        }
    }

    /// Whether moving a stop from `current` to `candidate` reduces risk.
    pub fn is_tighter(&self, candidate: Decimal, current: Decimal) -> bool {
        match self {
            Side::Long => candidate > current,
            Side::Short => candidate < current,
        }
    }

    /// Price at `distance` on the losing side of `reference`.
    pub fn offset_against(&self, reference: Decimal, distance: Decimal) -> Decimal {
        reference - distance * self.sign()
    }

    /// Price at `distance` on the profitable side of `reference`.
    pub fn offset_toward(&self, reference: Decimal, distance: Decimal) -> Decimal {
        reference + distance * self.sign()
    }

    /// Whether `price` has crossed a protective stop.
    pub fn stop_crossed(&self, price: Decimal, stop: Decimal) -> bool {
        match self {
            Side::Long => price <= stop,
            Side::Short => price >= stop,
        }
    }

    /// Whether `price` has reached a profit target.
    pub fn target_reached(&self, price: Decimal, target: Decimal) -> bool {
        match self {
            Side::Long => price >= target,
            Side::Short => price <= target,
        }
    }
}

/// One rung of the partial take-profit ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialExit {
    /// Favorable excursion from entry, in percent, that fires this rung.
    pub threshold_pct: Decimal,
    /// Share of the original quantity to close.
    pub size_fraction: Decimal,
}

/// A ladder rung that has fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialExitFill {
    pub threshold_pct: Decimal,
    pub size_fraction: Decimal,
    pub quantity: Decimal,
    pub price: Decimal,
    pub filled_at: DateTime<Utc>,
}

/// Lifecycle state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Open,
    Closed,
}

/// Why a position was fully closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    /// Every ladder rung fired and nothing is left open.
    LadderComplete,
    /// Closed by the exchange or an operator.
    External,
}

/// A leveraged position owned by the engine instance managing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: SymbolId,
    pub side: Side,
    pub entry_price: Decimal,
    /// Quantity at entry; ladder fractions refer to this.
    pub original_quantity: Decimal,
    /// Quantity still open.
    pub quantity: Decimal,
    pub leverage: Decimal,
    /// Exchange quantity step; ladder fills are rounded down to it.
    #[serde(default)]
    pub lot_size: Option<Decimal>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub partial_exits_remaining: Vec<PartialExit>,
    pub partial_exits_filled: Vec<PartialExitFill>,
    /// Regime at entry; fixes trailing-stop parameters for the position's life.
    pub entry_regime: MarketRegime,
    pub opened_at: DateTime<Utc>,
    pub state: PositionState,
    /// P&L realized so far through partial and full closes.
    pub realized_pnl: Decimal,
    pub exit_price: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
}

impl Position {
    /// Create a new open position.
    pub fn new(
        symbol: impl Into<SymbolId>,
        side: Side,
        entry_price: Decimal,
        quantity: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            entry_price,
            original_quantity: quantity,
            quantity,
            leverage: Decimal::ONE,
            lot_size: None,
            stop_loss,
            take_profit,
            partial_exits_remaining: Vec::new(),
            partial_exits_filled: Vec::new(),
            entry_regime: MarketRegime::NEUTRAL,
            opened_at,
            state: PositionState::Open,
            realized_pnl: Decimal::ZERO,
            exit_price: None,
            closed_at: None,
            close_reason: None,
        }
    }

    /// Attach a partial take-profit ladder (sorted by threshold).
    pub fn with_partial_exits(mut self, mut ladder: Vec<PartialExit>) -> Self {
        ladder.sort_by(|a, b| a.threshold_pct.cmp(&b.threshold_pct));
        self.partial_exits_remaining = ladder;
        self
    }

    pub fn with_regime(mut self, regime: MarketRegime) -> Self {
        self.entry_regime = regime;
        self
    }

    pub fn with_leverage(mut self, leverage: Decimal) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn with_lot_size(mut self, lot_size: Option<Decimal>) -> Self {
        self.lot_size = lot_size.filter(|l| *l > Decimal::ZERO);
        self
    }

    pub fn is_open(&self) -> bool {
        self.state == PositionState::Open
    }

    /// Favorable excursion of `price` from entry, in percent.
    pub fn excursion_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.side.favorable_move(self.entry_price, price) / self.entry_price * Decimal::ONE_HUNDRED
    }

    /// Unrealized P&L of the open quantity at `price`.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.side.favorable_move(self.entry_price, price) * self.quantity
    }

    /// Consume every ladder rung crossed at `price`.
    ///
    /// Each rung fires at most once; its quantity is a fraction of the
    /// original quantity, capped at what is still open. With a lot size the
    /// fill is rounded down to it; the last rung takes the whole remainder
    /// when the ladder covers the full quantity or less than one lot is left.
    pub fn take_partial_exits(&mut self, price: Decimal, at: DateTime<Utc>) -> Vec<PartialExitFill> {
        if !self.is_open() {
            return Vec::new();
        }

        let excursion = self.excursion_pct(price);
        let mut fills = Vec::new();

        while let Some(next) = self.partial_exits_remaining.first().copied() {
            if excursion < next.threshold_pct {
                break;
            }
            self.partial_exits_remaining.remove(0);

            let mut quantity = (self.original_quantity * next.size_fraction).min(self.quantity);
            if let Some(lot) = self.lot_size {
                quantity = (quantity / lot).floor() * lot;
                let ladder_fraction = self.partial_exits_filled.iter().map(|f| f.size_fraction).sum::<Decimal>()
                    + next.size_fraction;
                let last_rung = self.partial_exits_remaining.is_empty();
                if last_rung && (ladder_fraction >= Decimal::ONE || self.quantity - quantity < lot) {
                    quantity = self.quantity;
                }
            }
            if quantity <= Decimal::ZERO {
                continue;
            }

            self.quantity -= quantity;
            self.realized_pnl += self.side.favorable_move(self.entry_price, price) * quantity;

            let fill = PartialExitFill {
                threshold_pct: next.threshold_pct,
                size_fraction: next.size_fraction,
                quantity,
                price,
                filled_at: at,
            };
            debug!(
                position_id = %self.id,
                threshold_pct = %fill.threshold_pct,
                quantity = %fill.quantity,
                remaining = %self.quantity,
                "Partial take-profit rung fired"
            );
            self.partial_exits_filled.push(fill.clone());
            fills.push(fill);
        }

        fills
    }

    /// Move the stop-loss to `candidate` if that reduces risk.
    pub fn tighten_stop(&mut self, candidate: Decimal) -> bool {
        if self.side.is_tighter(candidate, self.stop_loss) {
            self.stop_loss = candidate;
            true
        } else {
            false
        }
    }

    pub fn is_stop_loss_hit(&self, price: Decimal) -> bool {
        self.side.stop_crossed(price, self.stop_loss)
    }

    pub fn is_take_profit_hit(&self, price: Decimal) -> bool {
        self.side.target_reached(price, self.take_profit)
    }

    /// Close the remaining quantity at `price`, returning total realized P&L.
    pub fn close(&mut self, price: Decimal, at: DateTime<Utc>, reason: CloseReason) -> Result<Decimal> {
        if !self.is_open() {
            return Err(Error::InvalidPosition(format!(
                "position {} is already closed",
                self.id
            )));
        }

        self.realized_pnl += self.side.favorable_move(self.entry_price, price) * self.quantity;
        self.quantity = Decimal::ZERO;
        self.state = PositionState::Closed;
        self.exit_price = Some(price);
        self.closed_at = Some(at);
        self.close_reason = Some(reason);

        Ok(self.realized_pnl)
    }
}
