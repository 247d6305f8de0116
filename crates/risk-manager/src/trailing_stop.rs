//! Per-position trailing stop.
//!
//! The state machine runs `Inactive → Active → TimeframeUpgraded → Closed`.
//! Each tick the candidate stop is recomputed from the favorable extreme and
//! the current ATR, then ratcheted: once activated, the stop only ever moves
//! in the risk-reducing direction.

use leverage_core::config::{TrailingMode, TrailingStopConfig};
use leverage_core::types::{MarketRegime, MarketTick, Position, Side, Timeframe};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingPhase {
    Inactive,
    Active,
    TimeframeUpgraded,
    Closed,
}

/// Observable transitions produced by [`TrailingStopState::on_tick`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrailingEvent {
    Activated {
        stop_price: Decimal,
        extreme: Decimal,
    },
    Tightened {
        previous: Decimal,
        stop_price: Decimal,
    },
    /// A recomputed stop would have increased risk and was discarded.
    LooseningRejected {
        candidate: Decimal,
        stop_price: Decimal,
    },
    TimeframeUpgraded {
        from: Timeframe,
        to: Timeframe,
    },
    StopHit {
        stop_price: Decimal,
        price: Decimal,
    },
}

/// One-time switch of the ATR reference timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeframeUpgrade {
    pub trigger_pct: Decimal,
    pub target: Timeframe,
}

/// Trailing-stop state owned by a single position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStopState {
    pub position_id: Uuid,
    pub mode: TrailingMode,
    /// Regime the mode was selected for.
    pub regime: MarketRegime,
    pub phase: TrailingPhase,
    pub activated: bool,
    pub stop_price: Option<Decimal>,
    /// Best price seen since entry.
    pub highest_favorable_price: Decimal,
    pub current_timeframe: Timeframe,
    pub last_update_tick: Option<u64>,
    pub upgrade: Option<TimeframeUpgrade>,
}

impl TrailingStopState {
    /// Select the mode for the position's entry regime.
    pub fn for_position(position: &Position, config: &TrailingStopConfig) -> Self {
        let regime = position.entry_regime;
        let upgrade = if config.timeframe_upgrade.enabled {
            config
                .timeframe_upgrade
                .upgrade_timeframe_map
                .get(&config.base_timeframe)
                .map(|target| TimeframeUpgrade {
                    trigger_pct: config.timeframe_upgrade.trigger_pct,
                    target: *target,
                })
        } else {
            None
        };

        Self {
            position_id: position.id,
            mode: config.regimes.get(regime).clone(),
            regime,
            phase: TrailingPhase::Inactive,
            activated: false,
            stop_price: None,
            highest_favorable_price: position.entry_price,
            current_timeframe: config.base_timeframe,
            last_update_tick: None,
            upgrade,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == TrailingPhase::Closed
    }

    /// Advance the machine by one tick.
    pub fn on_tick(&mut self, position: &Position, tick: &MarketTick) -> Vec<TrailingEvent> {
        let mut events = Vec::new();
        if self.is_closed() || position.entry_price <= Decimal::ZERO {
            return events;
        }
        // Out-of-order feed ticks are dropped; unsequenced ticks leave the watermark alone
        if tick.sequence > 0 {
            if self.last_update_tick.is_some_and(|last| tick.sequence <= last) {
                return events;
            }
            self.last_update_tick = Some(tick.sequence);
        }

        let side = position.side;
        let entry = position.entry_price;
        self.highest_favorable_price = side.best_of(self.highest_favorable_price, tick.price);
        let extreme = self.highest_favorable_price;
        let excursion_pct = side.favorable_move(entry, extreme) / entry * Decimal::ONE_HUNDRED;

        if self.phase == TrailingPhase::Active {
            if let Some(upgrade) = self.upgrade.filter(|u| excursion_pct >= u.trigger_pct) {
                let from = self.current_timeframe;
                self.current_timeframe = upgrade.target;
                self.phase = TrailingPhase::TimeframeUpgraded;
                info!(
                    position_id = %self.position_id,
                    from = %from,
                    to = %upgrade.target,
                    excursion_pct = %excursion_pct,
                    "Trailing stop reference timeframe upgraded"
                );
                events.push(TrailingEvent::TimeframeUpgraded {
                    from,
                    to: upgrade.target,
                });
            }
        }

        let atr = tick.atr(self.current_timeframe);

        match self.stop_price {
            None => {
                if self.activation_reached(side, entry, extreme, excursion_pct, atr) {
                    if let Some(stop) = self.candidate(side, extreme, excursion_pct, atr) {
                        self.stop_price = Some(stop);
                        self.activated = true;
                        self.phase = TrailingPhase::Active;
                        info!(
                            position_id = %self.position_id,
                            stop_price = %stop,
                            extreme = %extreme,
                            "Trailing stop activated"
                        );
                        events.push(TrailingEvent::Activated {
                            stop_price: stop,
                            extreme,
                        });
                    }
                }
            }
            Some(current) => {
                if let Some(candidate) = self.candidate(side, extreme, excursion_pct, atr) {
                    if side.is_tighter(candidate, current) {
                        self.stop_price = Some(candidate);
                        debug!(
                            position_id = %self.position_id,
                            previous = %current,
                            stop_price = %candidate,
                            "Trailing stop tightened"
                        );
                        events.push(TrailingEvent::Tightened {
                            previous: current,
                            stop_price: candidate,
                        });
                    } else if side.is_tighter(current, candidate) {
                        warn!(
                            position_id = %self.position_id,
                            candidate = %candidate,
                            stop_price = %current,
                            "Rejected trailing stop loosening"
                        );
                        events.push(TrailingEvent::LooseningRejected {
                            candidate,
                            stop_price: current,
                        });
                    }
                }
            }
        }

        if let Some(stop) = self.stop_price {
            if side.stop_crossed(tick.price, stop) {
                self.phase = TrailingPhase::Closed;
                info!(
                    position_id = %self.position_id,
                    stop_price = %stop,
                    price = %tick.price,
                    "Trailing stop hit"
                );
                events.push(TrailingEvent::StopHit {
                    stop_price: stop,
                    price: tick.price,
                });
            }
        }

        events
    }

    /// Mark closed after an external full close. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.phase = TrailingPhase::Closed;
        true
    }

    /// Replace the mode explicitly; the current stop is kept and still ratchets.
    pub fn reconfigure(&mut self, mode: TrailingMode, regime: MarketRegime) {
        info!(
            position_id = %self.position_id,
            from = %self.regime,
            to = %regime,
            "Trailing stop reconfigured"
        );
        self.mode = mode;
        self.regime = regime;
    }

    fn activation_reached(
        &self,
        side: Side,
        entry: Decimal,
        extreme: Decimal,
        excursion_pct: Decimal,
        atr: Option<Decimal>,
    ) -> bool {
        match &self.mode {
            TrailingMode::Percentage { activation_pct, .. } => excursion_pct >= *activation_pct,
            TrailingMode::Step { profit_steps, .. } => profit_steps
                .first()
                .is_some_and(|first| excursion_pct >= *first),
            TrailingMode::AtrBased {
                activation_threshold,
                ..
            } => match atr {
                Some(atr) => side.favorable_move(entry, extreme) / atr >= *activation_threshold,
                None => false,
            },
        }
    }

    /// Stop implied by the current extreme, or None when it cannot be computed.
    fn candidate(
        &self,
        side: Side,
        extreme: Decimal,
        excursion_pct: Decimal,
        atr: Option<Decimal>,
    ) -> Option<Decimal> {
        let distance = match &self.mode {
            TrailingMode::Percentage { callback_pct, .. } => extreme * *callback_pct / Decimal::ONE_HUNDRED,
            TrailingMode::Step {
                profit_steps,
                callback_steps,
            } => {
                let reached = profit_steps.iter().take_while(|step| excursion_pct >= **step).count();
                let callback = callback_steps.get(reached.checked_sub(1)?)?;
                extreme * *callback / Decimal::ONE_HUNDRED
            }
            TrailingMode::AtrBased { multiplier, .. } => atr? * *multiplier,
        };
        Some(side.offset_against(extreme, distance))
    }
}
