//! Per-tick risk control flow.
//!
//! Entry: snapshot freshness → circuit breaker → adjustment engine →
//! breaker size factor → safety controller → stop levels → sizing → open.
//! Tick: partial ladder → trailing stop → stop-loss / take-profit → close,
//! with every closed trade reported to the circuit breaker.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use leverage_core::types::{
    CloseReason, Factor, LeverageDecision, MarketTick, Position, Reason, Side, SignalSnapshot, SymbolId,
};
use leverage_core::{Error, Result, RiskProfile};
use risk_manager::{
    CircuitBreakerMonitor, LeverageSafetyController, PositionSizer, RiskAdjustmentEngine, SafetyInput,
    SizedOrder, SizingRequest, StopLevelCalculator, StopLevels, TradeResult, TrailingEvent,
    TrailingStopState,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::position_manager::{ManagedPosition, PositionManager};
use crate::sink::{Instruction, InstructionSink};

/// Direction and conviction proposed by the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub side: Side,
    /// Strategy confidence in `[0, 1]`.
    pub confidence: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: Decimal,
    /// Leverage currently set on the exchange for the symbol, if known.
    #[serde(default)]
    pub current_leverage: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRequest {
    pub signal: SignalSnapshot,
    pub intent: TradeIntent,
    pub tick: MarketTick,
    pub account: AccountState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    CircuitBreaker,
    LowConfidence,
    MaxPositions,
    /// Snapshot older than one already evaluated for the symbol.
    Stale,
}

/// Everything decided for an opened entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPlan {
    pub position_id: Uuid,
    pub decision: LeverageDecision,
    pub levels: StopLevels,
    pub order: SizedOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum EntryDecision {
    Opened(EntryPlan),
    Blocked { reason: BlockReason },
    /// Leverage change too large to apply automatically; see [`RiskCoordinator::acknowledge`].
    AwaitingConfirmation(LeverageDecision),
}

#[derive(Debug, Default)]
struct TickOutcome {
    instructions: Vec<Instruction>,
    closed: Option<TradeResult>,
}

/// Wires the risk components together for one account.
pub struct RiskCoordinator {
    profile: Arc<RiskProfile>,
    engine: RiskAdjustmentEngine,
    safety: LeverageSafetyController,
    sizer: PositionSizer,
    stops: StopLevelCalculator,
    breaker: Arc<CircuitBreakerMonitor>,
    positions: PositionManager,
    sink: Arc<dyn InstructionSink>,
    /// Newest snapshot timestamp evaluated per symbol.
    latest_snapshot: DashMap<SymbolId, DateTime<Utc>>,
}

impl RiskCoordinator {
    pub fn new(profile: Arc<RiskProfile>, sink: Arc<dyn InstructionSink>) -> Self {
        Self {
            engine: RiskAdjustmentEngine::new(),
            safety: LeverageSafetyController::new(profile.safety.clone()),
            sizer: PositionSizer::new(profile.sizing.clone()),
            stops: StopLevelCalculator::new(),
            breaker: Arc::new(CircuitBreakerMonitor::new(profile.circuit_breaker.clone())),
            positions: PositionManager::new(),
            sink,
            latest_snapshot: DashMap::new(),
            profile,
        }
    }

    pub fn profile(&self) -> &RiskProfile {
        &self.profile
    }

    pub fn breaker(&self) -> &Arc<CircuitBreakerMonitor> {
        &self.breaker
    }

    pub fn safety(&self) -> &LeverageSafetyController {
        &self.safety
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    /// Decide whether and how to open a position for a proposed trade.
    pub async fn evaluate_entry(&self, request: EntryRequest) -> Result<EntryDecision> {
        let EntryRequest {
            signal,
            intent,
            tick,
            account,
        } = request;
        let symbol = signal.symbol.clone();
        let now = tick.timestamp;

        if tick.symbol != symbol {
            return Err(Error::InvalidPosition(format!(
                "tick for {} does not match signal for {}",
                tick.symbol, symbol
            )));
        }

        if !self.record_snapshot(&signal) {
            debug!(symbol = %symbol, timestamp = %signal.timestamp, "Discarding stale snapshot");
            return Ok(blocked(BlockReason::Stale));
        }
        if !self.breaker.check_allowed(&symbol, now).await {
            info!(symbol = %symbol, "Entry blocked by circuit breaker");
            return Ok(blocked(BlockReason::CircuitBreaker));
        }
        if intent.confidence < self.profile.entry.min_confidence {
            debug!(
                symbol = %symbol,
                confidence = %intent.confidence,
                minimum = %self.profile.entry.min_confidence,
                "Entry confidence below minimum"
            );
            return Ok(blocked(BlockReason::LowConfidence));
        }
        if self.positions.open_count_for_symbol(&symbol) >= self.profile.entry.max_open_positions_per_symbol {
            debug!(symbol = %symbol, "Maximum open positions reached");
            return Ok(blocked(BlockReason::MaxPositions));
        }

        let adjustment = self.engine.compute(&signal, &self.profile);
        let mut reasons = adjustment.reasons;
        let mut risk_pct = adjustment.risk_pct;

        let size_factor = self.breaker.size_factor(&symbol).await;
        if size_factor != Decimal::ONE {
            risk_pct *= size_factor;
            reasons.push(Reason::new(Factor::CircuitBreakerReduction, size_factor));
        }

        let decision = self
            .safety
            .apply(
                SafetyInput {
                    symbol: symbol.clone(),
                    raw_leverage: adjustment.target_leverage,
                    previous_leverage: account.current_leverage,
                    risk_pct,
                    drawdown_pct: signal.drawdown_pct,
                    bounds: adjustment.limits.bounds,
                    now,
                },
                reasons,
            )
            .await;
        if decision.requires_confirmation {
            return Ok(EntryDecision::AwaitingConfirmation(decision));
        }

        let regime = signal.regime_or_neutral();
        let atr = tick.atr(self.profile.stops.atr_timeframe);
        let levels = self.stops.levels(tick.price, intent.side, atr, regime, &self.profile);

        let order = self.sizer.size(&SizingRequest {
            balance: account.balance,
            risk_pct: decision.risk_pct,
            entry_price: tick.price,
            stop_price: levels.stop_loss,
            leverage: decision.leverage,
            max_position_size_usd: adjustment.limits.max_position_size_usd,
            tick_size: adjustment.limits.tick_size,
        })?;

        let position = Position::new(
            symbol.clone(),
            intent.side,
            tick.price,
            order.quantity,
            levels.stop_loss,
            levels.take_profit,
            now,
        )
        .with_partial_exits(levels.partial_exits.clone())
        .with_regime(regime)
        .with_leverage(decision.leverage)
        .with_lot_size(self.profile.sizing.lot_size);
        let position_id = position.id;

        let trailing = self
            .profile
            .trailing
            .enabled
            .then(|| TrailingStopState::for_position(&position, &self.profile.trailing));

        let open = Instruction::Open {
            position_id,
            symbol: symbol.clone(),
            side: intent.side,
            quantity: order.quantity,
            leverage: decision.leverage,
            entry_price: tick.price,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
        };

        let mut managed = ManagedPosition::new(position, trailing, account.balance, decision.clone());
        if tick.sequence > 0 {
            managed.last_sequence = Some(tick.sequence);
        }
        // Concurrent entries may have filled the last slot since the early check
        let max_open = self.profile.entry.max_open_positions_per_symbol;
        if !self.positions.add_position_within_limit(managed, max_open)? {
            debug!(symbol = %symbol, "Maximum open positions reached");
            return Ok(blocked(BlockReason::MaxPositions));
        }

        info!(
            position_id = %position_id,
            symbol = %symbol,
            side = ?intent.side,
            leverage = %decision.leverage,
            outcome = ?decision.outcome,
            quantity = %order.quantity,
            stop_loss = %levels.stop_loss,
            take_profit = %levels.take_profit,
            "Entry opened"
        );
        self.submit(&open).await;

        Ok(EntryDecision::Opened(EntryPlan {
            position_id,
            decision,
            levels,
            order,
        }))
    }

    /// Advance every open position of the tick's symbol.
    pub async fn on_tick(&self, tick: &MarketTick) -> Vec<Instruction> {
        let mut instructions = Vec::new();
        let mut closed = Vec::new();

        for id in self.positions.open_ids_for_symbol(&tick.symbol) {
            let Some(outcome) = self.positions.update_position(id, |managed| evaluate_tick(managed, tick)) else {
                continue;
            };
            instructions.extend(outcome.instructions);
            closed.extend(outcome.closed);
        }

        for instruction in &instructions {
            self.submit(instruction).await;
        }
        for result in &closed {
            self.breaker.on_trade_closed(result).await;
        }

        instructions
    }

    /// Finalize a position the exchange closed on its own.
    pub async fn on_external_close(
        &self,
        position_id: Uuid,
        exit_price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<TradeResult> {
        let result = self
            .positions
            .update_position(position_id, |managed| -> Result<TradeResult> {
                let pnl = managed.position.close(exit_price, at, CloseReason::External)?;
                if let Some(trailing) = managed.trailing.as_mut() {
                    trailing.close();
                }
                managed.touch(at);
                Ok(TradeResult {
                    symbol: managed.position.symbol.clone(),
                    pnl,
                    pnl_pct: managed.pnl_pct(),
                    closed_at: at,
                })
            })
            .ok_or(Error::PositionNotFound(position_id))??;

        info!(
            position_id = %position_id,
            symbol = %result.symbol,
            pnl = %result.pnl,
            "Position closed externally"
        );
        self.breaker.on_trade_closed(&result).await;
        Ok(result)
    }

    /// Apply a decision that was awaiting confirmation.
    pub async fn acknowledge(&self, decision: &LeverageDecision, now: DateTime<Utc>) -> LeverageDecision {
        self.safety.acknowledge(decision, now).await
    }

    // Private methods

    /// Returns false when `signal` is older than the newest seen for its symbol.
    fn record_snapshot(&self, signal: &SignalSnapshot) -> bool {
        let mut latest = self
            .latest_snapshot
            .entry(signal.symbol.clone())
            .or_insert(signal.timestamp);
        if signal.timestamp < *latest {
            return false;
        }
        *latest = signal.timestamp;
        true
    }

    async fn submit(&self, instruction: &Instruction) {
        if let Err(e) = self.sink.submit(instruction).await {
            error!(
                error = %e,
                kind = instruction.kind(),
                position_id = %instruction.position_id(),
                symbol = %instruction.symbol(),
                "Instruction sink failed"
            );
        }
    }
}

fn blocked(reason: BlockReason) -> EntryDecision {
    EntryDecision::Blocked { reason }
}

fn evaluate_tick(managed: &mut ManagedPosition, tick: &MarketTick) -> TickOutcome {
    let mut outcome = TickOutcome::default();
    if !managed.position.is_open() || managed.is_stale(tick) {
        return outcome;
    }
    if tick.sequence > 0 {
        managed.last_sequence = Some(tick.sequence);
    }
    managed.touch(tick.timestamp);

    let position_id = managed.position.id;
    let symbol = managed.position.symbol.clone();

    for fill in managed.position.take_partial_exits(tick.price, tick.timestamp) {
        outcome.instructions.push(Instruction::PartialClose {
            position_id,
            symbol: symbol.clone(),
            quantity: fill.quantity,
            price: fill.price,
            threshold_pct: fill.threshold_pct,
        });
    }
    if managed.position.quantity <= Decimal::ZERO {
        close_position(managed, tick, CloseReason::LadderComplete, &mut outcome);
        return outcome;
    }

    let events = match managed.trailing.as_mut() {
        Some(trailing) => trailing.on_tick(&managed.position, tick),
        None => Vec::new(),
    };
    let mut trailing_hit = false;
    for event in events {
        match event {
            TrailingEvent::Activated { stop_price, .. } | TrailingEvent::Tightened { stop_price, .. } => {
                if managed.position.tighten_stop(stop_price) {
                    outcome.instructions.push(Instruction::UpdateStop {
                        position_id,
                        symbol: symbol.clone(),
                        stop_price,
                    });
                }
            }
            TrailingEvent::StopHit { .. } => trailing_hit = true,
            TrailingEvent::LooseningRejected { .. } | TrailingEvent::TimeframeUpgraded { .. } => {}
        }
    }

    let reason = if trailing_hit {
        Some(CloseReason::TrailingStop)
    } else if managed.position.is_stop_loss_hit(tick.price) {
        Some(CloseReason::StopLoss)
    } else if managed.position.is_take_profit_hit(tick.price) {
        Some(CloseReason::TakeProfit)
    } else {
        None
    };
    if let Some(reason) = reason {
        close_position(managed, tick, reason, &mut outcome);
    }

    outcome
}

fn close_position(managed: &mut ManagedPosition, tick: &MarketTick, reason: CloseReason, outcome: &mut TickOutcome) {
    let position_id = managed.position.id;
    let quantity = managed.position.quantity;

    let pnl = match managed.position.close(tick.price, tick.timestamp, reason) {
        Ok(pnl) => pnl,
        Err(e) => {
            warn!(position_id = %position_id, error = %e, "Failed to close position");
            return;
        }
    };
    if let Some(trailing) = managed.trailing.as_mut() {
        trailing.close();
    }

    info!(
        position_id = %position_id,
        symbol = %managed.position.symbol,
        reason = ?reason,
        price = %tick.price,
        pnl = %pnl,
        "Position closed"
    );

    // A completed ladder leaves nothing to close on the exchange
    if quantity > Decimal::ZERO {
        outcome.instructions.push(Instruction::Close {
            position_id,
            symbol: managed.position.symbol.clone(),
            quantity,
            price: tick.price,
            reason,
        });
    }
    outcome.closed = Some(TradeResult {
        symbol: managed.position.symbol.clone(),
        pnl,
        pnl_pct: managed.pnl_pct(),
        closed_at: tick.timestamp,
    });
}
