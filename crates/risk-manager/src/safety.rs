//! Leverage safety controller.
//!
//! Last gate before a leverage value reaches the exchange. Steps, in order:
//! bounds clamp, emergency deleveraging on rapid drawdown, rate limiting
//! inside the cooldown window, and manual confirmation for large relative
//! changes.

use chrono::{DateTime, Duration, Utc};
use leverage_core::config::{LeverageBounds, SafetyConfig};
use leverage_core::types::{DecisionOutcome, Factor, LeverageDecision, Reason, SymbolId};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One request to the controller.
#[derive(Debug, Clone)]
pub struct SafetyInput {
    pub symbol: SymbolId,
    /// Target leverage from the adjustment engine.
    pub raw_leverage: Decimal,
    /// Leverage currently set on the exchange, if known.
    pub previous_leverage: Option<Decimal>,
    pub risk_pct: Decimal,
    pub drawdown_pct: Decimal,
    pub bounds: LeverageBounds,
    pub now: DateTime<Utc>,
}

/// Last leverage the controller applied for a symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedLeverage {
    pub leverage: Decimal,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SafetyState {
    applied: HashMap<SymbolId, AppliedLeverage>,
    /// Account drawdown samples inside the rolling window.
    drawdown: VecDeque<(DateTime<Utc>, Decimal)>,
}

/// Serialized gate for leverage changes across all symbols.
pub struct LeverageSafetyController {
    config: SafetyConfig,
    state: Mutex<SafetyState>,
}

impl LeverageSafetyController {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SafetyState::default()),
        }
    }

    /// Turn a raw leverage target into a decision.
    ///
    /// `reasons` carries the engine's audit trail; the controller appends its
    /// own overrides to it.
    pub async fn apply(&self, input: SafetyInput, mut reasons: Vec<Reason>) -> LeverageDecision {
        let mut state = self.state.lock().await;
        let mut clamped = false;

        let bounded = input.bounds.clamp(input.raw_leverage);
        if bounded != input.raw_leverage {
            clamped = true;
            reasons.push(
                Reason::new(Factor::BoundsClamp, bounded)
                    .with_note(format!("raw leverage {}", input.raw_leverage)),
            );
        }

        let window_low = record_drawdown(
            &mut state.drawdown,
            input.now,
            input.drawdown_pct,
            Duration::minutes(self.config.rapid_drawdown_window_minutes),
        );
        let drawdown_rise = input.drawdown_pct - window_low;
        if drawdown_rise >= self.config.rapid_drawdown_threshold_pct {
            let leverage = input.bounds.clamp(bounded.min(self.config.emergency_leverage_cap));
            warn!(
                symbol = %input.symbol,
                drawdown_pct = %input.drawdown_pct,
                rise = %drawdown_rise,
                leverage = %leverage,
                "Rapid drawdown, emergency deleveraging"
            );
            reasons.push(
                Reason::new(Factor::EmergencyDeleverage, leverage)
                    .with_note(format!("drawdown rose {drawdown_rise} points inside window")),
            );
            state.applied.insert(
                input.symbol.clone(),
                AppliedLeverage {
                    leverage,
                    changed_at: input.now,
                },
            );
            return LeverageDecision {
                symbol: input.symbol,
                leverage,
                risk_pct: input.risk_pct,
                reasons,
                clamped: true,
                outcome: DecisionOutcome::EmergencyDeleveraged,
                requires_confirmation: false,
                decided_at: input.now,
            };
        }

        let last = state.applied.get(&input.symbol).copied();
        let previous = last.map(|a| a.leverage).or(input.previous_leverage);
        let mut leverage = bounded;
        let mut outcome = DecisionOutcome::Applied;

        if let Some(last) = last {
            let in_cooldown =
                input.now - last.changed_at < Duration::minutes(self.config.adjustment_cooldown_minutes);
            let step = self.config.max_adjustment_per_period;
            let delta = leverage - last.leverage;
            if in_cooldown && delta.abs() > step {
                let limited = if delta.is_sign_positive() {
                    last.leverage + step
                } else {
                    last.leverage - step
                };
                leverage = input.bounds.clamp(limited);
                outcome = DecisionOutcome::RateLimited;
                reasons.push(
                    Reason::new(Factor::RateLimited, leverage)
                        .with_note(format!("target {bounded}, step {step}")),
                );
                debug!(
                    symbol = %input.symbol,
                    target = %bounded,
                    leverage = %leverage,
                    "Leverage change rate limited"
                );
            }
        }

        if let Some(prev) = previous.filter(|p| *p > Decimal::ZERO) {
            let relative = (leverage - prev).abs() / prev;
            if relative > self.config.force_manual_confirmation_threshold {
                warn!(
                    symbol = %input.symbol,
                    previous = %prev,
                    leverage = %leverage,
                    relative_change = %relative,
                    "Leverage change requires manual confirmation"
                );
                reasons.push(Reason::new(Factor::ManualConfirmation, relative));
                return LeverageDecision {
                    symbol: input.symbol,
                    leverage,
                    risk_pct: input.risk_pct,
                    reasons,
                    clamped: true,
                    outcome: DecisionOutcome::AwaitingConfirmation,
                    requires_confirmation: true,
                    decided_at: input.now,
                };
            }
        }

        if previous == Some(leverage) && outcome == DecisionOutcome::Applied {
            outcome = DecisionOutcome::Unchanged;
        }
        if last.map(|a| a.leverage) != Some(leverage) {
            state.applied.insert(
                input.symbol.clone(),
                AppliedLeverage {
                    leverage,
                    changed_at: input.now,
                },
            );
        }

        LeverageDecision {
            symbol: input.symbol,
            leverage,
            risk_pct: input.risk_pct,
            reasons,
            clamped,
            outcome,
            requires_confirmation: false,
            decided_at: input.now,
        }
    }

    /// Apply a decision that was held for confirmation.
    pub async fn acknowledge(&self, decision: &LeverageDecision, now: DateTime<Utc>) -> LeverageDecision {
        let mut state = self.state.lock().await;
        state.applied.insert(
            decision.symbol.clone(),
            AppliedLeverage {
                leverage: decision.leverage,
                changed_at: now,
            },
        );

        info!(
            symbol = %decision.symbol,
            leverage = %decision.leverage,
            "Leverage change acknowledged"
        );

        LeverageDecision {
            outcome: DecisionOutcome::Applied,
            requires_confirmation: false,
            decided_at: now,
            ..decision.clone()
        }
    }

    pub async fn last_applied(&self, symbol: &str) -> Option<AppliedLeverage> {
        self.state.lock().await.applied.get(symbol).copied()
    }

    /// Forget a symbol's leverage history.
    pub async fn reset_symbol(&self, symbol: &str) {
        self.state.lock().await.applied.remove(symbol);
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }
}

/// Store a sample and return the lowest drawdown still inside the window.
///
/// The window includes the new sample, so the first sample after start-up
/// (or after the window empties) is its own baseline.
fn record_drawdown(
    samples: &mut VecDeque<(DateTime<Utc>, Decimal)>,
    now: DateTime<Utc>,
    drawdown_pct: Decimal,
    window: Duration,
) -> Decimal {
    while samples.front().is_some_and(|(at, _)| now - *at > window) {
        samples.pop_front();
    }
    samples.push_back((now, drawdown_pct));
    samples
        .iter()
        .map(|(_, d)| *d)
        .min()
        .unwrap_or(drawdown_pct)
}
