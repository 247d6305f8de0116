//! Circuit breaker for halting new risk after adverse streaks.
//!
//! A pause only blocks new entries. Open positions keep being managed by
//! their stops while the breaker is tripped.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use leverage_core::config::{BreakerScope, CircuitBreakerConfig};
use leverage_core::types::SymbolId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Reason for circuit breaker activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    /// Too many consecutive losses.
    ConsecutiveLosses,
    /// Net realized loss for the day exceeded the threshold.
    DailyLossLimit,
    /// Manual activation.
    Manual,
}

/// Which state a trade or query maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerKey {
    Account,
    Symbol(SymbolId),
}

/// A fully closed trade reported to the breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub symbol: SymbolId,
    pub pnl: Decimal,
    /// Realized P&L as a percentage of account balance.
    pub pnl_pct: Decimal,
    pub closed_at: DateTime<Utc>,
}

impl TradeResult {
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }

    pub fn is_loss(&self) -> bool {
        self.pnl < Decimal::ZERO
    }
}

/// Pause transitions, published for logging and notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BreakerEvent {
    PauseStarted {
        key: BreakerKey,
        reason: TripReason,
        paused_until: DateTime<Utc>,
    },
    /// Pause cleared early by a profitable trade or an explicit reset.
    PauseLifted { key: BreakerKey },
    /// Pause window elapsed.
    PauseExpired { key: BreakerKey },
}

/// Current state of the circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    /// Count of consecutive losing trades.
    pub consecutive_losses: u32,
    /// Today's net realized P&L, in percent of balance.
    pub daily_pnl_pct: Decimal,
    /// `max(0, -daily_pnl_pct)`.
    pub daily_loss_pct: Decimal,
    /// New entries are blocked until this time.
    pub paused_until: Option<DateTime<Utc>>,
    pub trip_reason: Option<TripReason>,
    /// Multiplier applied to engine risk after a trip.
    pub size_reduction_factor: Decimal,
    pub trading_day: Option<NaiveDate>,
    /// Total trips today.
    pub trips_today: u32,
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            consecutive_losses: 0,
            daily_pnl_pct: Decimal::ZERO,
            daily_loss_pct: Decimal::ZERO,
            paused_until: None,
            trip_reason: None,
            size_reduction_factor: Decimal::ONE,
            trading_day: None,
            trips_today: 0,
            last_trade_at: None,
        }
    }
}

impl CircuitBreakerState {
    pub fn is_paused_at(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.is_some_and(|until| now < until)
    }

    fn roll_day(&mut self, day: NaiveDate) {
        if self.trading_day != Some(day) {
            self.trading_day = Some(day);
            self.daily_pnl_pct = Decimal::ZERO;
            self.daily_loss_pct = Decimal::ZERO;
            self.trips_today = 0;
        }
    }
}

/// Loss-streak and daily-loss monitor shared by every evaluator.
pub struct CircuitBreakerMonitor {
    config: CircuitBreakerConfig,
    states: RwLock<HashMap<BreakerKey, CircuitBreakerState>>,
    /// Fast path flag: some scope is paused.
    is_tripped: AtomicBool,
    events: broadcast::Sender<BreakerEvent>,
}

impl CircuitBreakerMonitor {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            states: RwLock::new(HashMap::new()),
            is_tripped: AtomicBool::new(false),
            events,
        }
    }

    /// Receive pause transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Check if any scope is halted (fast path; expiry is resolved by `check_allowed`).
    pub fn is_tripped(&self) -> bool {
        self.is_tripped.load(Ordering::SeqCst)
    }

    /// State key for a symbol under the configured scope.
    pub fn key_for(&self, symbol: &str) -> BreakerKey {
        match self.config.scope {
            BreakerScope::Account => BreakerKey::Account,
            BreakerScope::Symbol => BreakerKey::Symbol(symbol.to_string()),
        }
    }

    /// Record a closed trade and apply the trip and reset rules.
    pub async fn on_trade_closed(&self, result: &TradeResult) -> Vec<BreakerEvent> {
        if !self.config.enabled {
            return Vec::new();
        }

        let key = self.key_for(&result.symbol);
        let mut events = Vec::new();
        let mut states = self.states.write().await;
        let state = states.entry(key.clone()).or_default();

        state.roll_day(result.closed_at.date_naive());
        state.last_trade_at = Some(result.closed_at);
        state.daily_pnl_pct += result.pnl_pct;
        state.daily_loss_pct = (-state.daily_pnl_pct).max(Decimal::ZERO);

        if result.is_loss() {
            state.consecutive_losses += 1;
        } else if result.is_win() {
            state.consecutive_losses = 0;
            let daily_ok = state.daily_loss_pct < self.config.daily_loss_threshold_pct;
            // Manual trips are only cleared by `reset` or expiry
            let manual = state.trip_reason == Some(TripReason::Manual);
            if self.config.reset_after_profitable_trade && daily_ok && !manual {
                if state.paused_until.is_some() {
                    state.paused_until = None;
                    state.trip_reason = None;
                    info!(key = ?key, "Profitable trade, circuit breaker pause lifted");
                    events.push(BreakerEvent::PauseLifted { key: key.clone() });
                }
                state.size_reduction_factor = Decimal::ONE;
            }
        }

        if let Some(reason) = self.check_thresholds(state) {
            if !state.is_paused_at(result.closed_at) {
                events.push(self.trip_internal(&key, state, reason, result.closed_at));
            } else if result.is_loss() {
                let until = result.closed_at + Duration::minutes(self.config.pause_duration_minutes);
                if state.paused_until.is_some_and(|current| until > current) {
                    state.paused_until = Some(until);
                }
                warn!(
                    key = ?key,
                    reason = ?reason,
                    paused_until = ?state.paused_until,
                    "Loss while paused, pause extended"
                );
            }
        }

        self.refresh_flag(&states);
        drop(states);
        self.publish(&events);
        events
    }

    /// Whether a new entry for `symbol` is allowed at `now`.
    pub async fn check_allowed(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return true;
        }

        let key = self.key_for(symbol);
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(&key) else {
            return true;
        };

        match state.paused_until {
            Some(until) if now < until => false,
            Some(_) => {
                state.paused_until = None;
                state.trip_reason = None;
                info!(key = ?key, "Circuit breaker pause expired, trading resumed");
                self.refresh_flag(&states);
                drop(states);
                self.publish(&[BreakerEvent::PauseExpired { key }]);
                true
            }
            None => true,
        }
    }

    /// Risk multiplier for new entries; 1 unless reduced by a trip.
    pub async fn size_factor(&self, symbol: &str) -> Decimal {
        if !self.config.enabled {
            return Decimal::ONE;
        }
        let key = self.key_for(symbol);
        self.states
            .read()
            .await
            .get(&key)
            .map(|s| s.size_reduction_factor)
            .unwrap_or(Decimal::ONE)
    }

    /// Get current state for the scope `symbol` maps to.
    pub async fn snapshot(&self, symbol: &str) -> CircuitBreakerState {
        let key = self.key_for(symbol);
        self.states.read().await.get(&key).cloned().unwrap_or_default()
    }

    /// Manually trip the circuit breaker.
    pub async fn manual_trip(&self, symbol: &str, note: &str, now: DateTime<Utc>) -> BreakerEvent {
        let key = self.key_for(symbol);
        let mut states = self.states.write().await;
        let state = states.entry(key.clone()).or_default();
        state.roll_day(now.date_naive());

        warn!(key = ?key, note = %note, "Manual circuit breaker trip");
        let event = self.trip_internal(&key, state, TripReason::Manual, now);

        self.refresh_flag(&states);
        drop(states);
        self.publish(std::slice::from_ref(&event));
        event
    }

    /// Clear the pause, streak, and size reduction for a scope.
    pub async fn reset(&self, symbol: &str) {
        let key = self.key_for(symbol);
        let mut states = self.states.write().await;
        let lifted = match states.get_mut(&key) {
            Some(state) => {
                let was_paused = state.paused_until.is_some();
                state.paused_until = None;
                state.trip_reason = None;
                state.consecutive_losses = 0;
                state.size_reduction_factor = Decimal::ONE;
                was_paused
            }
            None => false,
        };

        self.refresh_flag(&states);
        drop(states);
        info!(key = ?key, "Circuit breaker reset");
        if lifted {
            self.publish(&[BreakerEvent::PauseLifted { key }]);
        }
    }

    /// Get current configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    // Private methods

    fn check_thresholds(&self, state: &CircuitBreakerState) -> Option<TripReason> {
        if state.consecutive_losses >= self.config.max_consecutive_losses {
            return Some(TripReason::ConsecutiveLosses);
        }
        if state.daily_loss_pct >= self.config.daily_loss_threshold_pct {
            return Some(TripReason::DailyLossLimit);
        }
        None
    }

    fn trip_internal(
        &self,
        key: &BreakerKey,
        state: &mut CircuitBreakerState,
        reason: TripReason,
        now: DateTime<Utc>,
    ) -> BreakerEvent {
        let paused_until = now + Duration::minutes(self.config.pause_duration_minutes);

        state.paused_until = Some(paused_until);
        state.trip_reason = Some(reason.clone());
        state.trips_today += 1;
        if self.config.reduce_position_size_after_loss {
            state.size_reduction_factor = self.config.size_reduction_factor;
        }

        error!(
            key = ?key,
            reason = ?reason,
            paused_until = %paused_until,
            daily_loss_pct = %state.daily_loss_pct,
            consecutive_losses = state.consecutive_losses,
            "Circuit breaker TRIPPED - new entries halted"
        );

        BreakerEvent::PauseStarted {
            key: key.clone(),
            reason,
            paused_until,
        }
    }

    fn refresh_flag(&self, states: &HashMap<BreakerKey, CircuitBreakerState>) {
        let any = states.values().any(|s| s.paused_until.is_some());
        self.is_tripped.store(any, Ordering::SeqCst);
    }

    fn publish(&self, events: &[BreakerEvent]) {
        for event in events {
            // No subscribers is fine
            let _ = self.events.send(event.clone());
        }
    }
}
