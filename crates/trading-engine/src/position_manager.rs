//! Open position tracking for the coordinator.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use leverage_core::types::{LeverageDecision, MarketTick, Position};
use leverage_core::{Error, Result};
use risk_manager::TrailingStopState;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::info;
use uuid::Uuid;

/// Position with the risk state that travels with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedPosition {
    /// The underlying position.
    pub position: Position,
    /// Trailing stop, absent when trailing is disabled.
    pub trailing: Option<TrailingStopState>,
    /// Account balance when the position was opened; trade P&L percent refers to it.
    pub balance_at_entry: Decimal,
    /// Leverage decision the entry was sized with.
    pub decision: LeverageDecision,
    /// Sequence of the last tick processed.
    pub last_sequence: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedPosition {
    pub fn new(
        position: Position,
        trailing: Option<TrailingStopState>,
        balance_at_entry: Decimal,
        decision: LeverageDecision,
    ) -> Self {
        let updated_at = position.opened_at;
        Self {
            position,
            trailing,
            balance_at_entry,
            decision,
            last_sequence: None,
            updated_at,
        }
    }

    /// Whether `tick` is older than one already processed.
    pub fn is_stale(&self, tick: &MarketTick) -> bool {
        tick.sequence > 0 && self.last_sequence.is_some_and(|last| tick.sequence <= last)
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    /// Realized P&L as a percentage of the balance at entry.
    pub fn pnl_pct(&self) -> Decimal {
        if self.balance_at_entry <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.position.realized_pnl / self.balance_at_entry * Decimal::ONE_HUNDRED
    }
}

/// Positions owned by one engine instance, keyed by position ID.
///
/// Each entry is only mutated under its map guard, so two ticks never
/// evaluate the same position concurrently.
pub struct PositionManager {
    positions: DashMap<Uuid, ManagedPosition>,
    /// Serializes limit checks with their insert.
    admission: Mutex<()>,
}

impl PositionManager {
    pub fn new() -> Self {
        Self {
            positions: DashMap::new(),
            admission: Mutex::new(()),
        }
    }

    /// Add a new position.
    pub fn add_position(&self, position: ManagedPosition) -> Result<()> {
        if !position.position.is_open() {
            return Err(Error::InvalidPosition(format!(
                "position {} is not open",
                position.position.id
            )));
        }
        if self.positions.contains_key(&position.position.id) {
            return Err(Error::InvalidPosition(format!(
                "position {} already tracked",
                position.position.id
            )));
        }

        info!(
            position_id = %position.position.id,
            symbol = %position.position.symbol,
            side = ?position.position.side,
            quantity = %position.position.quantity,
            leverage = %position.position.leverage,
            "Adding managed position"
        );

        self.positions.insert(position.position.id, position);
        Ok(())
    }

    /// Add a position unless its symbol already has `limit` open positions.
    ///
    /// Returns `Ok(false)` when the limit is reached.
    pub fn add_position_within_limit(&self, position: ManagedPosition, limit: usize) -> Result<bool> {
        let _guard = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        if self.open_count_for_symbol(&position.position.symbol) >= limit {
            return Ok(false);
        }
        self.add_position(position)?;
        Ok(true)
    }

    /// Get a position by ID.
    pub fn get_position(&self, id: Uuid) -> Option<ManagedPosition> {
        self.positions.get(&id).map(|p| p.clone())
    }

    /// Get all positions.
    pub fn all_positions(&self) -> Vec<ManagedPosition> {
        self.positions.iter().map(|e| e.value().clone()).collect()
    }

    /// Get open positions.
    pub fn open_positions(&self) -> Vec<ManagedPosition> {
        self.positions
            .iter()
            .filter(|e| e.value().position.is_open())
            .map(|e| e.value().clone())
            .collect()
    }

    /// IDs of open positions for a symbol.
    pub fn open_ids_for_symbol(&self, symbol: &str) -> Vec<Uuid> {
        self.positions
            .iter()
            .filter(|e| e.value().position.is_open() && e.value().position.symbol == symbol)
            .map(|e| *e.key())
            .collect()
    }

    pub fn open_count_for_symbol(&self, symbol: &str) -> usize {
        self.positions
            .iter()
            .filter(|e| e.value().position.is_open() && e.value().position.symbol == symbol)
            .count()
    }

    /// Mutate a position under its guard, returning the closure's result.
    pub fn update_position<R>(&self, id: Uuid, f: impl FnOnce(&mut ManagedPosition) -> R) -> Option<R> {
        self.positions.get_mut(&id).map(|mut entry| f(entry.value_mut()))
    }

    /// Remove a position.
    pub fn remove_position(&self, id: Uuid) -> Option<ManagedPosition> {
        self.positions.remove(&id).map(|(_, p)| p)
    }

    /// Drop closed positions, returning how many were removed.
    pub fn prune_closed(&self) -> usize {
        let before = self.positions.len();
        self.positions.retain(|_, p| p.position.is_open());
        before - self.positions.len()
    }

    /// Notional of open quantity at entry prices.
    pub fn open_notional(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|e| e.value().position.is_open())
            .map(|e| e.value().position.quantity * e.value().position.entry_price)
            .sum()
    }

    /// Get summary statistics.
    pub fn stats(&self) -> PositionManagerStats {
        let positions = self.all_positions();
        let open = positions.iter().filter(|p| p.position.is_open()).count();
        let total_realized_pnl = positions.iter().map(|p| p.position.realized_pnl).sum();

        PositionManagerStats {
            total_positions: positions.len(),
            open_positions: open,
            closed_positions: positions.len() - open,
            open_notional: self.open_notional(),
            total_realized_pnl,
        }
    }
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary statistics for position manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionManagerStats {
    pub total_positions: usize,
    pub open_positions: usize,
    pub closed_positions: usize,
    pub open_notional: Decimal,
    pub total_realized_pnl: Decimal,
}
