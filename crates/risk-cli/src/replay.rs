//! Feed a recorded event stream through a coordinator.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use leverage_core::types::{MarketTick, SymbolId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use trading_engine::{EntryDecision, EntryRequest, RiskCoordinator};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    Entry(EntryRequest),
    Tick(MarketTick),
    /// Exchange closed every open position of the symbol.
    ExternalClose {
        symbol: SymbolId,
        exit_price: Decimal,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub events: usize,
    pub entries_opened: usize,
    pub entries_blocked: usize,
    pub awaiting_confirmation: usize,
    pub entries_rejected: usize,
    pub instructions: usize,
    pub trades_closed: usize,
}

/// Read a JSON array of events.
pub fn load_events(path: &Path) -> Result<Vec<ReplayEvent>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading events from {}", path.display()))?;
    let events = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(events)
}

/// Replay `events` in order. With `auto_confirm`, entries held for
/// confirmation are acknowledged and evaluated again.
pub async fn run(coordinator: &RiskCoordinator, events: Vec<ReplayEvent>, auto_confirm: bool) -> ReplaySummary {
    let mut summary = ReplaySummary::default();

    for event in events {
        summary.events += 1;
        match event {
            ReplayEvent::Entry(request) => {
                let symbol = request.signal.symbol.clone();
                let mut decision = coordinator.evaluate_entry(request.clone()).await;

                if auto_confirm {
                    if let Ok(EntryDecision::AwaitingConfirmation(pending)) = &decision {
                        coordinator.acknowledge(pending, pending.decided_at).await;
                        decision = coordinator.evaluate_entry(request).await;
                    }
                }

                match decision {
                    Ok(EntryDecision::Opened(plan)) => {
                        summary.entries_opened += 1;
                        summary.instructions += 1;
                        info!(
                            symbol = %symbol,
                            position_id = %plan.position_id,
                            leverage = %plan.decision.leverage,
                            quantity = %plan.order.quantity,
                            "Replay entry opened"
                        );
                    }
                    Ok(EntryDecision::Blocked { reason }) => {
                        summary.entries_blocked += 1;
                        info!(symbol = %symbol, reason = ?reason, "Replay entry blocked");
                    }
                    Ok(EntryDecision::AwaitingConfirmation(pending)) => {
                        summary.awaiting_confirmation += 1;
                        info!(
                            symbol = %symbol,
                            leverage = %pending.leverage,
                            "Replay entry awaiting confirmation"
                        );
                    }
                    Err(e) => {
                        summary.entries_rejected += 1;
                        warn!(symbol = %symbol, error = %e, "Replay entry rejected");
                    }
                }
            }
            ReplayEvent::Tick(tick) => {
                let instructions = coordinator.on_tick(&tick).await;
                summary.instructions += instructions.len();
                summary.trades_closed += instructions
                    .iter()
                    .filter(|i| matches!(i, trading_engine::Instruction::Close { .. }))
                    .count();
            }
            ReplayEvent::ExternalClose {
                symbol,
                exit_price,
                at,
            } => {
                for id in coordinator.positions().open_ids_for_symbol(&symbol) {
                    match coordinator.on_external_close(id, exit_price, at).await {
                        Ok(_) => summary.trades_closed += 1,
                        Err(e) => warn!(position_id = %id, error = %e, "Replay external close failed"),
                    }
                }
            }
        }
    }

    summary
}
