//! Leverage Risk: risk control for leveraged futures trading
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the internal crates. For actual functionality, use them directly:
//!
//! - `leverage-core`: Domain types, risk profile configuration, errors
//! - `risk-manager`: Adjustment engine, safety controller, sizing, stops, circuit breaker
//! - `trading-engine`: Risk coordinator, position tracking, instruction sinks

pub use leverage_core as core;
pub use risk_manager as risk;
pub use trading_engine as trading;
