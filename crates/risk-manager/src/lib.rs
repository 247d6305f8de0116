//! Risk Manager
//!
//! Leverage adjustment, safety controls, sizing, stop levels, trailing stops,
//! and circuit breakers for leveraged futures entries.

pub mod adjustment;
pub mod circuit_breaker;
pub mod position_sizer;
pub mod safety;
pub mod stop_levels;
pub mod trailing_stop;

pub use adjustment::{RiskAdjustment, RiskAdjustmentEngine};
pub use circuit_breaker::{
    BreakerEvent, BreakerKey, CircuitBreakerMonitor, CircuitBreakerState, TradeResult, TripReason,
};
pub use position_sizer::{PositionSizer, SizeCap, SizedOrder, SizingRequest};
pub use safety::{AppliedLeverage, LeverageSafetyController, SafetyInput};
pub use stop_levels::{StopLevelCalculator, StopLevels, StopSource};
pub use trailing_stop::{TrailingEvent, TrailingPhase, TrailingStopState};
