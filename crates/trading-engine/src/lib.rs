//! Trading Engine
//!
//! Per-tick risk control flow for leveraged futures: entry evaluation,
//! open position tracking, and the instruction seam toward execution.

pub mod coordinator;
pub mod position_manager;
pub mod sink;

pub use coordinator::{
    AccountState, BlockReason, EntryDecision, EntryPlan, EntryRequest, RiskCoordinator, TradeIntent,
};
pub use position_manager::{ManagedPosition, PositionManager, PositionManagerStats};
pub use sink::{Instruction, InstructionSink, LoggingSink, MemoryInstructionSink};
