//! Instructions emitted toward the execution collaborator.

use anyhow::Result;
use async_trait::async_trait;
use leverage_core::types::{CloseReason, Side, SymbolId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// An order-level action the engine wants executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    Open {
        position_id: Uuid,
        symbol: SymbolId,
        side: Side,
        quantity: Decimal,
        leverage: Decimal,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    },
    PartialClose {
        position_id: Uuid,
        symbol: SymbolId,
        quantity: Decimal,
        price: Decimal,
        threshold_pct: Decimal,
    },
    UpdateStop {
        position_id: Uuid,
        symbol: SymbolId,
        stop_price: Decimal,
    },
    Close {
        position_id: Uuid,
        symbol: SymbolId,
        quantity: Decimal,
        price: Decimal,
        reason: CloseReason,
    },
}

impl Instruction {
    pub fn position_id(&self) -> Uuid {
        match self {
            Instruction::Open { position_id, .. }
            | Instruction::PartialClose { position_id, .. }
            | Instruction::UpdateStop { position_id, .. }
            | Instruction::Close { position_id, .. } => *position_id,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Instruction::Open { symbol, .. }
            | Instruction::PartialClose { symbol, .. }
            | Instruction::UpdateStop { symbol, .. }
            | Instruction::Close { symbol, .. } => symbol,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::Open { .. } => "open",
            Instruction::PartialClose { .. } => "partial_close",
            Instruction::UpdateStop { .. } => "update_stop",
            Instruction::Close { .. } => "close",
        }
    }
}

/// Receiver of engine instructions (order router, audit log, test recorder).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstructionSink: Send + Sync {
    async fn submit(&self, instruction: &Instruction) -> Result<()>;
}

/// Logs each instruction and accepts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl InstructionSink for LoggingSink {
    async fn submit(&self, instruction: &Instruction) -> Result<()> {
        let payload = serde_json::to_string(instruction)?;
        info!(
            kind = instruction.kind(),
            position_id = %instruction.position_id(),
            symbol = %instruction.symbol(),
            instruction = %payload,
            "Instruction emitted"
        );
        Ok(())
    }
}

/// In-memory instruction sink for testing and replay.
#[derive(Clone)]
pub struct MemoryInstructionSink {
    instructions: Arc<RwLock<Vec<Instruction>>>,
}

impl MemoryInstructionSink {
    pub fn new() -> Self {
        Self {
            instructions: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn instructions(&self) -> Vec<Instruction> {
        self.instructions.read().await.clone()
    }

    pub async fn for_position(&self, position_id: Uuid) -> Vec<Instruction> {
        self.instructions
            .read()
            .await
            .iter()
            .filter(|i| i.position_id() == position_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.instructions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instructions.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.instructions.write().await.clear();
    }
}

impl Default for MemoryInstructionSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstructionSink for MemoryInstructionSink {
    async fn submit(&self, instruction: &Instruction) -> Result<()> {
        let mut instructions = self.instructions.write().await;
        instructions.push(instruction.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn update(position_id: Uuid) -> Instruction {
        Instruction::UpdateStop {
            position_id,
            symbol: "BTCUSDT".to_string(),
            stop_price: dec!(50100),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemoryInstructionSink::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        sink.submit(&update(a)).await.unwrap();
        sink.submit(&update(b)).await.unwrap();
        sink.submit(&update(a)).await.unwrap();

        assert_eq!(sink.len().await, 3);
        assert_eq!(sink.for_position(a).await.len(), 2);
        assert_eq!(sink.instructions().await[1].position_id(), b);

        sink.clear().await;
        assert!(sink.is_empty().await);
    }

    #[test]
    fn test_instruction_serializes_tagged() {
        let json = serde_json::to_value(update(Uuid::nil())).unwrap();
        assert_eq!(json["type"], "update_stop");
        assert_eq!(json["symbol"], "BTCUSDT");
        assert_eq!(json["stop_price"], "50100");
    }

    #[tokio::test]
    async fn test_logging_sink_accepts() {
        assert!(LoggingSink.submit(&update(Uuid::new_v4())).await.is_ok());
    }
}
