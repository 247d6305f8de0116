//! Error types for the leverage risk engine.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{}", format_validation_errors(.errors))]
    ConfigValidation { errors: Vec<String> },

    #[error("Stop distance {per_unit_risk} is below the minimum of {minimum}")]
    InsufficientStopDistance {
        per_unit_risk: Decimal,
        minimum: Decimal,
    },

    #[error("Position not found: {0}")]
    PositionNotFound(Uuid),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn format_validation_errors(errors: &[String]) -> String {
    format!(
        "Configuration validation failed ({} error{}):\n  - {}",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" },
        errors.join("\n  - ")
    )
}
