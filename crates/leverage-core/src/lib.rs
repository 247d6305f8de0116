//! Leverage Core Library
//!
//! Shared types, risk profile configuration, and error definitions for the
//! leveraged-futures risk engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::RiskProfile;
pub use error::{Error, Result};
