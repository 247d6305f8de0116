//! Core domain types for the leverage risk engine.

pub mod decision;
pub mod market;
pub mod position;
pub mod signal;

pub use decision::*;
pub use market::*;
pub use position::*;
pub use signal::*;
