//! Shared domain types for the POS stock core
//!
//! This crate holds the pure batch-stock rules: the batch model, expiry
//! classification, FIFO allocation planning, disposal rules and transfer
//! scoring. It performs no IO; the backend drives it against storage.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
