//! Domain models for batch-level stock management

mod allocation;
mod batch;
mod disposal;
mod expiry;
mod ledger;
mod movement;
mod transfer;

pub use allocation::*;
pub use batch::*;
pub use disposal::*;
pub use expiry::*;
pub use ledger::*;
pub use movement::*;
pub use transfer::*;
