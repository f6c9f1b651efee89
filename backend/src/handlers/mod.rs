//! HTTP request handlers

pub mod batches;
pub mod disposals;
pub mod health;
pub mod jobs;
pub mod products;
pub mod sales;
pub mod transfers;

pub use batches::*;
pub use disposals::*;
pub use health::*;
pub use jobs::*;
pub use products::*;
pub use sales::*;
pub use transfers::*;
