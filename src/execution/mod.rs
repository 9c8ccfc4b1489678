//! Execution collaborators
//!
//! The core decides which orders it wants; implementations of these traits
//! fetch prices and talk to a venue. Calls are blocking and wrapped in a
//! [`RetryPolicy`].

pub mod paper;
pub mod retry;
pub mod router;
pub mod source;
pub mod types;

pub use paper::PaperVenue;
pub use retry::RetryPolicy;
pub use router::OrderRouter;
pub use source::{CsvPriceSource, ReplayPriceSource};
pub use types::{ExecutionError, FillStatus, OrderId, OrderIntent, OrderPurpose};

use crate::Candle;

/// Supplies closed bars, oldest first
pub trait PriceSource: Send {
    /// Up to `limit` most recent bars
    fn fetch_bars(&mut self, limit: usize) -> Result<Vec<Candle>, ExecutionError>;
}

pub trait ExecutionVenue: Send {
    fn place(&mut self, intent: &OrderIntent) -> Result<OrderId, ExecutionError>;

    /// Re-price a resting limit order
    fn amend(&mut self, id: OrderId, price: f64) -> Result<(), ExecutionError>;

    fn cancel(&mut self, id: OrderId) -> Result<(), ExecutionError>;

    fn fill_status(&mut self, id: OrderId) -> Result<FillStatus, ExecutionError>;

    /// Observe a closed bar. Simulated venues fill resting orders here.
    fn on_bar(&mut self, _bar: &Candle) {}
}
