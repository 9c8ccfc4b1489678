//! Order and fill types exchanged with execution collaborators

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::Side;

/// Venue-assigned order ID
pub type OrderId = u64;

/// Why an order is being placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPurpose {
    Entry,
    TakeProfit,
    StopLoss,
    Reversal,
}

/// Order the core wants placed
///
/// `price: None` is a market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub side: Side,
    pub price: Option<f64>,
    pub amount: f64,
    pub reduce_only: bool,
    pub purpose: OrderPurpose,
}

impl OrderIntent {
    pub fn limit(side: Side, price: f64, amount: f64, purpose: OrderPurpose) -> Self {
        Self {
            side,
            price: Some(price),
            amount,
            reduce_only: false,
            purpose,
        }
    }

    pub fn market(side: Side, amount: f64, purpose: OrderPurpose) -> Self {
        Self {
            side,
            price: None,
            amount,
            reduce_only: false,
            purpose,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FillStatus {
    Open,
    PartiallyFilled { filled: f64 },
    Filled { price: f64 },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("call exceeded timeout of {0:?}")]
    Timeout(Duration),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("venue unavailable: {0}")]
    Unavailable(String),

    #[error("unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("price source error: {0}")]
    Source(String),
}

impl ExecutionError {
    /// Worth retrying with the same request
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecutionError::Timeout(_) | ExecutionError::Unavailable(_) | ExecutionError::Source(_)
        )
    }
}
