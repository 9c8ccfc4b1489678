//! Paper venue with fill-on-touch semantics
//!
//! Buy limits fill when a bar's low reaches the limit, sell limits when the
//! high does. Market orders fill at the last seen close.

use std::collections::HashMap;
use tracing::{debug, info};

use super::types::{ExecutionError, FillStatus, OrderId, OrderIntent};
use super::ExecutionVenue;
use crate::{Candle, Side};

#[derive(Debug, Clone)]
struct PaperOrder {
    intent: OrderIntent,
    status: FillStatus,
}

#[derive(Debug, Default)]
pub struct PaperVenue {
    orders: HashMap<OrderId, PaperOrder>,
    next_id: OrderId,
    last_close: Option<f64>,
}

impl PaperVenue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders still resting on the book
    pub fn open_orders(&self) -> Vec<(OrderId, OrderIntent)> {
        let mut open: Vec<_> = self
            .orders
            .iter()
            .filter(|(_, o)| o.status == FillStatus::Open)
            .map(|(id, o)| (*id, o.intent.clone()))
            .collect();
        open.sort_by_key(|(id, _)| *id);
        open
    }

    fn order_mut(&mut self, id: OrderId) -> Result<&mut PaperOrder, ExecutionError> {
        self.orders.get_mut(&id).ok_or(ExecutionError::UnknownOrder(id))
    }
}

impl ExecutionVenue for PaperVenue {
    fn place(&mut self, intent: &OrderIntent) -> Result<OrderId, ExecutionError> {
        if !intent.amount.is_finite() || intent.amount <= 0.0 {
            return Err(ExecutionError::Rejected(format!(
                "amount must be positive, got {}",
                intent.amount
            )));
        }

        self.next_id += 1;
        let id = self.next_id;

        let status = match intent.price {
            Some(price) if price > 0.0 && price.is_finite() => FillStatus::Open,
            Some(price) => {
                return Err(ExecutionError::Rejected(format!("invalid limit price {}", price)))
            }
            None => match self.last_close {
                Some(price) => FillStatus::Filled { price },
                None => {
                    return Err(ExecutionError::Rejected(
                        "market order before any price was seen".to_string(),
                    ))
                }
            },
        };

        info!(
            "Paper order {} placed: {:?} {} @ {:?} ({:?}{})",
            id,
            intent.side,
            intent.amount,
            intent.price,
            intent.purpose,
            if intent.reduce_only { ", reduce-only" } else { "" }
        );

        self.orders.insert(
            id,
            PaperOrder {
                intent: intent.clone(),
                status,
            },
        );
        Ok(id)
    }

    fn amend(&mut self, id: OrderId, price: f64) -> Result<(), ExecutionError> {
        let order = self.order_mut(id)?;
        if order.status != FillStatus::Open {
            return Err(ExecutionError::Rejected(format!(
                "order {} is no longer open",
                id
            )));
        }
        debug!("Paper order {} amended {:?} -> {}", id, order.intent.price, price);
        order.intent.price = Some(price);
        Ok(())
    }

    fn cancel(&mut self, id: OrderId) -> Result<(), ExecutionError> {
        let order = self.order_mut(id)?;
        if order.status == FillStatus::Open {
            order.status = FillStatus::Cancelled;
            debug!("Paper order {} cancelled", id);
        }
        Ok(())
    }

    fn fill_status(&mut self, id: OrderId) -> Result<FillStatus, ExecutionError> {
        Ok(self.order_mut(id)?.status)
    }

    fn on_bar(&mut self, bar: &Candle) {
        for (id, order) in self.orders.iter_mut() {
            if order.status != FillStatus::Open {
                continue;
            }
            let Some(limit) = order.intent.price else {
                continue;
            };
            let touched = match order.intent.side {
                Side::Buy => bar.low <= limit,
                Side::Sell => bar.high >= limit,
            };
            if touched {
                order.status = FillStatus::Filled { price: limit };
                info!("Paper order {} filled @ {}", id, limit);
            }
        }
        self.last_close = Some(bar.close);
    }
}
