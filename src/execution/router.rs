//! Maps state-machine transitions to venue orders

use tracing::{info, warn};

use super::retry::RetryPolicy;
use super::types::{ExecutionError, FillStatus, OrderId, OrderIntent, OrderPurpose};
use super::ExecutionVenue;
use crate::state_machine::{PositionStateMachine, Transition};
use crate::{Candle, Direction, ExitReason, Trade};

pub struct OrderRouter {
    venue: Box<dyn ExecutionVenue>,
    retry: RetryPolicy,
    position: Option<(Direction, f64)>,
    entry_order: Option<OrderId>,
    exit_order: Option<OrderId>,
}

impl OrderRouter {
    pub fn new(venue: Box<dyn ExecutionVenue>, retry: RetryPolicy) -> Self {
        Self {
            venue,
            retry,
            position: None,
            entry_order: None,
            exit_order: None,
        }
    }

    /// Align with a restored position (no orders are assumed to be resting)
    pub fn sync_position(&mut self, machine: &PositionStateMachine) {
        self.position = machine
            .state()
            .direction()
            .map(|d| (d, machine.holdings().abs()));
        self.entry_order = None;
        self.exit_order = None;
    }

    pub fn exit_order(&self) -> Option<OrderId> {
        self.exit_order
    }

    pub fn on_bar(&mut self, bar: &Candle) {
        self.venue.on_bar(bar);
    }

    pub fn route(&mut self, transition: &Transition) -> Result<(), ExecutionError> {
        match transition {
            Transition::Hold => Ok(()),
            Transition::Entered {
                direction,
                price,
                quantity,
            } => {
                let intent = OrderIntent::limit(direction.entry_side(), *price, *quantity, OrderPurpose::Entry);
                self.entry_order = Some(self.place(&intent)?);
                self.position = Some((*direction, *quantity));
                Ok(())
            }
            Transition::ExitRequested {
                direction,
                limit_price,
            } => self.place_exit_limit(*direction, *limit_price),
            Transition::Chased { direction, to, .. } => match self.exit_order {
                Some(id) => {
                    let retry = self.retry.clone();
                    let venue = &mut self.venue;
                    match retry.call("amend", || venue.amend(id, *to)) {
                        Err(ExecutionError::UnknownOrder(_)) => self.place_exit_limit(*direction, *to),
                        other => other,
                    }
                }
                None => self.place_exit_limit(*direction, *to),
            },
            Transition::Exited { trade } => self.close(trade),
            Transition::Reversed {
                closed,
                direction,
                price,
                quantity,
            } => {
                self.close(closed)?;
                let intent = OrderIntent::market(direction.entry_side(), *quantity, OrderPurpose::Reversal);
                self.entry_order = Some(self.place(&intent)?);
                self.position = Some((*direction, *quantity));
                info!("Reversed into {} {} @ {}", direction, quantity, price);
                Ok(())
            }
        }
    }

    fn place(&mut self, intent: &OrderIntent) -> Result<OrderId, ExecutionError> {
        let retry = self.retry.clone();
        let venue = &mut self.venue;
        retry.call("place", || venue.place(intent))
    }

    fn place_exit_limit(&mut self, direction: Direction, price: f64) -> Result<(), ExecutionError> {
        let amount = self.position_amount(direction);
        let intent = OrderIntent::limit(direction.exit_side(), price, amount, OrderPurpose::TakeProfit)
            .reduce_only();
        self.exit_order = Some(self.place(&intent)?);
        Ok(())
    }

    fn position_amount(&self, direction: Direction) -> f64 {
        match self.position {
            Some((d, amount)) if d == direction => amount,
            _ => 0.0,
        }
    }

    fn close(&mut self, trade: &Trade) -> Result<(), ExecutionError> {
        let amount = trade.quantity.to_f64();

        if trade.exit_reason == ExitReason::TakeProfit {
            if let Some(id) = self.exit_order.take() {
                let retry = self.retry.clone();
                let venue = &mut self.venue;
                match retry.call("fill_status", || venue.fill_status(id))? {
                    FillStatus::Filled { price } => info!("Exit order {} filled @ {}", id, price),
                    status => warn!("Exit order {} not confirmed filled: {:?}", id, status),
                }
            }
        } else {
            if let Some(id) = self.exit_order.take() {
                let retry = self.retry.clone();
                let venue = &mut self.venue;
                retry.call("cancel", || venue.cancel(id))?;
            }
            let purpose = match trade.exit_reason {
                ExitReason::Reversal => OrderPurpose::Reversal,
                _ => OrderPurpose::StopLoss,
            };
            let intent = OrderIntent::market(trade.direction.exit_side(), amount, purpose).reduce_only();
            self.place(&intent)?;
        }

        self.position = None;
        self.entry_order = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PaperVenue;
    use chrono::{TimeZone, Utc};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Venue that records calls and delegates to a paper venue
    #[derive(Clone, Default)]
    struct Recording {
        log: Arc<Mutex<Vec<String>>>,
        inner: Arc<Mutex<PaperVenue>>,
        place_delay: Duration,
    }

    impl ExecutionVenue for Recording {
        fn place(&mut self, intent: &OrderIntent) -> Result<OrderId, ExecutionError> {
            self.log.lock().unwrap().push(format!(
                "place {:?} {:?} {:?} reduce_only={}",
                intent.purpose, intent.side, intent.price, intent.reduce_only
            ));
            std::thread::sleep(self.place_delay);
            self.inner.lock().unwrap().place(intent)
        }
        fn amend(&mut self, id: OrderId, price: f64) -> Result<(), ExecutionError> {
            self.log.lock().unwrap().push(format!("amend {} {}", id, price));
            self.inner.lock().unwrap().amend(id, price)
        }
        fn cancel(&mut self, id: OrderId) -> Result<(), ExecutionError> {
            self.log.lock().unwrap().push(format!("cancel {}", id));
            self.inner.lock().unwrap().cancel(id)
        }
        fn fill_status(&mut self, id: OrderId) -> Result<FillStatus, ExecutionError> {
            self.log.lock().unwrap().push(format!("status {}", id));
            self.inner.lock().unwrap().fill_status(id)
        }
        fn on_bar(&mut self, bar: &Candle) {
            self.inner.lock().unwrap().on_bar(bar);
        }
    }

    fn router() -> (OrderRouter, Recording) {
        let venue = Recording::default();
        let retry = RetryPolicy::default().with_backoff(Duration::ZERO);
        (OrderRouter::new(Box::new(venue.clone()), retry), venue)
    }

    fn trade(reason: ExitReason) -> Trade {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Trade::new(Direction::Long, 100.0, 105.0, 2.0, t, t, reason)
    }

    #[test]
    fn test_exit_cycle_places_amends_and_confirms() {
        let (mut router, venue) = router();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        router.on_bar(&Candle::flat(t, 100.0));

        router
            .route(&Transition::Entered { direction: Direction::Long, price: 100.0, quantity: 2.0 })
            .unwrap();
        router
            .route(&Transition::ExitRequested { direction: Direction::Long, limit_price: 104.0 })
            .unwrap();
        let exit_id = router.exit_order().unwrap();
        router
            .route(&Transition::Chased { direction: Direction::Long, from: 104.0, to: 105.0 })
            .unwrap();
        router.route(&Transition::Exited { trade: trade(ExitReason::TakeProfit) }).unwrap();

        let log = venue.log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "place Entry Buy Some(100.0) reduce_only=false".to_string(),
                "place TakeProfit Sell Some(104.0) reduce_only=true".to_string(),
                format!("amend {} 105", exit_id),
                format!("status {}", exit_id),
            ]
        );
        assert!(router.exit_order().is_none());
    }

    #[test]
    fn test_stop_cancels_resting_exit_and_closes_at_market() {
        let (mut router, venue) = router();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        router.on_bar(&Candle::flat(t, 100.0));

        router
            .route(&Transition::Entered { direction: Direction::Long, price: 100.0, quantity: 2.0 })
            .unwrap();
        router
            .route(&Transition::ExitRequested { direction: Direction::Long, limit_price: 104.0 })
            .unwrap();
        let exit_id = router.exit_order().unwrap();
        router.route(&Transition::Exited { trade: trade(ExitReason::HardStop) }).unwrap();

        let log = venue.log.lock().unwrap().clone();
        assert_eq!(log[2], format!("cancel {}", exit_id));
        assert_eq!(log[3], "place StopLoss Sell None reduce_only=true");
    }

    #[test]
    fn test_slow_venue_gets_a_single_entry_order() {
        let venue = Recording {
            place_delay: Duration::from_millis(20),
            ..Recording::default()
        };
        let retry = RetryPolicy::default()
            .with_max_retries(2)
            .with_timeout(Duration::from_millis(1))
            .with_backoff(Duration::ZERO);
        let mut router = OrderRouter::new(Box::new(venue.clone()), retry);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        router.on_bar(&Candle::flat(t, 100.0));

        router
            .route(&Transition::Entered { direction: Direction::Long, price: 100.0, quantity: 2.0 })
            .unwrap();

        assert_eq!(venue.log.lock().unwrap().len(), 1);
        assert_eq!(venue.inner.lock().unwrap().open_orders().len(), 1);
    }
}
