//! Position state machine
//!
//! `Out -> In -> WantsToExit -> Out`, evaluated once per bar against the
//! trigger levels derived from the previous bar's channel. Exits go through a
//! resting limit that is re-priced every bar until touched; stops fill at
//! once and are never chased.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::strategies::TriggerLevels;
use crate::{Candle, CandleValidationError, Direction, ExitReason, Money, Trade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PositionState {
    Out,
    In {
        direction: Direction,
        entry_price: f64,
        entry_time: DateTime<Utc>,
    },
    WantsToExit {
        direction: Direction,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        limit_price: f64,
    },
}

impl PositionState {
    pub fn label(&self) -> &'static str {
        match self {
            PositionState::Out => "OUT",
            PositionState::In { .. } => "IN",
            PositionState::WantsToExit { .. } => "WANTS_TO_EXIT",
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            PositionState::Out => None,
            PositionState::In { direction, .. } | PositionState::WantsToExit { direction, .. } => {
                Some(*direction)
            }
        }
    }
}

/// What a single bar did to the position
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Hold,
    Entered {
        direction: Direction,
        price: f64,
        quantity: f64,
    },
    ExitRequested {
        direction: Direction,
        limit_price: f64,
    },
    Chased {
        direction: Direction,
        from: f64,
        to: f64,
    },
    /// Position closed by the take-profit limit or a stop
    Exited { trade: Trade },
    /// Position closed and the opposite side opened at the same price
    Reversed {
        closed: Trade,
        direction: Direction,
        price: f64,
        quantity: f64,
    },
}

/// Cash/holdings account driven bar by bar
///
/// Every open position holds all capital (`cash == 0`). Longs hold units
/// worth `units * price`. Shorts hold negative units with the capital posted
/// as collateral, worth `units * (2 * entry - price)` floored at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionStateMachine {
    state: PositionState,
    cash: f64,
    holdings: f64,
    soft_stop_breaches: usize,
    soft_stop_confirm_bars: usize,
}

impl PositionStateMachine {
    pub fn new(initial_capital: f64, soft_stop_confirm_bars: usize) -> Self {
        Self {
            state: PositionState::Out,
            cash: initial_capital,
            holdings: 0.0,
            soft_stop_breaches: 0,
            soft_stop_confirm_bars: soft_stop_confirm_bars.max(1),
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn holdings(&self) -> f64 {
        self.holdings
    }

    pub fn limit_price(&self) -> Option<f64> {
        match self.state {
            PositionState::WantsToExit { limit_price, .. } => Some(limit_price),
            _ => None,
        }
    }

    pub fn total_value(&self, price: f64) -> f64 {
        match self.state {
            PositionState::In {
                direction: Direction::Short,
                entry_price,
                ..
            }
            | PositionState::WantsToExit {
                direction: Direction::Short,
                entry_price,
                ..
            } => self.cash + short_value(-self.holdings, entry_price, price),
            _ => self.cash + self.holdings * price,
        }
    }

    /// Advance by one bar
    ///
    /// `levels` is `None` while no channel is available; a resting exit
    /// limit can still fill then, but nothing new is opened or re-priced.
    pub fn on_bar(
        &mut self,
        bar: &Candle,
        levels: Option<&TriggerLevels>,
    ) -> Result<Transition, CandleValidationError> {
        bar.validate()?;

        let transition = match (self.state.clone(), levels) {
            (PositionState::Out, Some(levels)) => self.evaluate_entry(bar, levels),
            (PositionState::Out, None) => Transition::Hold,
            (PositionState::In { direction, entry_price, entry_time }, Some(levels)) => {
                self.evaluate_in(bar, levels, direction, entry_price, entry_time)
            }
            (PositionState::In { .. }, None) => Transition::Hold,
            (
                PositionState::WantsToExit {
                    direction,
                    entry_price,
                    entry_time,
                    limit_price,
                },
                levels,
            ) => self.evaluate_exit(bar, levels, direction, entry_price, entry_time, limit_price),
        };

        if transition != Transition::Hold {
            debug!(
                "{} {}: {:?} -> {}",
                bar.datetime,
                bar.close,
                transition,
                self.state.label()
            );
        }

        Ok(transition)
    }

    fn evaluate_entry(&mut self, bar: &Candle, levels: &TriggerLevels) -> Transition {
        if self.cash <= 0.0 {
            return Transition::Hold;
        }

        let trend = levels.trend;
        let fired = [trend, trend.opposite()]
            .into_iter()
            .find_map(|side| entry_touched(levels, side, bar).map(|price| (side, price)));

        match fired {
            Some((direction, price)) => self.open(direction, price, bar.datetime),
            None => Transition::Hold,
        }
    }

    fn evaluate_in(
        &mut self,
        bar: &Candle,
        levels: &TriggerLevels,
        direction: Direction,
        entry_price: f64,
        entry_time: DateTime<Utc>,
    ) -> Transition {
        if let Some(transition) = self.check_stops(bar, levels, direction, entry_price, entry_time) {
            return transition;
        }
        if let Some(transition) = self.check_reversal(bar, levels, direction, entry_price, entry_time) {
            return transition;
        }

        match exit_crossed(levels, direction, bar) {
            Some(limit_price) => {
                self.state = PositionState::WantsToExit {
                    direction,
                    entry_price,
                    entry_time,
                    limit_price,
                };
                Transition::ExitRequested {
                    direction,
                    limit_price,
                }
            }
            None => Transition::Hold,
        }
    }

    fn evaluate_exit(
        &mut self,
        bar: &Candle,
        levels: Option<&TriggerLevels>,
        direction: Direction,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        limit_price: f64,
    ) -> Transition {
        if let Some(levels) = levels {
            if let Some(t) = self.check_stops(bar, levels, direction, entry_price, entry_time) {
                return t;
            }
            if let Some(t) = self.check_reversal(bar, levels, direction, entry_price, entry_time) {
                return t;
            }
        }

        if limit_touched(direction, limit_price, bar) {
            let trade = self.close(limit_price, bar.datetime, ExitReason::TakeProfit, entry_price, entry_time);
            return Transition::Exited { trade };
        }

        match levels.and_then(|l| l.side(direction).exit) {
            Some(to) => {
                self.state = PositionState::WantsToExit {
                    direction,
                    entry_price,
                    entry_time,
                    limit_price: to,
                };
                Transition::Chased {
                    direction,
                    from: limit_price,
                    to,
                }
            }
            None => Transition::Hold,
        }
    }

    fn check_stops(
        &mut self,
        bar: &Candle,
        levels: &TriggerLevels,
        direction: Direction,
        entry_price: f64,
        entry_time: DateTime<Utc>,
    ) -> Option<Transition> {
        let side = levels.side(direction);

        let hard_fill = match direction {
            Direction::Long if bar.low <= side.hard_stop => Some(side.hard_stop.min(bar.open)),
            Direction::Short if bar.high >= side.hard_stop => Some(side.hard_stop.max(bar.open)),
            _ => None,
        };
        if let Some(price) = hard_fill {
            let trade = self.close(price, bar.datetime, ExitReason::HardStop, entry_price, entry_time);
            return Some(Transition::Exited { trade });
        }

        let breached = match direction {
            Direction::Long => bar.close <= side.soft_stop,
            Direction::Short => bar.close >= side.soft_stop,
        };
        if !breached {
            self.soft_stop_breaches = 0;
            return None;
        }

        self.soft_stop_breaches += 1;
        if self.soft_stop_breaches < self.soft_stop_confirm_bars {
            debug!(
                "Soft stop breached ({}/{})",
                self.soft_stop_breaches, self.soft_stop_confirm_bars
            );
            return None;
        }

        let trade = self.close(bar.close, bar.datetime, ExitReason::SoftStop, entry_price, entry_time);
        Some(Transition::Exited { trade })
    }

    fn check_reversal(
        &mut self,
        bar: &Candle,
        levels: &TriggerLevels,
        direction: Direction,
        entry_price: f64,
        entry_time: DateTime<Utc>,
    ) -> Option<Transition> {
        let opposite = direction.opposite();
        entry_touched(levels, opposite, bar)?;

        let closed = self.close(bar.close, bar.datetime, ExitReason::Reversal, entry_price, entry_time);
        match self.open(opposite, bar.close, bar.datetime) {
            Transition::Entered {
                direction,
                price,
                quantity,
            } => Some(Transition::Reversed {
                closed,
                direction,
                price,
                quantity,
            }),
            _ => Some(Transition::Exited { trade: closed }),
        }
    }

    fn open(&mut self, direction: Direction, price: f64, time: DateTime<Utc>) -> Transition {
        if self.cash <= 0.0 || price <= 0.0 {
            return Transition::Hold;
        }

        let quantity = self.cash / price;
        match direction {
            Direction::Long => {
                self.holdings = quantity;
                self.cash = 0.0;
            }
            Direction::Short => {
                self.holdings = -quantity;
                self.cash = 0.0;
            }
        }
        self.soft_stop_breaches = 0;
        self.state = PositionState::In {
            direction,
            entry_price: price,
            entry_time: time,
        };

        info!("{} entry {:.4} @ {:.4} ({})", direction, quantity, price, time);
        Transition::Entered {
            direction,
            price,
            quantity,
        }
    }

    fn close(
        &mut self,
        price: f64,
        time: DateTime<Utc>,
        reason: ExitReason,
        entry_price: f64,
        entry_time: DateTime<Utc>,
    ) -> Trade {
        let quantity = self.holdings.abs();
        let direction = if self.holdings < 0.0 {
            Direction::Short
        } else {
            Direction::Long
        };

        self.cash += match direction {
            Direction::Long => self.holdings * price,
            Direction::Short => short_value(quantity, entry_price, price),
        };
        self.holdings = 0.0;
        self.soft_stop_breaches = 0;
        self.state = PositionState::Out;

        let mut trade = Trade::new(direction, entry_price, price, quantity, entry_time, time, reason);
        if direction == Direction::Short {
            // loss is capped at the posted collateral
            trade.pnl = trade.pnl.max(Money::from_f64(-quantity * entry_price));
        }
        info!(
            "{} exit ({}) {:.4} @ {:.4}, pnl {}",
            direction, reason, quantity, price, trade.pnl
        );
        trade
    }
}

fn short_value(quantity: f64, entry_price: f64, price: f64) -> f64 {
    (quantity * (2.0 * entry_price - price)).max(0.0)
}

fn entry_touched(levels: &TriggerLevels, side: Direction, bar: &Candle) -> Option<f64> {
    let price = levels.side(side).entry?;
    let touched = match side {
        Direction::Long => bar.low <= price,
        Direction::Short => bar.high >= price,
    };
    touched.then_some(price)
}

fn exit_crossed(levels: &TriggerLevels, side: Direction, bar: &Candle) -> Option<f64> {
    let price = levels.side(side).exit?;
    let crossed = match side {
        Direction::Long => bar.close >= price,
        Direction::Short => bar.close <= price,
    };
    crossed.then_some(price)
}

fn limit_touched(side: Direction, limit: f64, bar: &Candle) -> bool {
    match side {
        Direction::Long => bar.high >= limit,
        Direction::Short => bar.low <= limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::SideLevels;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(t(i), open, high, low, close, 1.0).unwrap()
    }

    fn long_levels(entry: f64, exit: f64) -> TriggerLevels {
        TriggerLevels {
            trend: Direction::Long,
            long: SideLevels {
                entry: Some(entry),
                exit: Some(exit),
                soft_stop: entry - 30.0,
                hard_stop: entry - 40.0,
            },
            short: SideLevels {
                entry: None,
                exit: None,
                soft_stop: exit + 30.0,
                hard_stop: exit + 40.0,
            },
        }
    }

    #[test]
    fn test_entry_converts_all_cash() {
        let mut sm = PositionStateMachine::new(10_000.0, 1);
        let levels = long_levels(95.0, 100.0);

        let tr = sm.on_bar(&bar(1, 97.0, 98.0, 94.0, 96.0), Some(&levels)).unwrap();
        assert!(matches!(tr, Transition::Entered { direction: Direction::Long, .. }));
        assert_eq!(sm.cash(), 0.0);
        assert_relative_eq!(sm.holdings(), 10_000.0 / 95.0);
        assert_relative_eq!(sm.total_value(95.0), 10_000.0);
    }

    #[test]
    fn test_no_entry_without_touch_or_levels() {
        let mut sm = PositionStateMachine::new(1_000.0, 1);
        let levels = long_levels(95.0, 100.0);

        assert_eq!(sm.on_bar(&bar(1, 97.0, 98.0, 96.0, 97.0), Some(&levels)).unwrap(), Transition::Hold);
        assert_eq!(sm.on_bar(&bar(2, 97.0, 98.0, 90.0, 97.0), None).unwrap(), Transition::Hold);
        assert_eq!(sm.state(), &PositionState::Out);
    }

    #[test]
    fn test_exit_waits_for_touch_and_chases() {
        let mut sm = PositionStateMachine::new(1_000.0, 1);
        sm.on_bar(&bar(1, 96.0, 96.0, 94.0, 95.0), Some(&long_levels(95.0, 100.0)))
            .unwrap();

        // close above the exit trigger: request, no fill yet
        let tr = sm.on_bar(&bar(2, 99.0, 101.0, 99.0, 100.5), Some(&long_levels(95.0, 100.0))).unwrap();
        assert_eq!(
            tr,
            Transition::ExitRequested { direction: Direction::Long, limit_price: 100.0 }
        );
        assert!(sm.holdings() > 0.0);

        // price falls away; limit follows each bar's trigger
        for (i, exit) in [(3, 101.0), (4, 102.0), (5, 103.0)] {
            let tr = sm.on_bar(&bar(i, 99.0, 99.5, 98.0, 99.0), Some(&long_levels(95.0, exit))).unwrap();
            assert!(matches!(tr, Transition::Chased { .. }));
            assert_eq!(sm.limit_price(), Some(exit));
        }

        let tr = sm.on_bar(&bar(6, 100.0, 104.0, 100.0, 103.5), Some(&long_levels(95.0, 104.0))).unwrap();
        match tr {
            Transition::Exited { trade } => {
                assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
                assert_relative_eq!(trade.exit_price.to_f64(), 103.0);
            }
            other => panic!("expected exit, got {:?}", other),
        }
        assert_eq!(sm.holdings(), 0.0);
        assert_relative_eq!(sm.cash(), 1_000.0 / 95.0 * 103.0, max_relative = 1e-12);
    }

    #[test]
    fn test_hard_stop_fills_at_open_on_gap() {
        let mut sm = PositionStateMachine::new(1_000.0, 1);
        let levels = long_levels(100.0, 110.0); // hard stop 60
        sm.on_bar(&bar(1, 101.0, 101.0, 99.0, 100.0), Some(&levels)).unwrap();

        let tr = sm.on_bar(&bar(2, 50.0, 52.0, 45.0, 48.0), Some(&levels)).unwrap();
        match tr {
            Transition::Exited { trade } => {
                assert_eq!(trade.exit_reason, ExitReason::HardStop);
                assert_relative_eq!(trade.exit_price.to_f64(), 50.0);
            }
            other => panic!("expected hard stop, got {:?}", other),
        }
        assert_relative_eq!(sm.cash(), 500.0, max_relative = 1e-12);
    }

    #[test]
    fn test_soft_stop_needs_confirmation() {
        let mut sm = PositionStateMachine::new(1_000.0, 2);
        let levels = long_levels(100.0, 110.0); // soft stop 70, hard 60
        sm.on_bar(&bar(1, 101.0, 101.0, 99.0, 100.0), Some(&levels)).unwrap();

        let first = sm.on_bar(&bar(2, 72.0, 72.0, 65.0, 68.0), Some(&levels)).unwrap();
        assert_eq!(first, Transition::Hold);

        // recovering resets the count
        sm.on_bar(&bar(3, 75.0, 76.0, 74.0, 75.0), Some(&levels)).unwrap();
        assert_eq!(sm.on_bar(&bar(4, 70.0, 70.0, 66.0, 69.0), Some(&levels)).unwrap(), Transition::Hold);

        let tr = sm.on_bar(&bar(5, 69.0, 69.0, 66.0, 67.0), Some(&levels)).unwrap();
        assert!(matches!(
            tr,
            Transition::Exited { ref trade } if trade.exit_reason == ExitReason::SoftStop
        ));
        assert_eq!(sm.state(), &PositionState::Out);
    }

    #[test]
    fn test_reversal_never_holds_both_sides() {
        let mut sm = PositionStateMachine::new(1_000.0, 1);
        let mut levels = long_levels(100.0, 120.0);
        levels.short.entry = Some(110.0);
        levels.short.exit = Some(100.0);
        sm.on_bar(&bar(1, 101.0, 101.0, 99.0, 100.0), Some(&levels)).unwrap();

        let tr = sm.on_bar(&bar(2, 105.0, 112.0, 105.0, 110.0), Some(&levels)).unwrap();
        match tr {
            Transition::Reversed { closed, direction, price, quantity } => {
                assert_eq!(closed.exit_reason, ExitReason::Reversal);
                assert_eq!(direction, Direction::Short);
                assert_relative_eq!(price, 110.0);
                assert_relative_eq!(quantity, 10.0, max_relative = 1e-12);
            }
            other => panic!("expected reversal, got {:?}", other),
        }
        assert_relative_eq!(sm.holdings(), -10.0, max_relative = 1e-12);
        assert_eq!(sm.cash(), 0.0);
        assert_relative_eq!(sm.total_value(110.0), 1_100.0, max_relative = 1e-12);
        assert_relative_eq!(sm.total_value(100.0), 1_200.0, max_relative = 1e-12);
    }

    fn short_levels(entry: f64, exit: f64) -> TriggerLevels {
        TriggerLevels {
            trend: Direction::Short,
            long: SideLevels {
                entry: None,
                exit: None,
                soft_stop: exit - 30.0,
                hard_stop: exit - 40.0,
            },
            short: SideLevels {
                entry: Some(entry),
                exit: Some(exit),
                soft_stop: entry + 30.0,
                hard_stop: entry + 40.0,
            },
        }
    }

    #[test]
    fn test_short_commits_cash_as_collateral() {
        let mut sm = PositionStateMachine::new(1_000.0, 1);
        let levels = short_levels(100.0, 90.0);

        let tr = sm.on_bar(&bar(1, 99.0, 101.0, 98.0, 100.0), Some(&levels)).unwrap();
        assert!(matches!(tr, Transition::Entered { direction: Direction::Short, .. }));
        assert_eq!(sm.cash(), 0.0);
        assert_relative_eq!(sm.holdings(), -10.0, max_relative = 1e-12);
        assert_relative_eq!(sm.total_value(100.0), 1_000.0, max_relative = 1e-12);
        assert_relative_eq!(sm.total_value(95.0), 1_050.0, max_relative = 1e-12);

        sm.on_bar(&bar(2, 92.0, 92.0, 88.0, 89.0), Some(&levels)).unwrap();
        let tr = sm.on_bar(&bar(3, 91.0, 91.0, 89.0, 90.0), Some(&levels)).unwrap();
        assert!(matches!(
            tr,
            Transition::Exited { ref trade } if trade.exit_reason == ExitReason::TakeProfit
        ));
        assert_eq!(sm.holdings(), 0.0);
        assert_relative_eq!(sm.cash(), 1_100.0, max_relative = 1e-12);
    }

    #[test]
    fn test_short_gap_through_hard_stop_never_goes_negative() {
        let mut sm = PositionStateMachine::new(1_000.0, 1);
        let levels = short_levels(100.0, 90.0); // hard stop 140
        sm.on_bar(&bar(1, 99.0, 101.0, 98.0, 100.0), Some(&levels)).unwrap();
        assert!(sm.total_value(250.0) >= 0.0);

        let tr = sm.on_bar(&bar(2, 300.0, 310.0, 290.0, 300.0), Some(&levels)).unwrap();
        match tr {
            Transition::Exited { trade } => {
                assert_eq!(trade.exit_reason, ExitReason::HardStop);
                assert_relative_eq!(trade.exit_price.to_f64(), 300.0);
                assert_relative_eq!(trade.pnl.to_f64(), -1_000.0);
            }
            other => panic!("expected hard stop, got {:?}", other),
        }
        assert_eq!(sm.state(), &PositionState::Out);
        assert!(sm.cash() >= 0.0);
        assert_eq!(sm.total_value(300.0), 0.0);

        // nothing left to trade with
        let tr = sm.on_bar(&bar(3, 300.0, 301.0, 50.0, 100.0), Some(&levels)).unwrap();
        assert_eq!(tr, Transition::Hold);
    }

    #[test]
    fn test_invalid_bar_is_rejected_without_state_change() {
        let mut sm = PositionStateMachine::new(1_000.0, 1);
        let bad = Candle::new_unchecked(t(1), 100.0, 90.0, 95.0, 92.0, 1.0);
        assert!(sm.on_bar(&bad, Some(&long_levels(95.0, 100.0))).is_err());
        assert_eq!(sm.cash(), 1_000.0);
        assert_eq!(sm.state(), &PositionState::Out);
    }
}
