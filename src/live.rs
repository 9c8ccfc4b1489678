//! Paper/live trading loop
//!
//! One [`LiveTrader::run_cycle`] call fetches recent bars, feeds every bar
//! closed since the previous cycle through the position state machine,
//! routes the resulting orders and refits the channel. Scheduling and
//! persistence belong to the caller.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelParameters, MIN_FIT_BARS};
use crate::config::Config;
use crate::execution::{ExecutionVenue, OrderRouter, PriceSource, RetryPolicy};
use crate::state_machine::{PositionStateMachine, Transition};
use crate::state_manager::StateSnapshot;
use crate::strategies::{Strategy, TriggerLevels};
use crate::{Candle, Symbol, Trade};

/// Bars fetched beyond the fit window, to catch up after a missed cycle
const CATCH_UP_BARS: usize = 50;

/// Outcome of one cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    pub new_bars: usize,
    pub rejected_bars: usize,
    pub transitions: Vec<Transition>,
    pub trades: Vec<Trade>,
    /// Venue errors; the position state has already advanced
    pub order_errors: Vec<String>,
}

pub struct LiveTrader {
    symbol: Symbol,
    strategy: Box<dyn Strategy>,
    machine: PositionStateMachine,
    router: OrderRouter,
    source: Box<dyn PriceSource>,
    retry: RetryPolicy,
    channel: Option<ChannelParameters>,
    levels: Option<TriggerLevels>,
    last_bar_time: Option<DateTime<Utc>>,
    last_close: Option<f64>,
    cycle_count: u64,
}

impl LiveTrader {
    pub fn new(
        symbol: Symbol,
        strategy: Box<dyn Strategy>,
        initial_capital: f64,
        source: Box<dyn PriceSource>,
        venue: Box<dyn ExecutionVenue>,
        retry: RetryPolicy,
    ) -> Self {
        let machine = PositionStateMachine::new(initial_capital, strategy.soft_stop_confirm_bars());
        Self {
            symbol,
            strategy,
            machine,
            router: OrderRouter::new(venue, retry.clone()),
            source,
            retry,
            channel: None,
            levels: None,
            last_bar_time: None,
            last_close: None,
            cycle_count: 0,
        }
    }

    pub fn from_config(
        config: &Config,
        strategy: Box<dyn Strategy>,
        source: Box<dyn PriceSource>,
        venue: Box<dyn ExecutionVenue>,
    ) -> Self {
        Self::new(
            config.trading.symbol(),
            strategy,
            config.trading.initial_capital,
            source,
            venue,
            RetryPolicy::from_config(&config.live),
        )
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn machine(&self) -> &PositionStateMachine {
        &self.machine
    }

    pub fn channel(&self) -> Option<&ChannelParameters> {
        self.channel.as_ref()
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    fn lookback(&self) -> usize {
        self.strategy.lookback().max(MIN_FIT_BARS)
    }

    /// Mark-to-market value at the last seen close
    pub fn total_value(&self) -> f64 {
        match self.last_close {
            Some(price) => self.machine.total_value(price),
            None => self.machine.cash(),
        }
    }

    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycle_count += 1;
        let limit = self.lookback() + CATCH_UP_BARS;

        let source = &mut self.source;
        let bars = self
            .retry
            .call("fetch_bars", || source.fetch_bars(limit))
            .context("Failed to fetch bars")?;

        let mut report = CycleReport::default();
        let Some(last) = bars.last() else {
            warn!("Cycle {}: price source returned no bars", self.cycle_count);
            return Ok(report);
        };

        let Some(since) = self.last_bar_time else {
            // First cycle only establishes the channel
            self.last_bar_time = Some(last.datetime);
            self.last_close = Some(last.close);
            self.refit(&bars);
            info!(
                "Cycle {}: warmed up on {} bars, channel {}",
                self.cycle_count,
                bars.len(),
                if self.channel.is_some() { "ready" } else { "pending" }
            );
            return Ok(report);
        };

        if bars.first().is_some_and(|b| b.datetime > since) {
            warn!(
                "Cycle {}: oldest fetched bar is newer than {}, some bars may be missed",
                self.cycle_count, since
            );
        }

        for (i, bar) in bars.iter().enumerate() {
            if self.last_bar_time.is_some_and(|t| bar.datetime <= t) {
                continue;
            }
            self.last_bar_time = Some(bar.datetime);
            self.router.on_bar(bar);

            let transition = match self.machine.on_bar(bar, self.levels.as_ref()) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Rejected bar {}: {}", bar.datetime, e);
                    report.rejected_bars += 1;
                    continue;
                }
            };
            report.new_bars += 1;
            self.last_close = Some(bar.close);

            if let Err(e) = self.router.route(&transition) {
                error!("Order routing failed for {:?}: {}", transition, e);
                report.order_errors.push(e.to_string());
            }

            match &transition {
                Transition::Exited { trade } => report.trades.push(trade.clone()),
                Transition::Reversed { closed, .. } => report.trades.push(closed.clone()),
                _ => {}
            }
            if transition != Transition::Hold {
                report.transitions.push(transition);
            }

            self.refit(&bars[..=i]);
        }

        info!(
            "Cycle {}: {} new bars, state {}, value {:.2}",
            self.cycle_count,
            report.new_bars,
            self.machine.state().label(),
            self.total_value()
        );
        Ok(report)
    }

    /// Fit over the last `lookback` valid bars of `history`
    fn refit(&mut self, history: &[Candle]) {
        let valid: Vec<Candle> = history.iter().filter(|c| c.is_valid()).cloned().collect();
        let start = valid.len().saturating_sub(self.lookback());

        match self.strategy.fit(&valid[start..]) {
            Ok(channel) => {
                let levels = self
                    .strategy
                    .trigger_levels(&channel, channel.latest_offset() as f64);
                self.levels = Some(levels);
                self.channel = Some(channel);
            }
            Err(e) => {
                if !e.is_recoverable() {
                    error!("Channel fit failed: {}", e);
                } else {
                    debug!("No channel yet: {}", e);
                }
                self.levels = None;
                self.channel = None;
            }
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            symbol: self.symbol.to_string(),
            machine: self.machine.clone(),
            channel: self.channel.clone(),
            last_bar_time: self.last_bar_time,
            last_close: self.last_close,
            cycle_count: self.cycle_count,
            total_value: self.total_value(),
        }
    }

    /// Resume from a persisted snapshot
    pub fn restore(&mut self, snapshot: StateSnapshot) {
        self.levels = snapshot
            .channel
            .as_ref()
            .map(|ch| self.strategy.trigger_levels(ch, ch.latest_offset() as f64));
        self.machine = snapshot.machine;
        self.channel = snapshot.channel;
        self.last_bar_time = snapshot.last_bar_time;
        self.last_close = snapshot.last_close;
        self.cycle_count = snapshot.cycle_count;
        self.router.sync_position(&self.machine);
        info!(
            "Restored {}: {} after {} cycles",
            self.symbol,
            self.machine.state().label(),
            self.cycle_count
        );
    }
}
