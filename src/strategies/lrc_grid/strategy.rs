//! LRC Grid Strategy
//!
//! Turns a fitted regression channel into laddered entry and take-profit
//! grids plus soft/hard stops, all expressed in sigma from the line.

use crate::channel::{fit_channel, ChannelParameters};
use crate::error::StrategyResult;
use crate::indicators::linspace;
use crate::strategies::{GridOrder, SideLevels, StopLevels, Strategy, TriggerLevels, Zone, ZoneRange};
use crate::{Candle, Direction};

use super::config::LrcGridConfig;

pub struct LrcGridStrategy {
    config: LrcGridConfig,
}

impl LrcGridStrategy {
    pub fn new(config: LrcGridConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LrcGridConfig {
        &self.config
    }

    /// Entry zone for `side` under the channel's current trend
    pub fn entry_zone(&self, channel: &ChannelParameters, side: Direction) -> Option<Zone> {
        self.config
            .favorable_zones
            .for_trend(channel.direction())
            .get(side)
            .map(|std_dev_range| Zone {
                direction: side,
                std_dev_range,
            })
    }

    pub fn take_profit_zone(&self, side: Direction) -> Option<Zone> {
        self.config
            .take_profit_zones
            .get(side)
            .map(|std_dev_range| Zone {
                direction: side,
                std_dev_range,
            })
    }

    /// Entry grid in the direction of the channel trend
    pub fn entry_grid(&self, channel: &ChannelParameters, offset: f64) -> Vec<GridOrder> {
        self.entry_grid_for(channel, offset, channel.direction())
    }

    /// Entry grid for `side`; empty when no zone is configured for it
    pub fn entry_grid_for(
        &self,
        channel: &ChannelParameters,
        offset: f64,
        side: Direction,
    ) -> Vec<GridOrder> {
        match self.entry_zone(channel, side) {
            Some(zone) => self.ladder(channel, offset, zone.std_dev_range, self.config.order_size),
            None => Vec::new(),
        }
    }

    /// Take-profit grid splitting `position_size` units equally
    pub fn take_profit_grid(
        &self,
        channel: &ChannelParameters,
        offset: f64,
        side: Direction,
        position_size: f64,
    ) -> Vec<GridOrder> {
        match self.take_profit_zone(side) {
            Some(zone) => self.ladder(channel, offset, zone.std_dev_range, position_size),
            None => Vec::new(),
        }
    }

    /// Soft and hard stops, below the line for longs and above it for shorts
    pub fn stop_levels(&self, channel: &ChannelParameters, offset: f64, side: Direction) -> StopLevels {
        let sign = -side.sign();
        StopLevels {
            soft: channel.price_at(offset, sign * self.config.soft_stop_sigma),
            hard: channel.price_at(offset, sign * self.config.hard_stop_sigma),
        }
    }

    fn ladder(
        &self,
        channel: &ChannelParameters,
        offset: f64,
        range: ZoneRange,
        total: f64,
    ) -> Vec<GridOrder> {
        let count = self.config.sub_order_count;
        if count == 0 {
            return Vec::new();
        }

        let share = total / count as f64;
        linspace(range.first(), range.last(), count)
            .into_iter()
            .enumerate()
            .map(|(k, sigma)| GridOrder {
                price: channel.price_at(offset, sigma),
                // last slice takes the remainder so the amounts sum to `total`
                amount: if k + 1 == count {
                    total - share * (count - 1) as f64
                } else {
                    share
                },
            })
            .collect()
    }

    fn side_levels(&self, channel: &ChannelParameters, offset: f64, side: Direction) -> SideLevels {
        let trend = channel.direction();
        let may_enter = (side == trend || self.config.trade_counter_trend)
            && (side == Direction::Long || self.config.allow_shorts);

        let entry = if may_enter {
            self.entry_grid_for(channel, offset, side)
                .first()
                .map(|o| o.price)
        } else {
            None
        };
        let exit = self
            .take_profit_grid(channel, offset, side, 0.0)
            .first()
            .map(|o| o.price);
        let stops = self.stop_levels(channel, offset, side);

        SideLevels {
            entry,
            exit,
            soft_stop: stops.soft,
            hard_stop: stops.hard,
        }
    }
}

impl Strategy for LrcGridStrategy {
    fn name(&self) -> &'static str {
        "lrc_grid"
    }

    fn clone_boxed(&self) -> Box<dyn Strategy> {
        Box::new(LrcGridStrategy::new(self.config.clone()))
    }

    fn lookback(&self) -> usize {
        self.config.lookback_candles
    }

    fn soft_stop_confirm_bars(&self) -> usize {
        self.config.soft_stop_confirm_bars
    }

    fn fit(&self, window: &[Candle]) -> StrategyResult<ChannelParameters> {
        fit_channel(window, self.config.start_time)
    }

    fn trigger_levels(&self, channel: &ChannelParameters, offset: f64) -> TriggerLevels {
        TriggerLevels {
            trend: channel.direction(),
            long: self.side_levels(channel, offset, Direction::Long),
            short: self.side_levels(channel, offset, Direction::Short),
        }
    }
}
