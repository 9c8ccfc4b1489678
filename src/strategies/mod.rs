//! Trading Strategies Module
//!
//! Contains the channel strategies and the types they share with the
//! position state machine.

pub mod lrc_grid;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelParameters;
use crate::error::StrategyResult;
use crate::{Candle, Direction};

/// Pair of sigma multipliers bounding a zone, in grid order
///
/// Serialized as a two-element array, e.g. `[-1.0, -3.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneRange(pub f64, pub f64);

impl ZoneRange {
    pub fn first(&self) -> f64 {
        self.0
    }

    pub fn last(&self) -> f64 {
        self.1
    }
}

/// Favorable price region for one side, expressed in standard deviations
/// from the regression line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub direction: Direction,
    pub std_dev_range: ZoneRange,
}

/// One limit order of a laddered grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridOrder {
    pub price: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopLevels {
    pub soft: f64,
    pub hard: f64,
}

/// Trigger prices for one side at a single bar
///
/// `entry` is `None` when this side may not open a position (shorts
/// disabled, or counter-trend entries disabled).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SideLevels {
    pub entry: Option<f64>,
    pub exit: Option<f64>,
    pub soft_stop: f64,
    pub hard_stop: f64,
}

/// Everything the position state machine needs to evaluate one bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerLevels {
    pub trend: Direction,
    pub long: SideLevels,
    pub short: SideLevels,
}

impl TriggerLevels {
    pub fn side(&self, direction: Direction) -> &SideLevels {
        match direction {
            Direction::Long => &self.long,
            Direction::Short => &self.short,
        }
    }
}

/// Channel strategy trait
///
/// A strategy fits a channel over a window of bars and turns it into trigger
/// levels for a given offset along the fitted line.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Clone into a boxed trait object (used by the parameter optimizer)
    fn clone_boxed(&self) -> Box<dyn Strategy>;

    /// Bars per fit window
    fn lookback(&self) -> usize;

    /// Consecutive closes beyond the soft stop required before it fires
    fn soft_stop_confirm_bars(&self) -> usize {
        1
    }

    /// Fit the channel over `window`
    fn fit(&self, window: &[Candle]) -> StrategyResult<ChannelParameters>;

    /// Trigger levels at `offset` bars from the start of the fitted window
    fn trigger_levels(&self, channel: &ChannelParameters, offset: f64) -> TriggerLevels;
}

/// Build the strategy named in the config
pub fn create_strategy(config: &crate::Config) -> anyhow::Result<Box<dyn Strategy>> {
    let name = config.strategy_name()?;
    match name.as_str() {
        "lrc_grid" => Ok(Box::new(lrc_grid::create_strategy_from_config(config)?)),
        other => anyhow::bail!("Unknown strategy '{}'. Available: lrc_grid", other),
    }
}
