//! Linear Regression Channel
//!
//! Fits a straight line through closing prices in bar space and measures the
//! residual standard deviation. Bands are parallel offsets of the line in
//! units of that deviation (sigma).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StrategyError, StrategyResult};
use crate::indicators::{linear_regression, residual_std_dev};
use crate::{Candle, Direction};

/// Minimum number of bars a fit needs
pub const MIN_FIT_BARS: usize = 2;

/// Relative tolerance under which a residual deviation counts as zero
const DEGENERATE_STD_TOLERANCE: f64 = 1e-12;

/// Result of one channel fit
///
/// `start_index`/`end_index` are positions in the slice handed to
/// [`fit_channel`]. Offsets passed to the evaluation methods are relative to
/// `start_index` (offset 0 is the first fitted bar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelParameters {
    pub slope: f64,
    pub intercept: f64,
    pub std_dev: f64,
    pub start_index: usize,
    pub end_index: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_price: f64,
    pub end_price: f64,
}

impl ChannelParameters {
    /// Build a channel from known coefficients (fixed channels, restored state)
    pub fn new(
        slope: f64,
        intercept: f64,
        std_dev: f64,
        start_index: usize,
        end_index: usize,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> StrategyResult<Self> {
        if !slope.is_finite() || !intercept.is_finite() || !std_dev.is_finite() {
            return Err(StrategyError::Configuration(format!(
                "channel coefficients must be finite: slope={}, intercept={}, std_dev={}",
                slope, intercept, std_dev
            )));
        }
        if std_dev <= 0.0 {
            return Err(StrategyError::DegenerateFit);
        }
        if end_index < start_index {
            return Err(StrategyError::Configuration(format!(
                "channel end index {} precedes start index {}",
                end_index, start_index
            )));
        }

        let span = (end_index - start_index) as f64;
        Ok(Self {
            slope,
            intercept,
            std_dev,
            start_index,
            end_index,
            start_time,
            end_time,
            start_price: intercept,
            end_price: slope * span + intercept,
        })
    }

    /// Number of bars in the fitted window
    pub fn bar_count(&self) -> usize {
        self.end_index - self.start_index + 1
    }

    /// Offset of the last fitted bar
    pub fn latest_offset(&self) -> usize {
        self.end_index - self.start_index
    }

    /// Regression line value at `offset`
    pub fn line_at(&self, offset: f64) -> f64 {
        self.slope * offset + self.intercept
    }

    /// Price `sigma` standard deviations from the line at `offset`
    ///
    /// Positive sigma is above the line, negative below.
    pub fn price_at(&self, offset: f64, sigma: f64) -> f64 {
        self.line_at(offset) + sigma * self.std_dev
    }

    /// `(lower, mid, upper)` band at `offset`
    pub fn bands(&self, offset: f64, deviation_multiplier: f64) -> (f64, f64, f64) {
        let mid = self.line_at(offset);
        let width = deviation_multiplier * self.std_dev;
        (mid - width, mid, mid + width)
    }

    /// Trend of the channel. A flat slope resolves to `Short`.
    pub fn direction(&self) -> Direction {
        if self.slope > 0.0 {
            Direction::Long
        } else {
            Direction::Short
        }
    }
}

/// Fit a regression channel over `candles`
///
/// With `start_time` set, bars before it are excluded and the x-axis restarts
/// at the first included bar. Fewer than two usable bars yields
/// `InsufficientData`; closes lying on the line yield `DegenerateFit`.
pub fn fit_channel(
    candles: &[Candle],
    start_time: Option<DateTime<Utc>>,
) -> StrategyResult<ChannelParameters> {
    let first = match start_time {
        Some(start) => candles
            .iter()
            .position(|c| c.datetime >= start)
            .unwrap_or(candles.len()),
        None => 0,
    };

    let window = &candles[first..];
    if window.len() < MIN_FIT_BARS {
        return Err(StrategyError::InsufficientData {
            available: window.len(),
            required: MIN_FIT_BARS,
        });
    }

    let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
    let (slope, intercept) =
        linear_regression(&closes).ok_or(StrategyError::DegenerateFit)?;
    let std_dev = residual_std_dev(&closes, slope, intercept);

    let mean_abs = closes.iter().map(|c| c.abs()).sum::<f64>() / closes.len() as f64;
    if !std_dev.is_finite() || std_dev <= DEGENERATE_STD_TOLERANCE * mean_abs.max(1.0) {
        return Err(StrategyError::DegenerateFit);
    }

    let last = window.len() - 1;
    let params = ChannelParameters {
        slope,
        intercept,
        std_dev,
        start_index: first,
        end_index: first + last,
        start_time: window[0].datetime,
        end_time: window[last].datetime,
        start_price: intercept,
        end_price: slope * last as f64 + intercept,
    };

    debug!(
        "Fitted channel over {} bars: slope={:.6}, intercept={:.4}, std_dev={:.4}",
        window.len(),
        params.slope,
        params.intercept,
        params.std_dev
    );

    Ok(params)
}
