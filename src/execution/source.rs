//! Price sources for the paper/live loop

use std::path::PathBuf;

use super::types::ExecutionError;
use super::PriceSource;
use crate::{data, Candle};

/// Re-reads a CSV file on every fetch, so an external process can append bars
pub struct CsvPriceSource {
    path: PathBuf,
}

impl CsvPriceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PriceSource for CsvPriceSource {
    fn fetch_bars(&mut self, limit: usize) -> Result<Vec<Candle>, ExecutionError> {
        let mut candles =
            data::load_csv(&self.path).map_err(|e| ExecutionError::Source(format!("{:#}", e)))?;
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.split_off(skip))
    }
}

/// Reveals one more bar of a fixed series on each fetch
///
/// Starts with `warmup` bars visible. Used to replay history through the
/// live loop.
pub struct ReplayPriceSource {
    bars: Vec<Candle>,
    visible: usize,
    delivered: usize,
}

impl ReplayPriceSource {
    pub fn new(bars: Vec<Candle>, warmup: usize) -> Self {
        let visible = warmup.min(bars.len());
        Self {
            bars,
            visible,
            delivered: 0,
        }
    }

    /// Every bar has been returned by a fetch
    pub fn is_exhausted(&self) -> bool {
        self.delivered >= self.bars.len()
    }
}

impl PriceSource for ReplayPriceSource {
    fn fetch_bars(&mut self, limit: usize) -> Result<Vec<Candle>, ExecutionError> {
        let end = self.visible;
        self.visible = (self.visible + 1).min(self.bars.len());
        self.delivered = end;
        let start = end.saturating_sub(limit);
        Ok(self.bars[start..end].to_vec())
    }
}
