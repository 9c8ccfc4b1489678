//! Subcommand implementations

pub mod backtest;
pub mod channel;
pub mod live;
pub mod optimize;

use anyhow::Result;
use lrc_strategies::{data, Candle, Config};
use tracing::{info, warn};

/// Load the configured series, or `data_override` when given, applying the
/// backtest date range
pub fn load_candles(config: &Config, data_override: Option<&str>) -> Result<Vec<Candle>> {
    let path = match data_override {
        Some(path) => path.into(),
        None => data::data_file_path(
            &config.backtest.data_dir,
            &config.trading.symbol,
            &config.trading.timeframe,
        ),
    };
    info!("Loading data from: {}", path.display());

    let candles = data::load_csv(&path)?;
    let candles = data::filter_date_range(
        candles,
        config.backtest.start_date.as_deref(),
        config.backtest.end_date.as_deref(),
    )?;

    let validation = data::validate_candles(&candles);
    if !validation.is_valid() {
        warn!(
            "{} invalid bars in {} (invalid_bar_policy: {:?})",
            validation.errors.len(),
            path.display(),
            config.backtest.invalid_bar_policy
        );
        for error in validation.errors.iter().take(5) {
            warn!("  {}", error);
        }
    }

    Ok(candles)
}
