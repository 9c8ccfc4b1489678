//! Channel status printout for the latest bar

use anyhow::Result;
use lrc_strategies::channel::MIN_FIT_BARS;
use lrc_strategies::strategies::lrc_grid;
use lrc_strategies::strategies::{GridOrder, Strategy};
use lrc_strategies::{data, Config, Direction};
use tracing::info;

fn print_grid(label: &str, orders: &[GridOrder]) {
    if orders.is_empty() {
        println!("{:<20}none", label);
        return;
    }
    println!("{}", label);
    for order in orders {
        println!("    {:>14.4}  x {:.6}", order.price, order.amount);
    }
}

pub fn run(config_path: String, data_override: Option<String>) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let strategy = lrc_grid::create_strategy_from_config(&config)?;
    let candles = super::load_candles(&config, data_override.as_deref())?;
    let valid: Vec<_> = candles.into_iter().filter(|c| c.is_valid()).collect();
    data::ensure_increasing(&valid)?;
    let Some(last) = valid.last() else {
        anyhow::bail!("No valid bars to fit");
    };

    let lookback = strategy.lookback().max(MIN_FIT_BARS);
    let window = &valid[valid.len().saturating_sub(lookback)..];
    let channel = strategy.fit(window)?;
    let offset = channel.latest_offset() as f64;
    let params = strategy.config();

    let trend = channel.direction();
    let (lower, mid, upper) = channel.bands(offset, params.deviation_multiplier);

    println!("\n{}", "=".repeat(60));
    println!("LRC CHANNEL - {} {}", config.trading.symbol, config.trading.timeframe);
    println!("{}", "=".repeat(60));
    println!("Last Bar:           {} close {:.4}", last.datetime, last.close);
    println!("Window:             {} -> {} ({} bars)", channel.start_time, channel.end_time, channel.bar_count());
    println!("Direction:          {}", if trend == Direction::Long { "UPTREND" } else { "DOWNTREND" });
    println!("Slope:              {:.6}", channel.slope);
    println!("Intercept:          {:.4}", channel.intercept);
    println!("Std Dev:            {:.4}", channel.std_dev);
    println!(
        "Bands ({:.1} sigma):  {:.4} / {:.4} / {:.4}",
        params.deviation_multiplier, lower, mid, upper
    );
    println!("{}", "-".repeat(60));

    for side in [Direction::Long, Direction::Short] {
        let entries = strategy.entry_grid_for(&channel, offset, side);
        print_grid(&format!("{} entry grid:", side), &entries);

        let size: f64 = entries.iter().map(|o| o.amount / o.price).sum();
        print_grid(
            &format!("{} take-profit grid:", side),
            &strategy.take_profit_grid(&channel, offset, side, size),
        );

        let stops = strategy.stop_levels(&channel, offset, side);
        println!("{} stops:          soft {:.4}, hard {:.4}", side, stops.soft, stops.hard);
        println!("{}", "-".repeat(60));
    }

    Ok(())
}
