//! Optimize command implementation with progress tracking

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use lrc_strategies::grid::{self, format_params};
use lrc_strategies::optimizer::{Optimizer, SortMetric};
use lrc_strategies::strategies::create_strategy;
use lrc_strategies::Config;
use tracing::info;

pub fn run(
    config_path: String,
    data_override: Option<String>,
    overrides: Vec<String>,
    sort_by: String,
    top: usize,
    sequential: bool,
) -> Result<()> {
    info!("Starting optimization");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let sort_metric: SortMetric = sort_by.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    grid::apply_overrides(&mut config, &overrides)?;
    let total = grid::total_combinations(&config);
    if total == 0 {
        anyhow::bail!("Grid has an empty value list, nothing to test");
    }

    let configs = grid::generate_grid_configs(&config);
    info!("Generated {} parameter combinations", configs.len());

    let candles = super::load_candles(&config, data_override.as_deref())?;
    info!("Loaded {} candles", candles.len());

    println!(
        "Testing {} combinations on {} {} ({} bars)",
        configs.len(),
        config.trading.symbol,
        config.trading.timeframe,
        candles.len()
    );

    let optimizer = Optimizer::new(&config);
    let mut results = if sequential {
        optimizer.optimize_sequential(&candles, configs, create_strategy)
    } else {
        let pb = ProgressBar::new(configs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec:.2}]")?
                .progress_chars("█░ "),
        );
        let results = optimizer.optimize(&candles, configs, create_strategy, Some(&pb));
        pb.finish();
        results
    };
    println!();

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        info!("{} combinations failed", failed);
        if let Some(first) = results.iter().find_map(|r| r.error.as_ref()) {
            println!("{} combinations failed, first error: {}", failed, first);
        }
    }

    Optimizer::sort_results(&mut results, sort_metric);
    info!("Total results: {}, sorted by: {}", results.len(), sort_by);

    let display_count = top.min(results.len());
    println!("\n{}", "=".repeat(110));
    println!("TOP {} OPTIMIZATION RESULTS (sorted by {})", display_count, sort_by);
    println!("{}", "=".repeat(110));
    println!(
        "{:<4} {:>7} {:>9} {:>8} {:>8} {:>6} {:>6} | Parameters",
        "Rank", "Sharpe", "Return%", "MaxDD%", "WinR%", "Trades", "Chases"
    );
    println!("{}", "-".repeat(110));

    for (i, result) in results.iter().take(top).enumerate() {
        if let Some(error) = &result.error {
            println!("{:<4} {:>56} | {} ({})", i + 1, "failed", format_params(&result.params), error);
            continue;
        }
        let sharpe = result
            .sharpe_ratio
            .map_or_else(|| "n/a".to_string(), |s| format!("{:.2}", s));
        println!(
            "{:<4} {:>7} {:>9.2} {:>8.2} {:>8.2} {:>6} {:>6} | {}",
            i + 1,
            sharpe,
            result.total_return,
            result.max_drawdown,
            result.win_rate,
            result.total_trades,
            result.chase_count,
            format_params(&result.params)
        );
    }
    println!("{}", "=".repeat(110));

    info!("Optimization completed successfully");
    Ok(())
}
