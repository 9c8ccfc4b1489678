//! Backtest command implementation

use anyhow::{Context, Result};
use lrc_strategies::backtest::{Backtester, FitPolicy, InvalidBarPolicy};
use lrc_strategies::strategies::create_strategy;
use lrc_strategies::{data, Config};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub fn run(
    config_path: String,
    data_override: Option<String>,
    capital_override: Option<f64>,
    start_override: Option<String>,
    end_override: Option<String>,
    fit_policy_override: Option<String>,
    skip_invalid: bool,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(capital) = capital_override {
        if !capital.is_finite() || capital <= 0.0 {
            anyhow::bail!("--capital must be positive, got {}", capital);
        }
        info!("Overriding initial capital to: {:.2}", capital);
        config.trading.initial_capital = capital;
    }

    if let Some(start) = start_override {
        info!("Overriding start date to: {}", start);
        config.backtest.start_date = Some(start);
    }

    if let Some(end) = end_override {
        info!("Overriding end date to: {}", end);
        config.backtest.end_date = Some(end);
    }

    if let Some(policy) = fit_policy_override {
        config.backtest.fit_policy = policy
            .parse::<FitPolicy>()
            .map_err(|e| anyhow::anyhow!(e))?;
        info!("Overriding fit policy to: {:?}", config.backtest.fit_policy);
    }

    if skip_invalid {
        config.backtest.invalid_bar_policy = InvalidBarPolicy::Skip;
    }

    let candles = super::load_candles(&config, data_override.as_deref())?;
    info!("Loaded {} candles", candles.len());

    let strategy = create_strategy(&config)?;
    info!("Created strategy: {}", strategy.name());

    // Ctrl+C stops the replay between bars; the ledger so far is still reported
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_flag = cancel.clone();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_flag.store(true, Ordering::Relaxed);
        }
    });

    let backtester = Backtester::new(config.clone(), strategy);
    info!("Running backtest...");
    let result = backtester
        .run_with_cancel(&candles, &cancel)
        .context("Backtest failed")?;

    if result.interrupted {
        warn!("Backtest interrupted, results cover {} bars", result.ledger.len());
    }

    let m = &result.metrics;
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS - {} {}", config.trading.symbol, config.trading.timeframe);
    println!("{}", "=".repeat(60));
    println!("Initial Capital:    {:.2}", m.initial_capital);
    println!("Final Value:        {:.2}", m.final_value);
    println!("Total Return:       {:.2}%", m.total_return);
    match m.sharpe_ratio {
        Some(sharpe) => println!("Sharpe Ratio:       {:.2}", sharpe),
        None => println!("Sharpe Ratio:       n/a"),
    }
    println!("Max Drawdown:       {:.2}%", m.max_drawdown);
    println!("Win Rate:           {:.2}%", m.win_rate);
    println!("Total Trades:       {}", m.total_trades);
    println!("Winning Trades:     {}", m.winning_trades);
    println!("Losing Trades:      {}", m.losing_trades);
    println!("Realized P&L:       {:.2}", m.realized_pnl);
    println!("Limit Chases:       {}", m.chase_count);
    println!("Bars Processed:     {}", m.bars_processed);
    println!("Bars Rejected:      {}", m.bars_rejected);
    println!("Final State:        {}", result.final_position.state().label());
    println!("{}", "=".repeat(60));

    let results_dir = PathBuf::from(&config.backtest.results_dir);
    let stem = format!("{}_{}", config.trading.symbol, config.trading.timeframe);
    data::write_ledger_csv(results_dir.join(format!("{}_ledger.csv", stem)), &result.ledger)?;
    data::write_trades_csv(results_dir.join(format!("{}_trades.csv", stem)), &result.trades)?;

    info!("Backtest completed successfully");
    Ok(())
}
