//! Paper trading command
//!
//! Drives `LiveTrader` from a tokio interval. State is persisted to SQLite
//! after every cycle and restored on start-up.

use anyhow::Result;
use lrc_strategies::execution::{CsvPriceSource, PaperVenue, PriceSource, ReplayPriceSource};
use lrc_strategies::live::LiveTrader;
use lrc_strategies::state_manager::SqliteStateManager;
use lrc_strategies::strategies::create_strategy;
use lrc_strategies::{data, Config};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::interval;
use tracing::{error, info, warn};

pub fn run(
    config_path: String,
    replay: Option<String>,
    interval_override: Option<u64>,
    state_db_override: Option<String>,
    fresh: bool,
) -> Result<()> {
    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(secs) = interval_override {
        config.live.interval_secs = secs;
    }
    if let Some(path) = state_db_override {
        config.live.state_db = path;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_async(config, replay, fresh))
}

async fn run_async(config: Config, replay: Option<String>, fresh: bool) -> Result<()> {
    let strategy = create_strategy(&config)?;
    let warmup = strategy.lookback().max(2);

    // Replay mode stops once every bar has been delivered
    let (source, mut remaining_cycles): (Box<dyn PriceSource>, Option<usize>) = match &replay {
        Some(path) => {
            let bars = data::load_csv(path)?;
            let warmup = warmup.min(bars.len());
            let cycles = bars.len() - warmup + 1;
            info!("Replaying {} bars from {} ({} cycles)", bars.len(), path, cycles);
            (Box::new(ReplayPriceSource::new(bars, warmup)), Some(cycles))
        }
        None => {
            let path = data::data_file_path(
                &config.backtest.data_dir,
                &config.trading.symbol,
                &config.trading.timeframe,
            );
            info!("Tailing {}", path.display());
            (Box::new(CsvPriceSource::new(path)), None)
        }
    };

    let state_manager = SqliteStateManager::new(
        config.live.state_db.as_str(),
        config.live.json_backup.as_deref(),
    )?;

    let mut trader = LiveTrader::from_config(&config, strategy, source, Box::new(PaperVenue::new()));
    let symbol = trader.symbol().to_string();

    if fresh {
        info!("Starting flat (--fresh)");
    } else if let Some(snapshot) = state_manager.load_snapshot(&symbol)? {
        trader.restore(snapshot);
    }

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Ctrl+C received - finishing current cycle and shutting down");
                shutdown_signal.notify_one();
            }
            Err(err) => error!("Failed to listen for shutdown signal: {}", err),
        }
    });

    let period = if replay.is_some() {
        Duration::from_millis(1)
    } else {
        Duration::from_secs(config.live.interval_secs.max(1))
    };
    let mut tick = interval(period);

    info!(
        "Paper trading {} every {:?} with capital {:.2}",
        symbol, period, config.trading.initial_capital
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let report = tokio::task::block_in_place(|| trader.run_cycle());
                match report {
                    Ok(report) => {
                        for trade in &report.trades {
                            state_manager.record_trade(&symbol, trade)?;
                        }
                        if !report.order_errors.is_empty() {
                            warn!("{} order errors this cycle", report.order_errors.len());
                        }
                    }
                    Err(e) => error!("Error in trading cycle: {:#}", e),
                }
                state_manager.save_snapshot(&trader.snapshot())?;

                if let Some(cycles) = remaining_cycles.as_mut() {
                    *cycles = cycles.saturating_sub(1);
                    if *cycles == 0 {
                        info!("Replay finished");
                        break;
                    }
                }
            }
            _ = shutdown.notified() => {
                info!("Shutting down gracefully...");
                state_manager.save_snapshot(&trader.snapshot())?;
                break;
            }
        }
    }

    let snapshot = trader.snapshot();
    info!(
        "Final state {} after {} cycles, value {:.2}",
        snapshot.machine.state().label(),
        snapshot.cycle_count,
        snapshot.total_value
    );
    Ok(())
}
