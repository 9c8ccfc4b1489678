//! Integration tests for the LRC strategies system
//!
//! These tests drive the channel, strategy, state machine and simulator
//! together through the public API.

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::AtomicBool;

use lrc_strategies::backtest::{Backtester, FitPolicy, InvalidBarPolicy};
use lrc_strategies::channel::{fit_channel, ChannelParameters};
use lrc_strategies::execution::{PaperVenue, ReplayPriceSource, RetryPolicy};
use lrc_strategies::grid;
use lrc_strategies::live::LiveTrader;
use lrc_strategies::optimizer::Optimizer;
use lrc_strategies::state_machine::PositionState;
use lrc_strategies::state_manager::SqliteStateManager;
use lrc_strategies::strategies::lrc_grid::{LrcGridConfig, LrcGridStrategy};
use lrc_strategies::strategies::{create_strategy, SideLevels, Strategy, TriggerLevels};
use lrc_strategies::{Candle, Config, Direction, ExitReason, StrategyError, StrategyResult};

// =============================================================================
// Test Utilities
// =============================================================================

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn flat_candles(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Candle::flat(start() + Duration::hours(i as i64), c))
        .collect()
}

/// Trending sine wave with a one-point high/low range
fn wave_candles(count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let c = 100.0 + 0.05 * i as f64 + 6.0 * (i as f64 * 0.3).sin();
            Candle::new(start() + Duration::hours(i as i64), c, c + 1.0, c - 1.0, c, 10.0).unwrap()
        })
        .collect()
}

fn config(capital: f64, policy: FitPolicy) -> Config {
    let mut config = Config::default();
    config.trading.initial_capital = capital;
    config.backtest.fit_policy = policy;
    config
}

fn lrc_strategy(lookback: usize) -> Box<dyn Strategy> {
    Box::new(LrcGridStrategy::new(LrcGridConfig {
        lookback_candles: lookback,
        sub_order_count: 1,
        ..LrcGridConfig::default()
    }))
}

/// Channel-free strategy: entry at 95, exit trigger rising one point per bar
#[derive(Clone)]
struct RisingExitStrategy;

impl Strategy for RisingExitStrategy {
    fn name(&self) -> &'static str {
        "rising_exit"
    }

    fn clone_boxed(&self) -> Box<dyn Strategy> {
        Box::new(self.clone())
    }

    fn lookback(&self) -> usize {
        2
    }

    fn fit(&self, window: &[Candle]) -> StrategyResult<ChannelParameters> {
        let (first, last) = match (window.first(), window.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => {
                return Err(StrategyError::InsufficientData {
                    available: 0,
                    required: 1,
                })
            }
        };
        ChannelParameters::new(1.0, 100.0, 1.0, 0, window.len() - 1, first.datetime, last.datetime)
    }

    fn trigger_levels(&self, _channel: &ChannelParameters, offset: f64) -> TriggerLevels {
        TriggerLevels {
            trend: Direction::Long,
            long: SideLevels {
                entry: Some(95.0),
                exit: Some(100.0 + offset),
                soft_stop: 60.0,
                hard_stop: 50.0,
            },
            short: SideLevels {
                entry: None,
                exit: None,
                soft_stop: 140.0,
                hard_stop: 150.0,
            },
        }
    }
}

// =============================================================================
// Channel + Strategy Tests
// =============================================================================

#[test]
fn test_channel_and_grid_on_known_series() {
    let candles = flat_candles(&[100.0, 102.0, 105.0, 103.0, 99.0, 98.0, 101.0, 104.0, 107.0, 110.0]);
    let channel = fit_channel(&candles, None).unwrap();

    assert_relative_eq!(channel.slope, 0.6848484848484848, epsilon = 1e-12);
    assert_relative_eq!(channel.intercept, 99.81818181818183, epsilon = 1e-9);
    assert_relative_eq!(channel.std_dev, 2.936086861897321, epsilon = 1e-9);
    assert_eq!(channel.direction(), Direction::Long);

    let strategy = LrcGridStrategy::new(LrcGridConfig::default());
    let offset = channel.latest_offset() as f64;
    let grid = strategy.entry_grid(&channel, offset);
    assert_eq!(grid.len(), 5);
    assert_relative_eq!(grid[0].price, channel.price_at(offset, -1.0));
    assert_relative_eq!(grid[4].price, channel.price_at(offset, -3.0));

    let total: f64 = grid.iter().map(|o| o.amount).sum();
    assert_relative_eq!(total, strategy.config().order_size, epsilon = 1e-9);
}

// =============================================================================
// Backtest Scenarios
// =============================================================================

#[test]
fn test_single_fit_round_trip() {
    let candles = flat_candles(&[100.0, 102.0, 105.0, 103.0, 99.0, 98.0, 101.0, 104.0, 107.0, 110.0]);
    let result = Backtester::new(config(10_000.0, FitPolicy::Once), lrc_strategy(200))
        .run(&candles)
        .unwrap();

    assert_eq!(result.ledger.len(), 10);
    let states: Vec<&str> = result.ledger.iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec!["OUT", "OUT", "OUT", "OUT", "OUT", "IN", "IN", "WANTS_TO_EXIT", "OUT", "OUT"]
    );

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.direction, Direction::Long);
    assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
    assert_relative_eq!(trade.entry_price.to_f64(), 99.62148889567844, epsilon = 1e-9);
    assert_relative_eq!(trade.exit_price.to_f64(), 103.92727272727274, epsilon = 1e-9);
    assert_eq!(trade.entry_time, start() + Duration::hours(5));
    assert_eq!(trade.exit_time, start() + Duration::hours(8));

    assert_relative_eq!(result.ledger[5].holdings, 100.3799492544404, epsilon = 1e-9);
    assert_eq!(result.ledger[5].cash, 0.0);
    assert_relative_eq!(result.metrics.final_value, 10432.214362516026, epsilon = 1e-6);
    assert_relative_eq!(result.metrics.realized_pnl, 432.214362516026, epsilon = 1e-6);
    assert_eq!(result.metrics.chase_count, 0);
}

#[test]
fn test_limit_chase_until_touched() {
    let candles = flat_candles(&[100.0, 94.0, 101.0, 99.0, 100.0, 100.0, 105.0]);
    let result = Backtester::new(config(9_500.0, FitPolicy::Once), Box::new(RisingExitStrategy))
        .run(&candles)
        .unwrap();

    let states: Vec<&str> = result.ledger.iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec!["OUT", "IN", "WANTS_TO_EXIT", "WANTS_TO_EXIT", "WANTS_TO_EXIT", "WANTS_TO_EXIT", "OUT"]
    );

    // requested at 101, re-priced to 102, 103, 104, filled at 104
    assert_eq!(result.metrics.chase_count, 3);
    assert_eq!(result.trades.len(), 1);
    assert_relative_eq!(result.trades[0].entry_price.to_f64(), 95.0);
    assert_relative_eq!(result.trades[0].exit_price.to_f64(), 104.0);
    assert_relative_eq!(result.metrics.final_value, 10_400.0, epsilon = 1e-9);
    assert_eq!(result.final_position.state(), &PositionState::Out);
}

#[test]
fn test_backtest_is_deterministic() {
    let candles = wave_candles(300);
    let run = || {
        Backtester::new(config(10_000.0, FitPolicy::EveryBar), lrc_strategy(40))
            .run(&candles)
            .unwrap()
    };
    let a = run();
    let b = run();

    assert_eq!(a.trades, b.trades);
    assert_eq!(a.returns, b.returns);
    assert_eq!(a.metrics.final_value, b.metrics.final_value);
    assert_eq!(a.final_position, b.final_position);
}

#[test]
fn test_long_only_value_never_negative() {
    let candles = wave_candles(300);
    for policy in [FitPolicy::Once, FitPolicy::EveryBar, FitPolicy::Every(10)] {
        let result = Backtester::new(config(10_000.0, policy), lrc_strategy(40))
            .run(&candles)
            .unwrap();
        assert_eq!(result.ledger.len(), candles.len());
        assert!(result.ledger.iter().all(|r| r.total_value >= 0.0));
        assert!(result.ledger.iter().all(|r| r.cash == 0.0 || r.holdings == 0.0));
    }
}

/// Falling sine wave with a one-point high/low range
fn falling_wave_candles(count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let c = 200.0 - 0.3 * i as f64 + 6.0 * (i as f64 * 0.3).sin();
            Candle::new(start() + Duration::hours(i as i64), c, c + 1.0, c - 1.0, c, 10.0).unwrap()
        })
        .collect()
}

#[test]
fn test_shorts_keep_ledger_invariants() {
    let strategy = || -> Box<dyn Strategy> {
        Box::new(LrcGridStrategy::new(LrcGridConfig {
            lookback_candles: 40,
            sub_order_count: 1,
            allow_shorts: true,
            trade_counter_trend: true,
            ..LrcGridConfig::default()
        }))
    };

    let mut shorted = false;
    for candles in [falling_wave_candles(300), wave_candles(300)] {
        for policy in [FitPolicy::Once, FitPolicy::EveryBar, FitPolicy::Every(10)] {
            let result = Backtester::new(config(10_000.0, policy), strategy())
                .run(&candles)
                .unwrap();
            assert_eq!(result.ledger.len(), candles.len());
            for row in &result.ledger {
                assert!(row.cash >= 0.0, "negative cash at {}", row.time);
                assert!(row.total_value >= 0.0, "negative value at {}", row.time);
                assert!(row.cash == 0.0 || row.holdings == 0.0);
            }
            shorted |= result.ledger.iter().any(|r| r.holdings < 0.0);
        }
    }
    assert!(shorted);
}

#[test]
fn test_invalid_bar_policies() {
    let mut candles = wave_candles(60);
    candles[30].high = candles[30].low - 1.0;

    let mut cfg = config(10_000.0, FitPolicy::EveryBar);
    let aborted = Backtester::new(cfg.clone(), lrc_strategy(20)).run(&candles);
    assert!(matches!(aborted, Err(StrategyError::InvalidBar { index: 30, .. })));

    cfg.backtest.invalid_bar_policy = InvalidBarPolicy::Skip;
    let skipped = Backtester::new(cfg, lrc_strategy(20)).run(&candles).unwrap();
    assert_eq!(skipped.rejected_bars, vec![30]);
    assert_eq!(skipped.ledger.len(), 59);
    assert_eq!(skipped.metrics.bars_rejected, 1);
}

#[test]
fn test_cancel_before_first_bar() {
    let candles = wave_candles(50);
    let cancel = AtomicBool::new(true);
    let result = Backtester::new(config(10_000.0, FitPolicy::EveryBar), lrc_strategy(20))
        .run_with_cancel(&candles, &cancel)
        .unwrap();

    assert!(result.interrupted);
    assert!(result.ledger.is_empty());
    assert_eq!(result.metrics.final_value, 10_000.0);
}

// =============================================================================
// Optimizer Tests
// =============================================================================

#[test]
fn test_grid_optimization_covers_every_combination() {
    let mut cfg = config(10_000.0, FitPolicy::EveryBar);
    cfg.set_strategy_param("lookback_candles", serde_json::json!(30));
    grid::apply_overrides(
        &mut cfg,
        &[
            "sub_order_count=1,3".to_string(),
            "soft_stop_sigma=3,4".to_string(),
            "hard_stop_sigma=2".to_string(),
        ],
    )
    .unwrap();

    let configs = grid::generate_grid_configs(&cfg);
    assert_eq!(configs.len(), 4);

    let candles = wave_candles(200);
    let optimizer = Optimizer::new(&cfg);
    let results = optimizer.optimize_sequential(&candles, configs.clone(), create_strategy);
    assert_eq!(results.len(), 4);

    // hard stop inside the soft stop fails validation for every combination
    assert!(results.iter().all(|r| r.error.is_some()));
    assert!(results.iter().all(|r| r.params.contains_key("soft_stop_sigma")));

    let mut cfg_ok = cfg.clone();
    cfg_ok.grid.as_mut().unwrap().remove("hard_stop_sigma");
    let configs = grid::generate_grid_configs(&cfg_ok);
    let parallel = optimizer.optimize(&candles, configs.clone(), create_strategy, None);
    let sequential = optimizer.optimize_sequential(&candles, configs, create_strategy);
    assert_eq!(parallel.len(), 4);
    for (p, s) in parallel.iter().zip(&sequential) {
        assert!(p.error.is_none());
        assert_eq!(p.params, s.params);
        assert_eq!(p.total_return, s.total_return);
    }
}

// =============================================================================
// Live Loop + Persistence
// =============================================================================

#[test]
fn test_paper_loop_persists_and_resumes() {
    let cfg = config(10_000.0, FitPolicy::EveryBar);
    let bars = wave_candles(80);
    let store = SqliteStateManager::in_memory().unwrap();

    let make = |warmup: usize| {
        LiveTrader::new(
            cfg.trading.symbol(),
            lrc_strategy(20),
            cfg.trading.initial_capital,
            Box::new(ReplayPriceSource::new(bars.clone(), warmup)),
            Box::new(PaperVenue::new()),
            RetryPolicy::default().with_backoff(std::time::Duration::ZERO),
        )
    };

    let mut trader = make(20);
    let mut trades = Vec::new();
    for _ in 0..30 {
        let report = trader.run_cycle().unwrap();
        for trade in &report.trades {
            store.record_trade(trader.symbol().as_str(), trade).unwrap();
        }
        trades.extend(report.trades);
        store.save_snapshot(&trader.snapshot()).unwrap();
    }

    let saved = store.load_snapshot(trader.symbol().as_str()).unwrap().unwrap();
    assert_eq!(saved.cycle_count, 30);
    assert_eq!(&saved.machine, trader.machine());
    assert_eq!(store.load_trades(trader.symbol().as_str()).unwrap(), trades);

    let mut resumed = make(20);
    resumed.restore(saved);
    assert_eq!(resumed.machine(), trader.machine());
    assert_eq!(resumed.cycle_count(), 30);
}
