//! Backtesting engine
//!
//! Replays bars through the position state machine. Levels for bar `i` come
//! from the channel fitted up to bar `i - 1`; one ledger row is appended per
//! accepted bar after its transition is fully applied.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};

use crate::channel::ChannelParameters;
use crate::error::{StrategyError, StrategyResult};
use crate::state_machine::{PositionStateMachine, Transition};
use crate::strategies::{Strategy, TriggerLevels};
use crate::{Candle, CandleValidationError, Config, PerformanceMetrics, Trade};

/// When the channel is refitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitPolicy {
    /// One fit over the whole series
    Once,
    /// Rolling window ending at the previous bar
    #[default]
    EveryBar,
    /// Refit every n bars, extrapolating the line in between
    Every(usize),
}

impl FromStr for FitPolicy {
    type Err = String;

    /// `once`, `every_bar`, or `every:N`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "once" => Ok(FitPolicy::Once),
            "every_bar" | "every-bar" => Ok(FitPolicy::EveryBar),
            other => other
                .strip_prefix("every:")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|&n| n > 0)
                .map(FitPolicy::Every)
                .ok_or_else(|| format!("invalid fit policy '{}': use once, every_bar or every:N", s)),
        }
    }
}

/// What to do with a bar that fails validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidBarPolicy {
    #[default]
    Abort,
    Skip,
}

/// One row of the portfolio ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRow {
    pub time: DateTime<Utc>,
    pub close: f64,
    pub cash: f64,
    pub holdings: f64,
    pub total_value: f64,
    pub state: &'static str,
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub ledger: Vec<LedgerRow>,
    pub trades: Vec<Trade>,
    pub metrics: PerformanceMetrics,
    /// Period returns of `total_value`
    pub returns: Vec<f64>,
    /// Input indices of bars skipped under `InvalidBarPolicy::Skip`
    pub rejected_bars: Vec<usize>,
    /// Stopped early by the cancel flag
    pub interrupted: bool,
    /// Position after the last bar (an open position is not force-closed)
    pub final_position: PositionStateMachine,
    pub last_channel: Option<ChannelParameters>,
}

struct ActiveFit {
    channel: ChannelParameters,
    window_start: usize,
    fitted_at: usize,
}

impl ActiveFit {
    fn levels(&self, strategy: &dyn Strategy, prev: usize) -> Option<TriggerLevels> {
        let origin = self.window_start + self.channel.start_index;
        if prev < origin {
            return None;
        }
        Some(strategy.trigger_levels(&self.channel, (prev - origin) as f64))
    }
}

/// Backtest engine
pub struct Backtester {
    config: Config,
    strategy: Box<dyn Strategy>,
}

impl Backtester {
    pub fn new(config: Config, strategy: Box<dyn Strategy>) -> Self {
        Backtester { config, strategy }
    }

    pub fn run(&self, candles: &[Candle]) -> StrategyResult<BacktestResult> {
        self.run_with_cancel(candles, &AtomicBool::new(false))
    }

    /// Run until the series ends or `cancel` is set
    ///
    /// The flag is checked between bars only.
    pub fn run_with_cancel(
        &self,
        candles: &[Candle],
        cancel: &AtomicBool,
    ) -> StrategyResult<BacktestResult> {
        let capital = self.config.trading.initial_capital;
        let policy = self.config.backtest.fit_policy;
        let invalid_policy = self.config.backtest.invalid_bar_policy;
        let lookback = self.strategy.lookback().max(crate::channel::MIN_FIT_BARS);

        info!(
            "Backtest {} on {} bars: capital={}, fit_policy={:?}",
            self.strategy.name(),
            candles.len(),
            capital,
            policy
        );

        let mut machine =
            PositionStateMachine::new(capital, self.strategy.soft_stop_confirm_bars());
        let mut accepted: Vec<Candle> = Vec::with_capacity(candles.len());
        let mut ledger: Vec<LedgerRow> = Vec::with_capacity(candles.len());
        let mut trades = Vec::new();
        let mut rejected_bars = Vec::new();
        let mut chase_count = 0usize;
        let mut interrupted = false;

        let mut active = match policy {
            FitPolicy::Once => self.fit_once(candles)?,
            _ => None,
        };

        for (index, candle) in candles.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                warn!("Backtest interrupted at bar {}", index);
                interrupted = true;
                break;
            }

            if let Err(source) = check_bar(candle, accepted.last()) {
                match invalid_policy {
                    InvalidBarPolicy::Abort => {
                        return Err(StrategyError::InvalidBar {
                            index,
                            time: candle.datetime,
                            source,
                        })
                    }
                    InvalidBarPolicy::Skip => {
                        warn!("Skipping invalid bar {} ({}): {}", index, candle.datetime, source);
                        rejected_bars.push(index);
                        continue;
                    }
                }
            }

            if !accepted.is_empty() {
                let prev = accepted.len() - 1;
                if self.needs_refit(policy, active.as_ref(), prev) {
                    let window_start = (prev + 1).saturating_sub(lookback);
                    active = match self.strategy.fit(&accepted[window_start..=prev]) {
                        Ok(channel) => Some(ActiveFit {
                            channel,
                            window_start,
                            fitted_at: prev,
                        }),
                        Err(e) if e.is_recoverable() => {
                            debug!("No channel at bar {}: {}", index, e);
                            None
                        }
                        Err(e) => return Err(e),
                    };
                }

                let levels = active
                    .as_ref()
                    .and_then(|fit| fit.levels(self.strategy.as_ref(), prev));

                let transition = machine.on_bar(candle, levels.as_ref()).map_err(|source| {
                    StrategyError::InvalidBar {
                        index,
                        time: candle.datetime,
                        source,
                    }
                })?;

                match transition {
                    Transition::Chased { .. } => chase_count += 1,
                    Transition::Exited { trade } => trades.push(trade),
                    Transition::Reversed { closed, .. } => trades.push(closed),
                    _ => {}
                }
            }

            accepted.push(candle.clone());
            ledger.push(LedgerRow {
                time: candle.datetime,
                close: candle.close,
                cash: machine.cash(),
                holdings: machine.holdings(),
                total_value: machine.total_value(candle.close),
                state: machine.state().label(),
            });
        }

        let returns = period_returns(&ledger);
        let periods_per_year = self
            .config
            .periods_per_year()
            .or_else(|| infer_periods_per_year(&ledger));
        let metrics = calculate_metrics(
            capital,
            &ledger,
            &trades,
            &returns,
            periods_per_year,
            chase_count,
            rejected_bars.len(),
        );

        info!(
            "Backtest finished: final value {:.2} ({:+.2}%), {} trades, {} chases",
            metrics.final_value, metrics.total_return, metrics.total_trades, metrics.chase_count
        );

        Ok(BacktestResult {
            ledger,
            trades,
            metrics,
            returns,
            rejected_bars,
            interrupted,
            final_position: machine,
            last_channel: active.map(|fit| fit.channel),
        })
    }

    fn needs_refit(&self, policy: FitPolicy, active: Option<&ActiveFit>, prev: usize) -> bool {
        match (policy, active) {
            (FitPolicy::Once, _) => false,
            (FitPolicy::EveryBar, _) => true,
            (FitPolicy::Every(_), None) => true,
            (FitPolicy::Every(n), Some(fit)) => prev - fit.fitted_at >= n.max(1),
        }
    }

    /// Single fit over every bar the run will accept
    fn fit_once(&self, candles: &[Candle]) -> StrategyResult<Option<ActiveFit>> {
        let mut usable: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            if check_bar(candle, usable.last()).is_ok() {
                usable.push(candle.clone());
            }
        }

        match self.strategy.fit(&usable) {
            Ok(channel) => Ok(Some(ActiveFit {
                channel,
                window_start: 0,
                fitted_at: usable.len().saturating_sub(1),
            })),
            Err(e) if e.is_recoverable() => {
                warn!("No channel for the series: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn check_bar(candle: &Candle, previous: Option<&Candle>) -> Result<(), CandleValidationError> {
    candle.validate()?;
    match previous {
        Some(prev) if candle.datetime <= prev.datetime => {
            Err(CandleValidationError::NonIncreasingTime {
                previous: prev.datetime,
                current: candle.datetime,
            })
        }
        _ => Ok(()),
    }
}

fn period_returns(ledger: &[LedgerRow]) -> Vec<f64> {
    ledger
        .windows(2)
        .map(|w| {
            if w[0].total_value > 0.0 {
                (w[1].total_value - w[0].total_value) / w[0].total_value
            } else {
                0.0
            }
        })
        .collect()
}

/// Bars per year from the median spacing between ledger rows
fn infer_periods_per_year(ledger: &[LedgerRow]) -> Option<f64> {
    let mut gaps: Vec<i64> = ledger
        .windows(2)
        .map(|w| (w[1].time - w[0].time).num_seconds())
        .filter(|&s| s > 0)
        .collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_unstable();
    let median = gaps[gaps.len() / 2] as f64;
    Some(365.0 * 24.0 * 3600.0 / median)
}

fn calculate_metrics(
    initial_capital: f64,
    ledger: &[LedgerRow],
    trades: &[Trade],
    returns: &[f64],
    periods_per_year: Option<f64>,
    chase_count: usize,
    bars_rejected: usize,
) -> PerformanceMetrics {
    let final_value = ledger.last().map_or(initial_capital, |row| row.total_value);
    let total_return = (final_value - initial_capital) / initial_capital * 100.0;

    let sharpe_ratio = match periods_per_year {
        Some(periods) if returns.len() >= 2 => {
            let mean = returns.iter().mean();
            let std_dev = returns.iter().std_dev();
            (std_dev.is_finite() && std_dev > 0.0).then(|| mean / std_dev * periods.sqrt())
        }
        _ => None,
    };

    let mut peak = initial_capital;
    let mut max_dd = 0.0;
    for row in ledger {
        if row.total_value > peak {
            peak = row.total_value;
        }
        if peak > 0.0 {
            let dd = (peak - row.total_value) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    let winning_trades = trades.iter().filter(|t| t.pnl.is_positive()).count();
    let win_rate = if trades.is_empty() {
        0.0
    } else {
        winning_trades as f64 / trades.len() as f64 * 100.0
    };
    let realized_pnl = trades.iter().map(|t| &t.pnl).sum::<crate::Money>().to_f64();

    PerformanceMetrics {
        initial_capital,
        final_value,
        total_return,
        sharpe_ratio,
        max_drawdown: max_dd * 100.0,
        total_trades: trades.len(),
        winning_trades,
        losing_trades: trades.len() - winning_trades,
        win_rate,
        realized_pnl,
        chase_count,
        bars_processed: ledger.len(),
        bars_rejected,
    }
}
