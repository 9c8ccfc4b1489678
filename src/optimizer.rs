//! Parameter Optimization
//!
//! Runs one backtest per config in parallel and ranks the results.

use indicatif::ProgressBar;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::backtest::Backtester;
use crate::strategies::Strategy;
use crate::{Candle, Config};

/// Optimization result for a single parameter combination
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub params: BTreeMap<String, serde_json::Value>,
    pub sharpe_ratio: Option<f64>,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub chase_count: usize,
    /// Set when the combination could not be built or run
    pub error: Option<String>,
}

impl OptimizationResult {
    fn failed(params: BTreeMap<String, serde_json::Value>, error: String) -> Self {
        Self {
            params,
            sharpe_ratio: None,
            total_return: 0.0,
            max_drawdown: 0.0,
            win_rate: 0.0,
            total_trades: 0,
            chase_count: 0,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMetric {
    Sharpe,
    Return,
    Drawdown,
    WinRate,
}

impl FromStr for SortMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sharpe" => Ok(SortMetric::Sharpe),
            "return" => Ok(SortMetric::Return),
            "drawdown" => Ok(SortMetric::Drawdown),
            "win_rate" => Ok(SortMetric::WinRate),
            other => Err(format!(
                "unknown sort metric '{}': use sharpe, return, drawdown or win_rate",
                other
            )),
        }
    }
}

pub struct Optimizer {
    /// Grid keys reported for each result
    param_keys: Vec<String>,
}

impl Optimizer {
    pub fn new(base_config: &Config) -> Self {
        let mut param_keys: Vec<String> = base_config
            .grid
            .as_ref()
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default();
        param_keys.sort();
        Optimizer { param_keys }
    }

    /// Backtest every config in parallel
    ///
    /// `candles` is shared by reference across workers.
    pub fn optimize<F>(
        &self,
        candles: &[Candle],
        configs: Vec<Config>,
        strategy_factory: F,
        progress_bar: Option<&ProgressBar>,
    ) -> Vec<OptimizationResult>
    where
        F: Fn(&Config) -> anyhow::Result<Box<dyn Strategy>> + Send + Sync,
    {
        tracing::info!("Testing {} parameter combinations", configs.len());

        configs
            .par_iter()
            .map(|config| {
                let result = self.evaluate(candles, config, &strategy_factory);
                if let Some(pb) = progress_bar {
                    pb.inc(1);
                }
                result
            })
            .collect()
    }

    /// Run sequentially (for debugging)
    pub fn optimize_sequential<F>(
        &self,
        candles: &[Candle],
        configs: Vec<Config>,
        strategy_factory: F,
    ) -> Vec<OptimizationResult>
    where
        F: Fn(&Config) -> anyhow::Result<Box<dyn Strategy>>,
    {
        tracing::info!(
            "Testing {} parameter combinations sequentially",
            configs.len()
        );

        configs
            .iter()
            .map(|config| self.evaluate(candles, config, &strategy_factory))
            .collect()
    }

    fn evaluate<F>(&self, candles: &[Candle], config: &Config, strategy_factory: &F) -> OptimizationResult
    where
        F: Fn(&Config) -> anyhow::Result<Box<dyn Strategy>>,
    {
        let params = crate::grid::extract_params(config, &self.param_keys);

        let strategy = match strategy_factory(config) {
            Ok(s) => s,
            Err(e) => return OptimizationResult::failed(params, format!("{:#}", e)),
        };

        match Backtester::new(config.clone(), strategy).run(candles) {
            Ok(result) => OptimizationResult {
                params,
                sharpe_ratio: result.metrics.sharpe_ratio,
                total_return: result.metrics.total_return,
                max_drawdown: result.metrics.max_drawdown,
                win_rate: result.metrics.win_rate,
                total_trades: result.metrics.total_trades,
                chase_count: result.metrics.chase_count,
                error: None,
            },
            Err(e) => OptimizationResult::failed(params, e.to_string()),
        }
    }

    /// Best first. Failed runs and missing Sharpe ratios sort last.
    pub fn sort_results(results: &mut [OptimizationResult], sort_by: SortMetric) {
        results.sort_by_key(|r| {
            let score = if r.error.is_some() {
                f64::NEG_INFINITY
            } else {
                match sort_by {
                    SortMetric::Sharpe => r.sharpe_ratio.unwrap_or(f64::NEG_INFINITY),
                    SortMetric::Return => r.total_return,
                    SortMetric::Drawdown => -r.max_drawdown,
                    SortMetric::WinRate => r.win_rate,
                }
            };
            std::cmp::Reverse(OrderedFloat(score))
        });
    }
}
