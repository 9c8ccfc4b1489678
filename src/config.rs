//! Configuration management
//!
//! Loads the JSON configuration file. The `strategy` section stays free-form
//! JSON so each strategy parses its own typed config and the optimizer can
//! override individual keys.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::backtest::{FitPolicy, InvalidBarPolicy};
use crate::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default = "default_strategy")]
    pub strategy: serde_json::Value,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub live: LiveConfig,
    /// Grid search parameters for optimization (optional)
    /// Each key is a strategy param name, value is array of values to test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<HashMap<String, Vec<serde_json::Value>>>,
}

fn default_strategy() -> serde_json::Value {
    serde_json::json!({ "name": "lrc_grid" })
}

impl Default for Config {
    fn default() -> Self {
        Config {
            trading: TradingConfig::default(),
            strategy: default_strategy(),
            backtest: BacktestConfig::default(),
            live: LiveConfig::default(),
            grid: None,
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(contents).context("Failed to parse config JSON")?;

        if !config.trading.initial_capital.is_finite() || config.trading.initial_capital <= 0.0 {
            anyhow::bail!(
                "trading.initial_capital must be positive, got {}",
                config.trading.initial_capital
            );
        }

        Ok(config)
    }

    /// Strategy name from the `strategy` section
    pub fn strategy_name(&self) -> Result<String> {
        self.strategy
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .context("'name' is required in the 'strategy' section of config, e.g. \"strategy\": { \"name\": \"lrc_grid\" }")
    }

    /// Set a single strategy parameter
    pub fn set_strategy_param(&mut self, key: &str, value: serde_json::Value) {
        if let Some(obj) = self.strategy.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
    }

    /// Bars per year used to annualize the Sharpe ratio, when known up front
    pub fn periods_per_year(&self) -> Option<f64> {
        self.backtest
            .bars_per_year
            .or_else(|| timeframe_periods_per_year(&self.trading.timeframe))
    }
}

/// Trading configuration
///
/// Capital and prices must share a currency; no conversion is performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbol: String,
    pub timeframe: String,
    pub initial_capital: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            initial_capital: 10_000.0,
        }
    }
}

impl TradingConfig {
    pub fn symbol(&self) -> Symbol {
        Symbol::new(&self.symbol)
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub data_dir: String,
    pub results_dir: String,
    #[serde(default)]
    pub fit_policy: FitPolicy,
    #[serde(default)]
    pub invalid_bar_policy: InvalidBarPolicy,
    /// Overrides the annualization factor derived from the timeframe
    #[serde(default)]
    pub bars_per_year: Option<f64>,
    /// Inclusive start date (YYYY-MM-DD)
    #[serde(default)]
    pub start_date: Option<String>,
    /// Inclusive end date (YYYY-MM-DD)
    #[serde(default)]
    pub end_date: Option<String>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_dir: "data".to_string(),
            results_dir: "results".to_string(),
            fit_policy: FitPolicy::default(),
            invalid_bar_policy: InvalidBarPolicy::default(),
            bars_per_year: None,
            start_date: None,
            end_date: None,
        }
    }
}

/// Paper/live execution loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    pub interval_secs: u64,
    pub state_db: String,
    #[serde(default)]
    pub json_backup: Option<String>,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub retry_backoff_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            interval_secs: 60,
            state_db: "state/lrc_state.db".to_string(),
            json_backup: Some("state/lrc_state.json".to_string()),
            max_retries: 3,
            timeout_secs: 30,
            retry_backoff_ms: 500,
        }
    }
}

/// Bars per year for a timeframe label such as `15m`, `1h`, `4h`, `1d`, `1w`
pub fn timeframe_periods_per_year(timeframe: &str) -> Option<f64> {
    let timeframe = timeframe.trim();
    let unit_pos = timeframe.find(|c: char| !c.is_ascii_digit())?;
    let (count, unit) = timeframe.split_at(unit_pos);
    let count: f64 = count.parse().ok()?;
    if count <= 0.0 {
        return None;
    }

    let minutes = match unit {
        "m" => 1.0,
        "h" => 60.0,
        "d" => 60.0 * 24.0,
        "w" => 60.0 * 24.0 * 7.0,
        _ => return None,
    };

    Some(365.0 * 24.0 * 60.0 / (count * minutes))
}
