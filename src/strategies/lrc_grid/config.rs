//! LRC Grid Configuration
//!
//! Zones are pairs of sigma multipliers. Entry zones are looked up by the
//! channel trend, take-profit zones by the side of the open position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StrategyError, StrategyResult};
use crate::strategies::ZoneRange;
use crate::Direction;

/// Zone per position side. A missing side means "never trade it".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SideZones {
    #[serde(default)]
    pub long: Option<ZoneRange>,
    #[serde(default)]
    pub short: Option<ZoneRange>,
}

impl SideZones {
    pub fn get(&self, side: Direction) -> Option<ZoneRange> {
        match side {
            Direction::Long => self.long,
            Direction::Short => self.short,
        }
    }
}

/// Entry zones keyed by channel trend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendZones {
    pub uptrend: SideZones,
    pub downtrend: SideZones,
}

impl TrendZones {
    pub fn for_trend(&self, trend: Direction) -> &SideZones {
        match trend {
            Direction::Long => &self.uptrend,
            Direction::Short => &self.downtrend,
        }
    }
}

impl Default for TrendZones {
    fn default() -> Self {
        Self {
            uptrend: SideZones {
                long: Some(ZoneRange(-1.0, -3.0)),
                short: Some(ZoneRange(2.0, 3.0)),
            },
            downtrend: SideZones {
                long: Some(ZoneRange(-2.0, -3.0)),
                short: Some(ZoneRange(1.0, 3.0)),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrcGridConfig {
    /// Bars per channel fit (default: 200)
    #[serde(default = "default_lookback_candles", alias = "sma_window")]
    pub lookback_candles: usize,

    /// Band width in sigma for reporting (default: 2.0)
    #[serde(default = "default_deviation_multiplier")]
    pub deviation_multiplier: f64,

    /// Inflection point: bars before it are left out of the fit
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub favorable_zones: TrendZones,

    #[serde(default = "default_take_profit_zones")]
    pub take_profit_zones: SideZones,

    /// Soft stop distance in sigma (default: 4.0)
    #[serde(default = "default_soft_stop_sigma")]
    pub soft_stop_sigma: f64,

    /// Hard stop distance in sigma (default: 5.0)
    #[serde(default = "default_hard_stop_sigma")]
    pub hard_stop_sigma: f64,

    /// Consecutive closes beyond the soft stop before it fires (default: 1)
    #[serde(default = "default_soft_stop_confirm_bars")]
    pub soft_stop_confirm_bars: usize,

    /// Orders per grid (default: 5)
    #[serde(default = "default_sub_order_count")]
    pub sub_order_count: usize,

    /// Total quote amount split across the entry grid (default: 1000)
    #[serde(default = "default_order_size")]
    pub order_size: f64,

    /// Allow short positions (default: false for spot)
    #[serde(default)]
    pub allow_shorts: bool,

    /// Also enter against the channel trend (default: false)
    #[serde(default)]
    pub trade_counter_trend: bool,
}

fn default_lookback_candles() -> usize {
    200
}
fn default_deviation_multiplier() -> f64 {
    2.0
}
fn default_take_profit_zones() -> SideZones {
    SideZones {
        long: Some(ZoneRange(0.0, 3.0)),
        short: Some(ZoneRange(0.0, -3.0)),
    }
}
fn default_soft_stop_sigma() -> f64 {
    4.0
}
fn default_hard_stop_sigma() -> f64 {
    5.0
}
fn default_soft_stop_confirm_bars() -> usize {
    1
}
fn default_sub_order_count() -> usize {
    5
}
fn default_order_size() -> f64 {
    1000.0
}

impl Default for LrcGridConfig {
    fn default() -> Self {
        Self {
            lookback_candles: default_lookback_candles(),
            deviation_multiplier: default_deviation_multiplier(),
            start_time: None,
            favorable_zones: TrendZones::default(),
            take_profit_zones: default_take_profit_zones(),
            soft_stop_sigma: default_soft_stop_sigma(),
            hard_stop_sigma: default_hard_stop_sigma(),
            soft_stop_confirm_bars: default_soft_stop_confirm_bars(),
            sub_order_count: default_sub_order_count(),
            order_size: default_order_size(),
            allow_shorts: false,
            trade_counter_trend: false,
        }
    }
}

impl LrcGridConfig {
    pub fn validate(&self) -> StrategyResult<()> {
        let invalid = |msg: String| Err(StrategyError::Configuration(msg));

        if self.lookback_candles < 2 {
            return invalid(format!(
                "lookback_candles must be >= 2, got {}",
                self.lookback_candles
            ));
        }
        if self.sub_order_count == 0 {
            return invalid("sub_order_count must be >= 1".to_string());
        }
        if !self.order_size.is_finite() || self.order_size <= 0.0 {
            return invalid(format!("order_size must be positive, got {}", self.order_size));
        }
        if !self.deviation_multiplier.is_finite() || self.deviation_multiplier < 0.0 {
            return invalid(format!(
                "deviation_multiplier must be >= 0, got {}",
                self.deviation_multiplier
            ));
        }
        if !self.soft_stop_sigma.is_finite() || self.soft_stop_sigma <= 0.0 {
            return invalid(format!(
                "soft_stop_sigma must be positive, got {}",
                self.soft_stop_sigma
            ));
        }
        if !self.hard_stop_sigma.is_finite() || self.hard_stop_sigma < self.soft_stop_sigma {
            return invalid(format!(
                "hard_stop_sigma ({}) must be >= soft_stop_sigma ({})",
                self.hard_stop_sigma, self.soft_stop_sigma
            ));
        }
        if self.soft_stop_confirm_bars == 0 {
            return invalid("soft_stop_confirm_bars must be >= 1".to_string());
        }

        let zones = [
            self.favorable_zones.uptrend,
            self.favorable_zones.downtrend,
            self.take_profit_zones,
        ];
        for range in zones.iter().flat_map(|z| [z.long, z.short]).flatten() {
            if !range.0.is_finite() || !range.1.is_finite() {
                return invalid(format!("zone bounds must be finite, got {:?}", range));
            }
        }

        Ok(())
    }
}
