//! LRC Grid Strategy Module
//!
//! Regression-channel zones, laddered grids and stop levels.

pub mod config;
pub mod strategy;
pub mod utils;

pub use config::{LrcGridConfig, SideZones, TrendZones};
pub use strategy::LrcGridStrategy;
pub use utils::{create_strategy_from_config, parse_config};
