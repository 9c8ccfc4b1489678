//! Utility functions for the LRC Grid Strategy

use anyhow::Result;

use super::config::LrcGridConfig;
use super::strategy::LrcGridStrategy;
use crate::Config;

/// Parse the typed strategy config from the global config
pub fn parse_config(config: &Config) -> Result<LrcGridConfig> {
    let grid_config: LrcGridConfig = serde_json::from_value(config.strategy.clone())
        .map_err(|e| anyhow::anyhow!("Failed to parse strategy config: {}", e))?;
    grid_config.validate()?;
    Ok(grid_config)
}

/// Create an LRC Grid Strategy from global config
pub fn create_strategy_from_config(config: &Config) -> Result<LrcGridStrategy> {
    Ok(LrcGridStrategy::new(parse_config(config)?))
}
