//! Parameter sweep generation
//!
//! Expands the config's `grid` section into one config per combination of
//! strategy overrides.

use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};

use crate::Config;

/// All config combinations from the grid section
///
/// Keys are visited in sorted order so the output is deterministic. Without
/// a grid the base config is returned alone.
pub fn generate_grid_configs(config: &Config) -> Vec<Config> {
    let grid = match &config.grid {
        Some(g) if !g.is_empty() => g,
        _ => return vec![config.clone()],
    };

    let sorted: BTreeMap<&String, &Vec<serde_json::Value>> = grid.iter().collect();
    if sorted.values().any(|values| values.is_empty()) {
        return Vec::new();
    }

    sorted
        .values()
        .map(|values| values.iter())
        .multi_cartesian_product()
        .map(|combo| {
            let mut cfg = config.clone();
            cfg.grid = None;
            for (key, value) in sorted.keys().zip(combo) {
                cfg.set_strategy_param(key, value.clone());
            }
            cfg
        })
        .collect()
}

pub fn total_combinations(config: &Config) -> usize {
    match &config.grid {
        Some(grid) if !grid.is_empty() => grid.values().map(|v| v.len()).product(),
        _ => 1,
    }
}

/// Parse `key=v1,v2,...` into a grid entry
///
/// Values become integers, floats, booleans or strings, in that order of
/// preference. JSON arrays (zone bounds) can be given as `key=[-1,-3];[-2,-3]`.
pub fn parse_grid_override(s: &str) -> Option<(String, Vec<serde_json::Value>)> {
    let (key, raw) = s.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let separator = if raw.trim_start().starts_with('[') { ';' } else { ',' };
    let values: Vec<serde_json::Value> = raw
        .split(separator)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            if let Ok(n) = v.parse::<i64>() {
                serde_json::json!(n)
            } else if let Ok(n) = v.parse::<f64>() {
                serde_json::json!(n)
            } else if let Ok(b) = v.parse::<bool>() {
                serde_json::json!(b)
            } else {
                serde_json::from_str(v).unwrap_or_else(|_| serde_json::json!(v))
            }
        })
        .collect();

    (!values.is_empty()).then(|| (key.to_string(), values))
}

/// Merge CLI `--set` overrides into the config grid
pub fn apply_overrides(config: &mut Config, overrides: &[String]) -> anyhow::Result<()> {
    for override_str in overrides {
        let (key, values) = parse_grid_override(override_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid override '{}', expected key=v1,v2", override_str))?;
        config.grid.get_or_insert_with(HashMap::new).insert(key, values);
    }
    Ok(())
}

/// Strategy parameters that vary across the grid, for reporting
pub fn extract_params(config: &Config, keys: &[String]) -> BTreeMap<String, serde_json::Value> {
    keys.iter()
        .filter_map(|k| config.strategy.get(k).map(|v| (k.clone(), v.clone())))
        .collect()
}

pub fn format_params(params: &BTreeMap<String, serde_json::Value>) -> String {
    params
        .iter()
        .map(|(k, v)| match v.as_f64() {
            Some(n) if n.fract() != 0.0 => format!("{}={:.2}", k, n),
            _ => format!("{}={}", k, v),
        })
        .join(", ")
}
