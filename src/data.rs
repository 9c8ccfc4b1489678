//! Data loading and result export
//!
//! Reads OHLCV bars from CSV and writes backtest ledgers and trade logs.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backtest::LedgerRow;
use crate::{Candle, Trade};

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Parse an RFC3339 or `%Y-%m-%d %H:%M:%S` (UTC) timestamp
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .with_context(|| format!("Failed to parse datetime: {}", s))
}

/// Load OHLCV data from a CSV file with columns
/// `datetime,open,high,low,close,volume`
///
/// Bars are not validated here; the simulator applies its invalid-bar policy.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let field = |i: usize, name: &str| -> Result<f64> {
            record
                .get(i)
                .with_context(|| format!("Missing {} column in row {}", name, row_idx + 1))?
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Failed to parse {} in row {}", name, row_idx + 1))
        };

        let datetime = parse_datetime(record.get(0).context("Missing datetime column")?)?;

        candles.push(Candle::new_unchecked(
            datetime,
            field(1, "open")?,
            field(2, "high")?,
            field(3, "low")?,
            field(4, "close")?,
            field(5, "volume")?,
        ));
    }

    info!("Loaded {} candles from {}", candles.len(), path.display());
    Ok(candles)
}

/// `{data_dir}/{symbol}_{timeframe}.csv`
pub fn data_file_path(data_dir: impl AsRef<Path>, symbol: &str, timeframe: &str) -> PathBuf {
    data_dir.as_ref().join(format!("{}_{}.csv", symbol, timeframe))
}

/// Keep bars between two `YYYY-MM-DD` dates, both inclusive
pub fn filter_date_range(
    candles: Vec<Candle>,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Vec<Candle>> {
    let parse = |s: &str| {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
    };
    let start = start.map(parse).transpose()?;
    let end = end.map(parse).transpose()?;

    let before = candles.len();
    let filtered: Vec<Candle> = candles
        .into_iter()
        .filter(|c| {
            let day = c.datetime.date_naive();
            start.map_or(true, |s| day >= s) && end.map_or(true, |e| day <= e)
        })
        .collect();

    if filtered.len() != before {
        info!("Date filter kept {} of {} candles", filtered.len(), before);
    }
    Ok(filtered)
}

/// Fail on the first timestamp that does not strictly follow its predecessor
pub fn ensure_increasing(candles: &[Candle]) -> Result<()> {
    for (i, pair) in candles.windows(2).enumerate() {
        if pair[1].datetime <= pair[0].datetime {
            anyhow::bail!(
                "Candle {} ({}) does not follow candle {} ({})",
                i + 1,
                pair[1].datetime,
                i,
                pair[0].datetime
            );
        }
    }
    Ok(())
}

// =============================================================================
// Data Validation
// =============================================================================

/// Result of data validation
#[derive(Debug)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Collect every bar-level problem without stopping at the first
pub fn validate_candles(candles: &[Candle]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if candles.is_empty() {
        errors.push("No candles provided".to_string());
        return ValidationResult { errors, warnings };
    }

    for (i, candle) in candles.iter().enumerate() {
        if let Err(e) = candle.validate() {
            errors.push(format!("Candle {} ({}): {}", i, candle.datetime, e));
        }
        if i > 0 && candle.datetime <= candles[i - 1].datetime {
            warnings.push(format!("Candle {}: not chronological", i));
        }
    }

    for w in &warnings {
        warn!("{}", w);
    }

    ValidationResult { errors, warnings }
}

// =============================================================================
// Result Export
// =============================================================================

#[derive(Serialize)]
struct TradeCsvRow {
    direction: String,
    entry_time: DateTime<Utc>,
    entry_price: String,
    exit_time: DateTime<Utc>,
    exit_price: String,
    quantity: String,
    pnl: String,
    return_pct: f64,
    exit_reason: String,
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

pub fn write_ledger_csv(path: impl AsRef<Path>, ledger: &[LedgerRow]) -> Result<()> {
    let path = path.as_ref();
    create_parent_dir(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in ledger {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("Wrote {} ledger rows to {}", ledger.len(), path.display());
    Ok(())
}

pub fn write_trades_csv(path: impl AsRef<Path>, trades: &[Trade]) -> Result<()> {
    let path = path.as_ref();
    create_parent_dir(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for trade in trades {
        writer.serialize(TradeCsvRow {
            direction: trade.direction.to_string(),
            entry_time: trade.entry_time,
            entry_price: trade.entry_price.to_string(),
            exit_time: trade.exit_time,
            exit_price: trade.exit_price.to_string(),
            quantity: trade.quantity.to_string(),
            pnl: trade.pnl.to_string(),
            return_pct: trade.return_pct(),
            exit_reason: trade.exit_reason.to_string(),
        })?;
    }
    writer.flush()?;
    info!("Wrote {} trades to {}", trades.len(), path.display());
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lrc_data_{}_{}", std::process::id(), name))
    }

    fn hourly(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Candle::flat(start + Duration::hours(i as i64), 100.0 + i as f64))
            .collect()
    }

    #[test]
    fn test_load_csv_both_timestamp_formats() {
        let path = temp_path("load.csv");
        fs::write(
            &path,
            "datetime,open,high,low,close,volume\n\
             2024-01-01T00:00:00Z,100,101,99,100.5,10\n\
             2024-01-01 01:00:00,100.5,102,100,101.5,12\n",
        )
        .unwrap();

        let candles = load_csv(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].datetime, Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
        assert_eq!(candles[1].close, 101.5);
    }

    #[test]
    fn test_load_csv_reports_bad_number() {
        let path = temp_path("bad.csv");
        fs::write(
            &path,
            "datetime,open,high,low,close,volume\n2024-01-01T00:00:00Z,100,abc,99,100,1\n",
        )
        .unwrap();
        let err = load_csv(&path).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(format!("{:#}", err).contains("high"));
    }

    #[test]
    fn test_filter_date_range_inclusive() {
        let candles = hourly(72);
        let filtered = filter_date_range(candles, Some("2024-01-02"), Some("2024-01-02")).unwrap();
        assert_eq!(filtered.len(), 24);
        assert!(filter_date_range(hourly(2), Some("01/02/2024"), None).is_err());
    }

    #[test]
    fn test_ensure_increasing() {
        let mut candles = hourly(5);
        assert!(ensure_increasing(&candles).is_ok());
        candles[3].datetime = candles[2].datetime;
        assert!(ensure_increasing(&candles).is_err());
    }

    #[test]
    fn test_validate_candles_collects_errors() {
        let mut candles = hourly(3);
        candles[1].low = 500.0;
        let result = validate_candles(&candles);
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_write_ledger_csv() {
        let path = temp_path("ledger.csv");
        let ledger = vec![LedgerRow {
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            close: 100.0,
            cash: 1000.0,
            holdings: 0.0,
            total_value: 1000.0,
            state: "OUT",
        }];
        write_ledger_csv(&path, &ledger).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).ok();

        assert!(contents.starts_with("time,close,cash,holdings,total_value,state"));
        assert!(contents.contains("OUT"));
    }
}
