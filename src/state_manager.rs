// State Manager for Live Trading
// SQLite-based persistence with JSON backup
//
// Stores one snapshot per symbol (position state machine, last channel,
// last processed bar) and an audit trail of closed trades.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::channel::ChannelParameters;
use crate::state_machine::PositionStateMachine;
use crate::Trade;

// =============================================================================
// Data Models
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub symbol: String,
    pub machine: PositionStateMachine,
    pub channel: Option<ChannelParameters>,
    pub last_bar_time: Option<DateTime<Utc>>,
    /// Close of the last processed bar, used to mark the position on resume
    pub last_close: Option<f64>,
    pub cycle_count: u64,
    pub total_value: f64,
}

// =============================================================================
// State Manager Implementation
// =============================================================================

pub struct SqliteStateManager {
    conn: Arc<Mutex<Connection>>,
    json_backup_path: Option<PathBuf>,
}

impl SqliteStateManager {
    pub fn new<P: AsRef<Path>>(db_path: P, json_backup_path: Option<P>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = json_backup_path.as_ref().and_then(|p| p.as_ref().parent()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
            json_backup_path: json_backup_path.map(|p| p.as_ref().to_path_buf()),
        };
        manager.create_tables()?;
        info!("SQLite state manager initialized at {}", db_path.display());

        Ok(manager)
    }

    /// Non-persistent store, used in tests and dry runs
    pub fn in_memory() -> Result<Self> {
        let manager = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            json_backup_path: None,
        };
        manager.create_tables()?;
        Ok(manager)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("State database lock poisoned"))
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshots (
                symbol TEXT PRIMARY KEY,
                machine TEXT NOT NULL,
                channel TEXT,
                last_bar_time TEXT,
                last_close REAL,
                cycle_count INTEGER NOT NULL DEFAULT 0,
                total_value REAL NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                exit_reason TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                pnl TEXT NOT NULL,
                trade TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    pub fn save_snapshot(&self, snapshot: &StateSnapshot) -> Result<()> {
        let conn = self.conn()?;
        let machine_json = serde_json::to_string(&snapshot.machine)?;
        let channel_json = snapshot
            .channel
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT OR REPLACE INTO snapshots
             (symbol, machine, channel, last_bar_time, last_close, cycle_count, total_value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CURRENT_TIMESTAMP)",
            params![
                snapshot.symbol,
                machine_json,
                channel_json,
                snapshot.last_bar_time.map(|t| t.to_rfc3339()),
                snapshot.last_close,
                snapshot.cycle_count as i64,
                snapshot.total_value,
            ],
        )?;

        debug!(
            "Snapshot saved: {} [{}] cycle={} value={:.2}",
            snapshot.symbol,
            snapshot.machine.state().label(),
            snapshot.cycle_count,
            snapshot.total_value
        );

        drop(conn);
        self.export_json()
    }

    pub fn load_snapshot(&self, symbol: &str) -> Result<Option<StateSnapshot>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT machine, channel, last_bar_time, last_close, cycle_count, total_value
                 FROM snapshots WHERE symbol = ?1",
                params![symbol],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, f64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((machine, channel, last_bar_time, last_close, cycle_count, total_value)) = row else {
            debug!("No snapshot found for {}", symbol);
            return Ok(None);
        };

        let snapshot = StateSnapshot {
            symbol: symbol.to_string(),
            machine: serde_json::from_str(&machine).context("Corrupt position state")?,
            channel: channel
                .map(|c| serde_json::from_str(&c))
                .transpose()
                .context("Corrupt channel parameters")?,
            last_bar_time: last_bar_time
                .map(|t| DateTime::parse_from_rfc3339(&t).map(|dt| dt.with_timezone(&Utc)))
                .transpose()
                .context("Corrupt last bar time")?,
            last_close,
            cycle_count: cycle_count.max(0) as u64,
            total_value,
        };

        info!(
            "Loaded snapshot for {}: {} cycle={} value={:.2}",
            symbol,
            snapshot.machine.state().label(),
            snapshot.cycle_count,
            snapshot.total_value
        );
        Ok(Some(snapshot))
    }

    pub fn record_trade(&self, symbol: &str, trade: &Trade) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO trades
             (symbol, direction, exit_reason, entry_time, exit_time, pnl, trade)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                symbol,
                trade.direction.to_string(),
                trade.exit_reason.to_string(),
                trade.entry_time.to_rfc3339(),
                trade.exit_time.to_rfc3339(),
                trade.pnl.to_string(),
                serde_json::to_string(trade)?,
            ],
        )?;

        let result = if trade.pnl.is_positive() { "WIN" } else { "LOSS" };
        info!(
            "Trade recorded: {} {} {} @ {} -> {} | P&L: {} ({:+.2}%) | {} | {}",
            trade.direction,
            symbol,
            trade.quantity,
            trade.entry_price,
            trade.exit_price,
            trade.pnl,
            trade.return_pct(),
            trade.exit_reason,
            result
        );

        Ok(())
    }

    pub fn load_trades(&self, symbol: &str) -> Result<Vec<Trade>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT trade FROM trades WHERE symbol = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![symbol], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|json| serde_json::from_str(json).context("Corrupt trade record"))
            .collect()
    }

    fn all_snapshots(&self) -> Result<Vec<StateSnapshot>> {
        let symbols: Vec<String> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare("SELECT symbol FROM snapshots ORDER BY symbol")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut snapshots = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if let Some(s) = self.load_snapshot(&symbol)? {
                snapshots.push(s);
            }
        }
        Ok(snapshots)
    }

    /// Write every snapshot to the JSON backup file, if one is configured
    pub fn export_json(&self) -> Result<()> {
        let Some(path) = &self.json_backup_path else {
            return Ok(());
        };

        let state = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "snapshots": self.all_snapshots()?,
        });

        std::fs::write(path, serde_json::to_string_pretty(&state)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("State exported to: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, ExitReason};
    use chrono::TimeZone;

    fn snapshot() -> StateSnapshot {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        StateSnapshot {
            symbol: "BTCUSDT".to_string(),
            machine: PositionStateMachine::new(5_000.0, 2),
            channel: Some(ChannelParameters::new(0.5, 100.0, 1.5, 0, 199, t, t).unwrap()),
            last_bar_time: Some(t),
            last_close: Some(101.25),
            cycle_count: 7,
            total_value: 5_000.0,
        }
    }

    #[test]
    fn test_snapshot_survives_reload() {
        let store = SqliteStateManager::in_memory().unwrap();
        assert!(store.load_snapshot("BTCUSDT").unwrap().is_none());

        let snap = snapshot();
        store.save_snapshot(&snap).unwrap();
        assert_eq!(store.load_snapshot("BTCUSDT").unwrap(), Some(snap.clone()));

        let mut next = snap;
        next.cycle_count = 8;
        next.channel = None;
        store.save_snapshot(&next).unwrap();
        assert_eq!(store.load_snapshot("BTCUSDT").unwrap(), Some(next));
    }

    #[test]
    fn test_trade_audit_trail() {
        let store = SqliteStateManager::in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let trade = Trade::new(Direction::Long, 100.0, 104.5, 2.0, t, t, ExitReason::TakeProfit);

        store.record_trade("BTCUSDT", &trade).unwrap();
        store.record_trade("ETHUSDT", &trade).unwrap();

        let trades = store.load_trades("BTCUSDT").unwrap();
        assert_eq!(trades, vec![trade]);
    }

    #[test]
    fn test_json_backup_on_disk() {
        let dir = std::env::temp_dir().join(format!("lrc_state_{}", std::process::id()));
        let db = dir.join("state.db");
        let json = dir.join("state.json");

        let store = SqliteStateManager::new(&db, Some(&json)).unwrap();
        store.save_snapshot(&snapshot()).unwrap();

        let backup: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(backup["snapshots"][0]["symbol"], "BTCUSDT");
        assert_eq!(backup["snapshots"][0]["cycle_count"], 7);

        drop(store);
        std::fs::remove_dir_all(&dir).ok();
    }
}
