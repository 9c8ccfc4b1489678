//! LRC Strategies
//!
//! Linear regression channel trading: a channel calculator, a zone/grid
//! strategy built on it, a position state machine with limit chasing and
//! reversals, a bar-by-bar backtester, a parameter optimizer and a paper
//! trading loop.

pub mod backtest;
pub mod channel;
pub mod config;
pub mod data;
pub mod error;
pub mod execution;
pub mod grid;
pub mod indicators;
pub mod live;
pub mod optimizer;
pub mod state_machine;
pub mod state_manager;
pub mod strategies;
pub mod types;

pub use config::Config;
pub use error::{StrategyError, StrategyResult};
pub use strategies::Strategy;
pub use types::*;
