//! Error taxonomy for the channel, strategy and simulator layers

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::CandleValidationError;

#[derive(Debug, Error)]
pub enum StrategyError {
    /// Fewer usable bars than a fit needs. Wait for more data.
    #[error("insufficient data: {available} usable bars, need at least {required}")]
    InsufficientData { available: usize, required: usize },

    /// All closes sit on the fitted line, so the band has zero width.
    #[error("degenerate fit: residual standard deviation is zero")]
    DegenerateFit,

    #[error("invalid bar at index {index} ({time}): {source}")]
    InvalidBar {
        index: usize,
        time: DateTime<Utc>,
        #[source]
        source: CandleValidationError,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StrategyError {
    /// "Not enough data yet" conditions that the caller retries next cycle
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StrategyError::InsufficientData { .. } | StrategyError::DegenerateFit
        )
    }
}

pub type StrategyResult<T> = Result<T, StrategyError>;
