// Typed failures for parsing and storage
use thiserror::Error;

/// Why a raw sample did not become a reading.
///
/// Every variant is recoverable: the sampler logs it and skips the tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("voltage is missing, malformed or not positive")]
    MissingVoltage,

    #[error("charging sample has no current")]
    MissingCurrent,

    #[error("{field} value {value} looks like an unsigned wraparound")]
    OverflowValue { field: &'static str, value: f64 },

    #[error("{field} value {value} exceeds the plausible limit of {limit}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        limit: f64,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}
