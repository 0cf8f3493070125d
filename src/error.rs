//! Typed errors for collaborator boundaries and domain validation.
//!
//! Application code propagates `anyhow::Error`; the variants here exist where
//! the engine has to branch on the failure kind.

use std::fmt;

use thiserror::Error;

/// Failure reported by the exchange collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("exchange call timed out after {0}s")]
    Timeout(u64),

    #[error("order rejected: {0}")]
    RejectedOrder(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid exchange response: {0}")]
    InvalidResponse(String),
}

impl ExchangeError {
    /// Transient failures leave state untouched and are retried on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Network(_) | ExchangeError::Timeout(_) | ExchangeError::RateLimited(_)
        )
    }
}

/// A domain value failed validation at construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be finite")]
    NotFinite { field: &'static str },

    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("bar at {index} is malformed: {reason}")]
    MalformedBar { index: usize, reason: String },

    #[error("strategy weights sum to {0}, expected 1.0")]
    WeightsNotNormalized(f64),
}

/// Checks that `value` is finite and lies in `[min, max]`.
pub fn ensure_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { field });
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

/// Explicit refusal to take on risk. Not an error: callers log the reason and move on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Verification produced the `low` tier.
    LowTier,
    /// Same-day realized PnL magnitude reached the configured limit.
    DailyLossLimit { daily_pnl: String, limit: String },
    /// The market health gate vetoed trading.
    MarketUnhealthy(String),
    /// Concurrent open position cap reached.
    MaxOpenPositions { open: usize, max: usize },
    /// Sizing produced nothing to trade.
    ZeroSize,
    /// Sentiment carries no direction.
    NeutralSignal,
    /// An open position already exists for the symbol.
    DuplicatePosition(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::LowTier => write!(f, "confidence tier too low"),
            Rejection::DailyLossLimit { daily_pnl, limit } => {
                write!(f, "daily loss limit reached: |{}| >= {}", daily_pnl, limit)
            }
            Rejection::MarketUnhealthy(reason) => write!(f, "market unhealthy: {}", reason),
            Rejection::MaxOpenPositions { open, max } => {
                write!(f, "max open positions reached: {}/{}", open, max)
            }
            Rejection::ZeroSize => write!(f, "computed position size is zero"),
            Rejection::NeutralSignal => write!(f, "neutral sentiment has no direction"),
            Rejection::DuplicatePosition(symbol) => {
                write!(f, "position already open for {}", symbol)
            }
        }
    }
}

/// Why the lifecycle manager did not open a position.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("rejected: {0}")]
    Rejected(Rejection),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("storage failure: {0}")]
    Storage(anyhow::Error),
}

impl From<Rejection> for OpenError {
    fn from(rejection: Rejection) -> Self {
        OpenError::Rejected(rejection)
    }
}
