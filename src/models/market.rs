//! OHLCV market history for one symbol and timeframe.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Candle open time
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Base-asset volume traded during the candle
    pub volume: Decimal,
}

impl Bar {
    fn check(&self, index: usize) -> Result<(), ValidationError> {
        let malformed = |reason: &str| ValidationError::MalformedBar {
            index,
            reason: reason.to_string(),
        };

        if self.high < self.low {
            return Err(malformed("high below low"));
        }
        if self.close <= Decimal::ZERO || self.open <= Decimal::ZERO {
            return Err(malformed("non-positive price"));
        }
        if self.close > self.high || self.close < self.low {
            return Err(malformed("close outside high/low"));
        }
        if self.volume < Decimal::ZERO {
            return Err(malformed("negative volume"));
        }
        Ok(())
    }
}

/// Ordered, immutable candle history. Regenerated on every refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSeries {
    symbol: String,
    timeframe: String,
    bars: Vec<Bar>,
}

impl MarketSeries {
    /// Build a series, validating every bar and the time ordering.
    pub fn new(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        bars: Vec<Bar>,
    ) -> Result<Self, ValidationError> {
        for (index, bar) in bars.iter().enumerate() {
            bar.check(index)?;
            if index > 0 && bars[index - 1].timestamp >= bar.timestamp {
                return Err(ValidationError::MalformedBar {
                    index,
                    reason: "timestamps not strictly increasing".to_string(),
                });
            }
        }

        Ok(Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            bars,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Latest close, or zero for an empty series.
    pub fn last_close(&self) -> Decimal {
        self.bars.last().map(|b| b.close).unwrap_or(Decimal::ZERO)
    }

    /// Timestamp of the latest bar, falling back to now for an empty series.
    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.bars.last().map(|b| b.timestamp).unwrap_or_else(Utc::now)
    }

    /// Closing prices as `f64` for indicator math.
    pub fn closes(&self) -> Vec<f64> {
        self.bars
            .iter()
            .map(|b| b.close.to_f64().unwrap_or(0.0))
            .collect()
    }

    /// Volumes as `f64` for indicator math.
    pub fn volumes(&self) -> Vec<f64> {
        self.bars
            .iter()
            .map(|b| b.volume.to_f64().unwrap_or(0.0))
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn series_from_closes(symbol: &str, closes: &[f64]) -> MarketSeries {
    series_from_closes_and_volumes(symbol, closes, &vec![100.0; closes.len()])
}

#[cfg(test)]
pub(crate) fn series_from_closes_and_volumes(
    symbol: &str,
    closes: &[f64],
    volumes: &[f64],
) -> MarketSeries {
    let start = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap();
    let bars = closes
        .iter()
        .zip(volumes)
        .enumerate()
        .map(|(i, (&c, &v))| {
            let close = Decimal::try_from(c).unwrap();
            Bar {
                timestamp: start + chrono::Duration::hours(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: Decimal::try_from(v).unwrap(),
            }
        })
        .collect();
    MarketSeries::new(symbol, "1h", bars).unwrap()
}
