//! Technical signals produced by strategies and the combiner.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ensure_range, ValidationError};

/// Directional recommendation of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    /// Numeric polarity: buy = +1, hold = 0, sell = -1.
    pub fn polarity(&self) -> f64 {
        match self {
            SignalAction::Buy => 1.0,
            SignalAction::Hold => 0.0,
            SignalAction::Sell => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
        }
    }
}

/// Output of one strategy for one series. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSignal {
    pub strategy_id: String,
    pub action: SignalAction,
    /// Confidence in [0, 100]
    pub confidence: f64,
    /// Close price of the last bar evaluated
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    /// Indicator values behind the decision (e.g. "rsi", "macd")
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl IndicatorSignal {
    pub fn new(
        strategy_id: impl Into<String>,
        action: SignalAction,
        confidence: f64,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let strategy_id = strategy_id.into();
        if strategy_id.is_empty() {
            return Err(ValidationError::Empty("strategy_id"));
        }
        let confidence = ensure_range("confidence", confidence, 0.0, 100.0)?;

        Ok(Self {
            strategy_id,
            action,
            confidence: if action == SignalAction::Hold { 0.0 } else { confidence },
            price,
            timestamp,
            metrics: BTreeMap::new(),
        })
    }

    /// Hold with zero confidence, the answer for insufficient or unusable data.
    pub fn hold(strategy_id: impl Into<String>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            action: SignalAction::Hold,
            confidence: 0.0,
            price,
            timestamp,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        if value.is_finite() {
            self.metrics.insert(name.to_string(), value);
        }
        self
    }
}

/// Weighted merge of several strategy outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedSignal {
    pub action: SignalAction,
    /// Confidence in [0, 100], zero for hold
    pub confidence: f64,
    /// Weighted polarity in [-1, 1]
    pub weighted_value: f64,
    /// Contributing strategy ids with their normalized weights
    pub contributions: Vec<(String, f64)>,
}

impl CombinedSignal {
    pub fn neutral() -> Self {
        Self {
            action: SignalAction::Hold,
            confidence: 0.0,
            weighted_value: 0.0,
            contributions: Vec::new(),
        }
    }
}
