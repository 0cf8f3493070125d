//! Weighted merge of strategy signals into one directional view.

use tracing::debug;

use crate::config::StrategyConfig;
use crate::error::ValidationError;
use crate::models::{CombinedSignal, IndicatorSignal, SignalAction};

/// Dead zone around zero: weaker agreement than this stays `hold`.
const ACTION_THRESHOLD: f64 = 0.2;

const WEIGHT_EPSILON: f64 = 1e-9;

/// Holds raw strategy weights and exposes them normalized to sum to 1.
#[derive(Debug, Clone, Default)]
pub struct SignalCombiner {
    raw: Vec<(String, f64)>,
}

impl SignalCombiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combiner weighted by every enabled strategy's configured weight.
    pub fn from_config(config: &StrategyConfig) -> Result<Self, ValidationError> {
        let mut combiner = Self::new();
        for (id, enabled, weight) in config.weights() {
            if enabled {
                combiner.add(id, weight)?;
            }
        }
        Ok(combiner)
    }

    /// Adds or replaces a strategy weight. Weights are renormalized on read.
    pub fn add(&mut self, strategy_id: &str, weight: f64) -> Result<(), ValidationError> {
        if !weight.is_finite() {
            return Err(ValidationError::NotFinite { field: "weight" });
        }
        if weight <= 0.0 {
            return Err(ValidationError::OutOfRange {
                field: "weight",
                value: weight,
                min: f64::MIN_POSITIVE,
                max: f64::MAX,
            });
        }

        match self.raw.iter_mut().find(|(id, _)| id == strategy_id) {
            Some(entry) => entry.1 = weight,
            None => self.raw.push((strategy_id.to_string(), weight)),
        }
        Ok(())
    }

    pub fn remove(&mut self, strategy_id: &str) -> bool {
        let before = self.raw.len();
        self.raw.retain(|(id, _)| id != strategy_id);
        self.raw.len() != before
    }

    /// Normalized weights in registration order.
    pub fn weights(&self) -> Vec<(String, f64)> {
        normalize(self.raw.iter().map(|(id, w)| (id.clone(), *w)).collect())
    }

    /// Combine the signals of registered strategies.
    ///
    /// Weights are renormalized over the strategies that actually produced a
    /// signal; signals from unknown strategies are ignored.
    pub fn combine(&self, signals: &[IndicatorSignal]) -> CombinedSignal {
        let mut inputs = Vec::with_capacity(signals.len());
        for signal in signals {
            match self.raw.iter().find(|(id, _)| *id == signal.strategy_id) {
                Some((_, weight)) => inputs.push((signal.clone(), *weight)),
                None => debug!(strategy = %signal.strategy_id, "No weight registered, ignoring signal"),
            }
        }
        if inputs.is_empty() {
            return CombinedSignal::neutral();
        }

        let total: f64 = inputs.iter().map(|(_, w)| w).sum();
        for (_, weight) in inputs.iter_mut() {
            *weight /= total;
        }

        combine_weighted(&inputs).unwrap_or_else(|_| CombinedSignal::neutral())
    }
}

fn normalize(mut weights: Vec<(String, f64)>) -> Vec<(String, f64)> {
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total > 0.0 {
        for (_, w) in weights.iter_mut() {
            *w /= total;
        }
    }
    weights
}

/// Combine `(signal, weight)` pairs whose weights already sum to 1.
pub fn combine_weighted(inputs: &[(IndicatorSignal, f64)]) -> Result<CombinedSignal, ValidationError> {
    if inputs.is_empty() {
        return Ok(CombinedSignal::neutral());
    }

    let total: f64 = inputs.iter().map(|(_, w)| w).sum();
    if (total - 1.0).abs() > 1e-6 || inputs.iter().any(|(_, w)| *w < -WEIGHT_EPSILON) {
        return Err(ValidationError::WeightsNotNormalized(total));
    }

    let weighted_value: f64 = inputs
        .iter()
        .map(|(signal, weight)| signal.action.polarity() * (signal.confidence / 100.0) * weight)
        .sum::<f64>()
        .clamp(-1.0, 1.0);

    let action = if weighted_value > ACTION_THRESHOLD {
        SignalAction::Buy
    } else if weighted_value < -ACTION_THRESHOLD {
        SignalAction::Sell
    } else {
        SignalAction::Hold
    };
    let confidence = match action {
        SignalAction::Hold => 0.0,
        _ => (weighted_value.abs() * 100.0).min(100.0),
    };

    Ok(CombinedSignal {
        action,
        confidence,
        weighted_value,
        contributions: inputs
            .iter()
            .map(|(signal, weight)| (signal.strategy_id.clone(), *weight))
            .collect(),
    })
}
