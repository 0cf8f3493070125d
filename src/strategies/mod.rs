//! Technical strategies, their registry, the signal combiner, and Layer-2 corroboration.

mod bollinger;
mod combiner;
mod corroboration;
mod ma_crossover;
mod macd;
mod rsi;

pub use bollinger::{BollingerParams, BollingerStrategy};
pub use combiner::SignalCombiner;
pub use corroboration::{corroborate, Corroboration, CorroborationParams};
pub use ma_crossover::{MaCrossoverParams, MaCrossoverStrategy};
pub use macd::{MacdParams, MacdStrategy};
pub use rsi::{RsiParams, RsiStrategy};

use crate::config::StrategyConfig;
use crate::models::{IndicatorSignal, MarketSeries, SignalAction};

/// A technical strategy: a pure function of a series and its own parameters.
pub trait Strategy: Send + Sync {
    /// Stable identifier used for weights and logging.
    fn id(&self) -> &str;

    /// Bars of history the strategy looks back over.
    fn lookback(&self) -> usize;

    /// Produce a signal from a series that already satisfies the lookback.
    fn analyze(&self, series: &MarketSeries) -> IndicatorSignal;

    /// Produce a signal, answering `hold` with confidence 0 when fewer than
    /// `lookback + 1` bars are available.
    fn evaluate(&self, series: &MarketSeries) -> IndicatorSignal {
        if series.len() < self.lookback() + 1 {
            return IndicatorSignal::hold(self.id(), series.last_close(), series.last_timestamp());
        }
        self.analyze(series)
    }
}

/// Build a signal for the latest bar, degrading to `hold` if the values fail validation.
pub(crate) fn signal_for(
    strategy_id: &str,
    series: &MarketSeries,
    action: SignalAction,
    confidence: f64,
) -> IndicatorSignal {
    let price = series.last_close();
    let timestamp = series.last_timestamp();
    IndicatorSignal::new(strategy_id, action, confidence.min(100.0), price, timestamp)
        .unwrap_or_else(|_| IndicatorSignal::hold(strategy_id, price, timestamp))
}

/// Ordered set of enabled strategies.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Registry with every strategy enabled in the configuration.
    pub fn from_config(config: &StrategyConfig) -> Self {
        let mut registry = Self::new();
        if config.ma_crossover.enabled {
            registry.register(Box::new(MaCrossoverStrategy::new(config.ma_crossover.clone())));
        }
        if config.rsi.enabled {
            registry.register(Box::new(RsiStrategy::new(config.rsi.clone())));
        }
        if config.bollinger.enabled {
            registry.register(Box::new(BollingerStrategy::new(config.bollinger.clone())));
        }
        if config.macd.enabled {
            registry.register(Box::new(MacdStrategy::new(config.macd.clone())));
        }
        registry
    }

    /// Registers a strategy, replacing any with the same id.
    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.retain(|s| s.id() != strategy.id());
        self.strategies.push(strategy);
    }

    pub fn remove(&mut self, id: &str) -> Option<Box<dyn Strategy>> {
        let index = self.strategies.iter().position(|s| s.id() == id)?;
        Some(self.strategies.remove(index))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Evaluates every strategy against the same series, in registration order.
    pub fn evaluate_all(&self, series: &MarketSeries) -> Vec<IndicatorSignal> {
        self.strategies.iter().map(|s| s.evaluate(series)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::series_from_closes;

    #[test]
    fn test_short_series_holds_for_every_strategy() {
        let registry = StrategyRegistry::from_config(&StrategyConfig::default());
        assert_eq!(registry.len(), 4);

        for bars in [0usize, 1, 5, 20, 26] {
            let closes: Vec<f64> = (0..bars).map(|i| 100.0 + i as f64).collect();
            let series = series_from_closes("BTCUSDT", &closes);
            for signal in registry.evaluate_all(&series) {
                let lookback = match signal.strategy_id.as_str() {
                    "ma_crossover" => 26,
                    "rsi" => 15,
                    "bollinger" => 20,
                    "macd" => 35,
                    other => panic!("unexpected strategy {}", other),
                };
                if bars < lookback + 1 {
                    assert_eq!(signal.action, SignalAction::Hold);
                    assert_eq!(signal.confidence, 0.0);
                }
            }
        }
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(RsiStrategy::new(RsiParams::default())));
        registry.register(Box::new(RsiStrategy::new(RsiParams::default())));
        assert_eq!(registry.ids(), vec!["rsi"]);
        assert!(registry.remove("rsi").is_some());
        assert!(registry.is_empty());
    }
}
