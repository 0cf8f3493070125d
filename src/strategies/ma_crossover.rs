//! Simple moving-average crossover.

use serde::{Deserialize, Serialize};

use super::{signal_for, Strategy};
use crate::indicators;
use crate::models::{IndicatorSignal, MarketSeries, SignalAction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaCrossoverParams {
    pub enabled: bool,
    /// Raw combiner weight, renormalized across enabled strategies
    pub weight: f64,
    pub fast_period: usize,
    pub slow_period: usize,
}

impl Default for MaCrossoverParams {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1.0,
            fast_period: 12,
            slow_period: 26,
        }
    }
}

pub struct MaCrossoverStrategy {
    params: MaCrossoverParams,
}

impl MaCrossoverStrategy {
    pub fn new(params: MaCrossoverParams) -> Self {
        Self { params }
    }
}

impl Strategy for MaCrossoverStrategy {
    fn id(&self) -> &str {
        "ma_crossover"
    }

    fn lookback(&self) -> usize {
        self.params.slow_period
    }

    fn analyze(&self, series: &MarketSeries) -> IndicatorSignal {
        let closes = series.closes();
        let fast = indicators::sma(&closes, self.params.fast_period);
        let slow = indicators::sma(&closes, self.params.slow_period);
        let (Some(&fast_now), Some(&slow_now)) = (fast.last(), slow.last()) else {
            return IndicatorSignal::hold(self.id(), series.last_close(), series.last_timestamp());
        };

        let action = match indicators::crossover(&fast, &slow) {
            1 => SignalAction::Buy,
            -1 => SignalAction::Sell,
            _ => SignalAction::Hold,
        };
        let confidence = if action == SignalAction::Hold || slow_now == 0.0 {
            0.0
        } else {
            (fast_now - slow_now).abs() / slow_now * 1000.0
        };

        signal_for(self.id(), series, action, confidence)
            .with_metric("fast_ma", fast_now)
            .with_metric("slow_ma", slow_now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::series_from_closes;

    fn strategy() -> MaCrossoverStrategy {
        MaCrossoverStrategy::new(MaCrossoverParams {
            fast_period: 2,
            slow_period: 4,
            ..Default::default()
        })
    }

    #[test]
    fn test_bullish_crossover() {
        // fast sits below slow, then the last bar pushes it above
        let series = series_from_closes("BTCUSDT", &[10.0, 10.0, 10.0, 9.0, 8.0, 12.0]);
        let signal = strategy().evaluate(&series);
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.confidence > 0.0 && signal.confidence <= 100.0);
    }

    #[test]
    fn test_bearish_crossover() {
        let series = series_from_closes("BTCUSDT", &[10.0, 10.0, 10.0, 11.0, 12.0, 8.0]);
        let signal = strategy().evaluate(&series);
        assert_eq!(signal.action, SignalAction::Sell);
    }

    #[test]
    fn test_no_cross_holds() {
        let series = series_from_closes("BTCUSDT", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let signal = strategy().evaluate(&series);
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.confidence, 0.0);
    }
}
