//! MACD / signal-line crossover strategy.

use serde::{Deserialize, Serialize};

use super::{signal_for, Strategy};
use crate::indicators;
use crate::models::{IndicatorSignal, MarketSeries, SignalAction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MacdParams {
    pub enabled: bool,
    pub weight: f64,
    pub fast_period: usize,
    pub slow_period: usize,
    pub signal_period: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1.0,
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        }
    }
}

pub struct MacdStrategy {
    params: MacdParams,
}

impl MacdStrategy {
    pub fn new(params: MacdParams) -> Self {
        Self { params }
    }
}

impl Strategy for MacdStrategy {
    fn id(&self) -> &str {
        "macd"
    }

    fn lookback(&self) -> usize {
        self.params.slow_period + self.params.signal_period
    }

    fn analyze(&self, series: &MarketSeries) -> IndicatorSignal {
        let p = &self.params;
        let Some(m) = indicators::macd(&series.closes(), p.fast_period, p.slow_period, p.signal_period)
        else {
            return IndicatorSignal::hold(self.id(), series.last_close(), series.last_timestamp());
        };
        let (Some(&macd_now), Some(&signal_now)) = (m.macd.last(), m.signal.last()) else {
            return IndicatorSignal::hold(self.id(), series.last_close(), series.last_timestamp());
        };

        let action = match indicators::crossover(&m.macd, &m.signal) {
            1 => SignalAction::Buy,
            -1 => SignalAction::Sell,
            _ => SignalAction::Hold,
        };
        let confidence = match action {
            SignalAction::Hold => 0.0,
            _ if signal_now == 0.0 => 50.0,
            _ => (macd_now - signal_now).abs() / signal_now.abs() * 100.0,
        };

        signal_for(self.id(), series, action, confidence)
            .with_metric("macd", macd_now)
            .with_metric("signal", signal_now)
            .with_metric("histogram", macd_now - signal_now)
    }
}
