//! RSI threshold-cross strategy.

use serde::{Deserialize, Serialize};

use super::{signal_for, Strategy};
use crate::indicators;
use crate::models::{IndicatorSignal, MarketSeries, SignalAction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiParams {
    pub enabled: bool,
    pub weight: f64,
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for RsiParams {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1.0,
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
        }
    }
}

pub struct RsiStrategy {
    params: RsiParams,
}

impl RsiStrategy {
    pub fn new(params: RsiParams) -> Self {
        Self { params }
    }
}

impl Strategy for RsiStrategy {
    fn id(&self) -> &str {
        "rsi"
    }

    fn lookback(&self) -> usize {
        self.params.period + 1
    }

    fn analyze(&self, series: &MarketSeries) -> IndicatorSignal {
        let values = indicators::rsi(&series.closes(), self.params.period);
        if values.len() < 2 {
            return IndicatorSignal::hold(self.id(), series.last_close(), series.last_timestamp());
        }
        let prev = values[values.len() - 2];
        let curr = values[values.len() - 1];

        // Buy when RSI drops through the oversold line, sell when it climbs through overbought.
        let (action, confidence) = if curr < self.params.oversold && prev > self.params.oversold {
            (SignalAction::Buy, (self.params.oversold - curr) * 5.0)
        } else if curr > self.params.overbought && prev < self.params.overbought {
            (SignalAction::Sell, (curr - self.params.overbought) * 5.0)
        } else {
            (SignalAction::Hold, 0.0)
        };

        signal_for(self.id(), series, action, confidence).with_metric("rsi", curr)
    }
}
