//! Bollinger band touch strategy.

use serde::{Deserialize, Serialize};

use super::{signal_for, Strategy};
use crate::indicators;
use crate::models::{IndicatorSignal, MarketSeries, SignalAction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BollingerParams {
    pub enabled: bool,
    pub weight: f64,
    pub period: usize,
    pub std_mult: f64,
}

impl Default for BollingerParams {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1.0,
            period: 20,
            std_mult: 2.0,
        }
    }
}

pub struct BollingerStrategy {
    params: BollingerParams,
}

impl BollingerStrategy {
    pub fn new(params: BollingerParams) -> Self {
        Self { params }
    }
}

impl Strategy for BollingerStrategy {
    fn id(&self) -> &str {
        "bollinger"
    }

    fn lookback(&self) -> usize {
        self.params.period
    }

    fn analyze(&self, series: &MarketSeries) -> IndicatorSignal {
        let closes = series.closes();
        let Some(bands) = indicators::bollinger(&closes, self.params.period, self.params.std_mult)
        else {
            return IndicatorSignal::hold(self.id(), series.last_close(), series.last_timestamp());
        };
        let price = closes.last().copied().unwrap_or(0.0);
        let position = bands.position(price);

        let (action, confidence) = if bands.upper - bands.lower <= f64::EPSILON {
            (SignalAction::Hold, 0.0)
        } else if price <= bands.lower {
            (SignalAction::Buy, (1.0 - position) * 100.0)
        } else if price >= bands.upper {
            (SignalAction::Sell, position * 100.0)
        } else {
            (SignalAction::Hold, 0.0)
        };

        signal_for(self.id(), series, action, confidence)
            .with_metric("upper_band", bands.upper)
            .with_metric("middle_band", bands.middle)
            .with_metric("lower_band", bands.lower)
            .with_metric("band_position", position)
    }
}
