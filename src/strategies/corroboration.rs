//! Technical corroboration of a sentiment direction.
//!
//! Three independent checks on the same canonical indicator math the
//! strategies use: MACD histogram direction, RSI "room to run", and a volume
//! spike on the latest bar. Corroboration holds only when all three agree with
//! the sentiment polarity.

use serde::{Deserialize, Serialize};

use crate::indicators;
use crate::models::MarketSeries;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorroborationParams {
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Bars averaged for the volume baseline
    pub volume_lookback: usize,
    /// Last-bar volume must reach this multiple of the baseline
    pub volume_multiplier: f64,
}

impl Default for CorroborationParams {
    fn default() -> Self {
        Self {
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            volume_lookback: 20,
            volume_multiplier: 1.5,
        }
    }
}

/// Per-check outcome, kept for logging and the verification record.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Corroboration {
    pub macd_aligned: bool,
    pub rsi_aligned: bool,
    pub volume_confirmed: bool,
    pub histogram: Option<f64>,
    pub rsi: Option<f64>,
    pub volume_ratio: Option<f64>,
}

impl Corroboration {
    pub fn passed(&self) -> bool {
        self.macd_aligned && self.rsi_aligned && self.volume_confirmed
    }
}

/// Run the checks for `polarity` (+1 bullish, -1 bearish). Neutral polarity never corroborates.
pub fn corroborate(series: &MarketSeries, polarity: i8, params: &CorroborationParams) -> Corroboration {
    let closes = series.closes();
    let volumes = series.volumes();

    let histogram = indicators::macd(&closes, params.macd_fast, params.macd_slow, params.macd_signal)
        .and_then(|m| m.histogram());
    let rsi = indicators::rsi(&closes, params.rsi_period).last().copied();
    let volume_ratio = indicators::volume_ratio(&volumes, params.volume_lookback);

    let macd_aligned = match (polarity, histogram) {
        (1, Some(h)) => h > 0.0,
        (-1, Some(h)) => h < 0.0,
        _ => false,
    };
    let rsi_aligned = match (polarity, rsi) {
        (1, Some(r)) => params.rsi_oversold < r && r < 50.0,
        (-1, Some(r)) => 50.0 < r && r < params.rsi_overbought,
        _ => false,
    };
    let volume_confirmed = polarity != 0
        && volume_ratio.map_or(false, |ratio| ratio >= params.volume_multiplier);

    Corroboration {
        macd_aligned,
        rsi_aligned,
        volume_confirmed,
        histogram,
        rsi,
        volume_ratio,
    }
}
