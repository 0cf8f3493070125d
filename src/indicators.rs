//! Canonical technical indicator math.
//!
//! Pure functions over `f64` price and volume slices, oldest value first.
//! Every indicator has exactly one implementation here; strategies and the
//! corroboration checks both call into this module. Functions return an empty
//! series or `None` when the input is too short instead of failing.

use statrs::statistics::Statistics;

/// Simple moving average series. Element `i` covers `values[i..i + period]`.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    values
        .windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect()
}

/// Exponential moving average series, seeded with the SMA of the first `period` values.
///
/// Multiplier `k = 2 / (period + 1)`. The first element aligns with `values[period - 1]`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &v in &values[period..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

/// Relative Strength Index series with Wilder smoothing (factor `1/period`).
///
/// The first element is available after `period + 1` values and aligns with
/// `values[period]`.
pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period + 1 {
        return Vec::new();
    }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let p = period as f64;

    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / p;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / p;

    let mut out = Vec::with_capacity(changes.len() - period + 1);
    out.push(rsi_value(avg_gain, avg_loss));

    for &c in &changes[period..] {
        avg_gain = (avg_gain * (p - 1.0) + c.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-c).max(0.0)) / p;
        out.push(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return 50.0;
        }
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Bollinger bands over the trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Bands {
    /// Position of `price` inside the bands: 0 at the lower band, 1 at the upper.
    /// Collapsed bands give 0.5.
    pub fn position(&self, price: f64) -> f64 {
        let width = self.upper - self.lower;
        if width <= f64::EPSILON {
            return 0.5;
        }
        (price - self.lower) / width
    }
}

/// Bollinger bands of the last `period` values using the sample standard deviation.
pub fn bollinger(values: &[f64], period: usize, std_mult: f64) -> Option<Bands> {
    if period < 2 || values.len() < period {
        return None;
    }

    let window = &values[values.len() - period..];
    let middle = window.iter().mean();
    let std_dev = window.iter().std_dev();
    let std_dev = if std_dev.is_finite() { std_dev } else { 0.0 };

    Some(Bands {
        upper: middle + std_mult * std_dev,
        middle,
        lower: middle - std_mult * std_dev,
    })
}

/// MACD line and its signal line, aligned so both end at the latest value.
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
}

impl Macd {
    pub fn histogram(&self) -> Option<f64> {
        Some(self.macd.last()? - self.signal.last()?)
    }
}

/// MACD (`fast` EMA minus `slow` EMA) with a `signal`-period EMA of the MACD line.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || fast >= slow || signal == 0 || values.len() < slow + signal - 1 {
        return None;
    }

    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let offset = slow - fast;

    let macd_line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, s)| fast_ema[i + offset] - s)
        .collect();
    let signal_line = ema(&macd_line, signal);
    if signal_line.is_empty() {
        return None;
    }

    let aligned = macd_line[macd_line.len() - signal_line.len()..].to_vec();
    Some(Macd {
        macd: aligned,
        signal: signal_line,
    })
}

/// Ratio of the last volume to the mean of the `lookback` volumes before it.
pub fn volume_ratio(volumes: &[f64], lookback: usize) -> Option<f64> {
    if lookback == 0 || volumes.len() < lookback + 1 {
        return None;
    }

    let last = volumes[volumes.len() - 1];
    let prior = &volumes[volumes.len() - 1 - lookback..volumes.len() - 1];
    let mean = prior.iter().mean();
    if mean <= 0.0 {
        return None;
    }
    Some(last / mean)
}

/// Sign change between the last two points of `fast - slow`.
///
/// Returns `+1` for an upward cross, `-1` for a downward cross, `0` otherwise.
pub fn crossover(fast: &[f64], slow: &[f64]) -> i8 {
    if fast.len() < 2 || slow.len() < 2 {
        return 0;
    }

    let prev = fast[fast.len() - 2] - slow[slow.len() - 2];
    let curr = fast[fast.len() - 1] - slow[slow.len() - 1];

    if prev < 0.0 && curr > 0.0 {
        1
    } else if prev > 0.0 && curr < 0.0 {
        -1
    } else {
        0
    }
}
