//! Application configuration.
//!
//! Compiled defaults, optionally overridden by a JSON file, with secrets taken
//! from the environment (`.env` is loaded by `main`).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::Tier;
use crate::strategies::{
    BollingerParams, CorroborationParams, MaCrossoverParams, MacdParams, RsiParams,
};

const REDACTED: &str = "<redacted>";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base coins traded against the quote asset
    pub watchlist: Vec<String>,
    pub exchange: ExchangeConfig,
    pub sentiment: SentimentConfig,
    pub strategy: StrategyConfig,
    pub verification: VerificationConfig,
    pub risk: RiskConfig,
    pub position: PositionConfig,
    pub scheduler: SchedulerConfig,
    pub feed: FeedConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watchlist: ["BTC", "ETH", "DOGE", "SHIB"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exchange: ExchangeConfig::default(),
            sentiment: SentimentConfig::default(),
            strategy: StrategyConfig::default(),
            verification: VerificationConfig::default(),
            risk: RiskConfig::default(),
            position: PositionConfig::default(),
            scheduler: SchedulerConfig::default(),
            feed: FeedConfig::default(),
        }
    }
}

/// Exchange connectivity (USDT-margined futures REST API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub quote_asset: String,
    /// Candle interval for market history
    pub kline_interval: String,
    /// Candles fetched per refresh
    pub kline_limit: u32,
    /// Bound on every exchange call
    pub timeout_secs: u64,
    pub recv_window_ms: u64,
    /// Order quantity decimals per base coin; coins not listed use `default_quantity_precision`
    pub quantity_precision: BTreeMap<String, u32>,
    pub default_quantity_precision: u32,
    /// Simulated account balance for paper execution
    pub paper_balance: Decimal,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        let quantity_precision = [("BTC", 3), ("ETH", 3), ("DOGE", 0), ("SHIB", 0)]
            .iter()
            .map(|(coin, p)| (coin.to_string(), *p))
            .collect();

        Self {
            base_url: "https://fapi.binance.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            quote_asset: "USDT".to_string(),
            kline_interval: "1h".to_string(),
            kline_limit: 100,
            timeout_secs: 10,
            recv_window_ms: 5000,
            quantity_precision,
            default_quantity_precision: 3,
            paper_balance: dec!(10000),
        }
    }
}

impl ExchangeConfig {
    /// Exchange symbol for a base coin, e.g. "BTC" -> "BTCUSDT".
    pub fn symbol_for(&self, coin: &str) -> String {
        format!("{}{}", coin.to_uppercase(), self.quote_asset)
    }

    /// Base coin of an exchange symbol, e.g. "BTCUSDT" -> "BTC".
    pub fn coin_for<'a>(&self, symbol: &'a str) -> &'a str {
        symbol.strip_suffix(self.quote_asset.as_str()).unwrap_or(symbol)
    }

    pub fn precision_for(&self, symbol: &str) -> u32 {
        self.quantity_precision
            .get(self.coin_for(symbol))
            .copied()
            .unwrap_or(self.default_quantity_precision)
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

/// External sentiment analysis service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/analyze".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Technical strategy parameters and combiner weights.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub ma_crossover: MaCrossoverParams,
    pub rsi: RsiParams,
    pub bollinger: BollingerParams,
    pub macd: MacdParams,
}

impl StrategyConfig {
    /// `(strategy id, enabled, raw weight)` for every known strategy.
    pub fn weights(&self) -> Vec<(&'static str, bool, f64)> {
        vec![
            ("ma_crossover", self.ma_crossover.enabled, self.ma_crossover.weight),
            ("rsi", self.rsi.enabled, self.rsi.weight),
            ("bollinger", self.bollinger.enabled, self.bollinger.weight),
            ("macd", self.macd.enabled, self.macd.weight),
        ]
    }
}

/// Three-layer verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Minimum analyzer confidence for Layer 1
    pub confidence_floor: f64,
    /// Event age before persistence can count
    pub persistence_min_age_mins: i64,
    /// Trailing window searched for similar events
    pub persistence_window_mins: i64,
    /// Independent similar events required
    pub persistence_min_events: usize,
    /// Events still unexecuted after this long expire
    pub window_hours: i64,
    /// Approved tiers below this stay in analysis
    pub min_execution_tier: Tier,
    pub corroboration: CorroborationParams,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.65,
            persistence_min_age_mins: 5,
            persistence_window_mins: 60,
            persistence_min_events: 2,
            window_hours: 24,
            min_execution_tier: Tier::Medium,
            corroboration: CorroborationParams::default(),
        }
    }
}

/// Leverage bounds and stop distance for one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimits {
    pub min_leverage: u32,
    pub max_leverage: u32,
    /// Stop distance as a fraction of entry
    pub stop_loss_pct: Decimal,
    /// Sizing multiplier applied to the risk fraction
    pub confidence_multiplier: Decimal,
}

/// Tier table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierTable {
    pub highest: TierLimits,
    pub high: TierLimits,
    pub medium: TierLimits,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            highest: TierLimits {
                min_leverage: 5,
                max_leverage: 10,
                stop_loss_pct: dec!(0.03),
                confidence_multiplier: dec!(1.0),
            },
            high: TierLimits {
                min_leverage: 3,
                max_leverage: 5,
                stop_loss_pct: dec!(0.05),
                confidence_multiplier: dec!(0.7),
            },
            medium: TierLimits {
                min_leverage: 2,
                max_leverage: 3,
                stop_loss_pct: dec!(0.07),
                confidence_multiplier: dec!(0.4),
            },
        }
    }
}

impl TierTable {
    /// Limits for a tradable tier; `low` has none.
    pub fn limits(&self, tier: Tier) -> Option<&TierLimits> {
        match tier {
            Tier::Highest => Some(&self.highest),
            Tier::High => Some(&self.high),
            Tier::Medium => Some(&self.medium),
            Tier::Low => None,
        }
    }
}

/// Risk tiering and circuit breakers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub tiers: TierTable,
    /// Fraction of equity risked per trade before tier scaling
    pub risk_fraction: Decimal,
    /// Daily realized loss magnitude that halts trading, as a fraction of equity
    pub max_daily_loss_fraction: Decimal,
    /// Share of the daily limit at which a warning is logged
    pub daily_loss_warning_ratio: Decimal,
    /// Take-profit for leverage >= 10
    pub take_profit_high_leverage: Decimal,
    /// Take-profit for leverage >= 5
    pub take_profit_mid_leverage: Decimal,
    /// Take-profit for lower leverage
    pub take_profit_low_leverage: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            risk_fraction: dec!(0.02),            // 2% of equity
            max_daily_loss_fraction: dec!(0.05),  // Stop at 5% daily loss
            daily_loss_warning_ratio: dec!(0.8),  // Warn at 80% of the limit
            take_profit_high_leverage: dec!(0.05),
            take_profit_mid_leverage: dec!(0.10),
            take_profit_low_leverage: dec!(0.15),
        }
    }
}

/// Position lifecycle limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Largest notional for one position, as a fraction of equity
    pub max_exposure_fraction: Decimal,
    pub max_open_positions: usize,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            max_exposure_fraction: dec!(0.20),
            max_open_positions: 3,
        }
    }
}

/// Periodic task cadences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub refresh_interval_secs: u64,
    pub evaluation_interval_secs: u64,
    pub monitor_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
            evaluation_interval_secs: 60,
            monitor_interval_secs: 30,
        }
    }
}

/// Inbound content drop directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub inbox_dir: String,
    /// Content published longer ago than this is skipped
    pub max_content_age_mins: i64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            inbox_dir: "./inbox".to_string(),
            max_content_age_mins: 30,
        }
    }
}

impl AppConfig {
    /// Defaults, then the optional JSON file, then environment secrets.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => AppConfig::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay secrets and endpoints from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("BINANCE_API_KEY") {
            self.exchange.api_key = key;
        }
        if let Ok(secret) = std::env::var("BINANCE_API_SECRET") {
            self.exchange.api_secret = secret;
        }
        if let Ok(url) = std::env::var("SENTIMENT_API_URL") {
            self.sentiment.api_url = url;
        }
        if let Ok(key) = std::env::var("SENTIMENT_API_KEY") {
            self.sentiment.api_key = Some(key);
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.watchlist.is_empty() {
            bail!("watchlist must not be empty");
        }
        if self.exchange.timeout_secs == 0 {
            bail!("exchange.timeout_secs must be positive");
        }

        for (id, enabled, weight) in self.strategy.weights() {
            if enabled && !(weight.is_finite() && weight > 0.0) {
                bail!("strategy.{}.weight must be positive, got {}", id, weight);
            }
        }
        if !self.strategy.weights().iter().any(|(_, enabled, _)| *enabled) {
            bail!("at least one strategy must be enabled");
        }

        let v = &self.verification;
        if !(0.0..=1.0).contains(&v.confidence_floor) {
            bail!("verification.confidence_floor must be in [0, 1]");
        }
        if v.persistence_window_mins <= 0 || v.window_hours <= 0 || v.persistence_min_age_mins < 0 {
            bail!("verification windows must be positive");
        }

        for tier in [Tier::Highest, Tier::High, Tier::Medium] {
            let Some(limits) = self.risk.tiers.limits(tier) else {
                continue;
            };
            if limits.min_leverage < 1
                || limits.max_leverage > 15
                || limits.min_leverage > limits.max_leverage
            {
                bail!(
                    "risk.tiers.{}: leverage range {}-{} must lie within 1-15",
                    tier,
                    limits.min_leverage,
                    limits.max_leverage
                );
            }
            if limits.stop_loss_pct <= Decimal::ZERO || limits.stop_loss_pct >= Decimal::ONE {
                bail!("risk.tiers.{}.stop_loss_pct must be in (0, 1)", tier);
            }
            if limits.confidence_multiplier <= Decimal::ZERO {
                bail!("risk.tiers.{}.confidence_multiplier must be positive", tier);
            }
        }

        let r = &self.risk;
        for (name, value) in [
            ("risk.risk_fraction", r.risk_fraction),
            ("risk.max_daily_loss_fraction", r.max_daily_loss_fraction),
            ("risk.take_profit_high_leverage", r.take_profit_high_leverage),
            ("risk.take_profit_mid_leverage", r.take_profit_mid_leverage),
            ("risk.take_profit_low_leverage", r.take_profit_low_leverage),
            ("position.max_exposure_fraction", self.position.max_exposure_fraction),
        ] {
            if value <= Decimal::ZERO || value >= Decimal::ONE {
                bail!("{} must be in (0, 1), got {}", name, value);
            }
        }

        if self.position.max_open_positions == 0 {
            bail!("position.max_open_positions must be at least 1");
        }

        let s = &self.scheduler;
        if s.refresh_interval_secs == 0 || s.evaluation_interval_secs == 0 || s.monitor_interval_secs == 0 {
            bail!("scheduler intervals must be positive");
        }

        Ok(())
    }

    /// Copy safe to print: secrets replaced.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.exchange.api_key.is_empty() {
            copy.exchange.api_key = REDACTED.to_string();
        }
        if !copy.exchange.api_secret.is_empty() {
            copy.exchange.api_secret = REDACTED.to_string();
        }
        if copy.sentiment.api_key.is_some() {
            copy.sentiment.api_key = Some(REDACTED.to_string());
        }
        copy
    }

    /// Exchange symbols for the watchlist.
    pub fn symbols(&self) -> Vec<String> {
        self.watchlist
            .iter()
            .map(|coin| self.exchange.symbol_for(coin))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.risk.risk_fraction, dec!(0.02));
        assert_eq!(config.position.max_open_positions, 3);
        assert_eq!(config.verification.min_execution_tier, Tier::Medium);
        assert_eq!(config.symbols()[0], "BTCUSDT");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "watchlist": ["SOL"], "position": { "max_open_positions": 5 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.watchlist, vec!["SOL".to_string()]);
        assert_eq!(config.position.max_open_positions, 5);
        assert_eq!(config.position.max_exposure_fraction, dec!(0.20));
        assert_eq!(config.scheduler.monitor_interval_secs, 30);
        assert_eq!(config.strategy.rsi.period, 14);
    }

    #[test]
    fn test_validation_catches_nonsense() {
        let mut config = AppConfig::default();
        config.risk.tiers.highest.max_leverage = 20;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.risk.tiers.high.min_leverage = 6;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.risk.tiers.medium.stop_loss_pct = dec!(1.2);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scheduler.monitor_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.strategy.rsi.weight = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.position.max_open_positions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_symbol_helpers() {
        let exchange = ExchangeConfig::default();
        assert_eq!(exchange.symbol_for("btc"), "BTCUSDT");
        assert_eq!(exchange.coin_for("DOGEUSDT"), "DOGE");
        assert_eq!(exchange.precision_for("DOGEUSDT"), 0);
        assert_eq!(exchange.precision_for("SOLUSDT"), 3);
    }

    #[test]
    fn test_redaction() {
        let mut config = AppConfig::default();
        config.exchange.api_key = "key".into();
        config.exchange.api_secret = "secret".into();
        let shown = config.redacted();
        assert_eq!(shown.exchange.api_key, REDACTED);
        assert_eq!(shown.exchange.api_secret, REDACTED);
        assert!(shown.sentiment.api_key.is_none());
    }
}
