//! Risk and leverage tiering.
//!
//! Maps a confidence tier to leverage bounds, stop-loss and take-profit
//! distances, and applies the two circuit breakers that can veto any trade:
//! the daily-loss limit and the market health gate.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use super::RiskLedger;
use crate::config::RiskConfig;
use crate::error::Rejection;
use crate::models::{RiskDecision, Tier};

/// Pluggable veto for abnormal market conditions.
pub trait MarketHealthCheck: Send + Sync {
    /// `Err(reason)` when trading on `symbol` should be suspended.
    fn check(&self, symbol: &str) -> Result<(), String>;
}

/// Default health gate: markets are always considered healthy.
pub struct AlwaysHealthy;

impl MarketHealthCheck for AlwaysHealthy {
    fn check(&self, _symbol: &str) -> Result<(), String> {
        Ok(())
    }
}

pub struct RiskManager {
    config: RiskConfig,
    health: Arc<dyn MarketHealthCheck>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self::with_health_check(config, Arc::new(AlwaysHealthy))
    }

    pub fn with_health_check(config: RiskConfig, health: Arc<dyn MarketHealthCheck>) -> Self {
        Self { config, health }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Take-profit distance for a leverage: tighter targets at higher leverage.
    pub fn take_profit_for(&self, leverage: u32) -> Decimal {
        if leverage >= 10 {
            self.config.take_profit_high_leverage
        } else if leverage >= 5 {
            self.config.take_profit_mid_leverage
        } else {
            self.config.take_profit_low_leverage
        }
    }

    /// Pure tier table lookup. The requested leverage is clamped into the
    /// tier's range, never rejected for being too high.
    pub fn decision_for(&self, tier: Tier, requested_leverage: u32) -> Result<RiskDecision, Rejection> {
        let limits = self.config.tiers.limits(tier).ok_or(Rejection::LowTier)?;

        let ceiling = limits.max_leverage.max(1);
        let floor = limits.min_leverage.clamp(1, ceiling);
        let leverage = requested_leverage.clamp(floor, ceiling);

        Ok(RiskDecision {
            tier,
            leverage,
            stop_loss_pct: limits.stop_loss_pct,
            take_profit_pct: self.take_profit_for(leverage),
            max_risk_fraction: self.config.risk_fraction,
            confidence_multiplier: limits.confidence_multiplier,
        })
    }

    /// Daily-loss limit in quote currency for the given equity.
    pub fn daily_loss_limit(&self, equity: Decimal) -> Decimal {
        equity * self.config.max_daily_loss_fraction
    }

    /// True once today's realized PnL magnitude reached the limit. Unknown (zero) equity never trips.
    pub fn breaker_tripped(&self, ledger: &RiskLedger, equity: Decimal) -> bool {
        let limit = self.daily_loss_limit(equity);
        limit > Decimal::ZERO && ledger.realized_pnl().abs() >= limit
    }

    /// Full approval: circuit breakers first, then the tier table.
    ///
    /// The ledger must already be rolled to the current day.
    pub fn assess(
        &self,
        tier: Tier,
        requested_leverage: u32,
        symbol: &str,
        ledger: &RiskLedger,
        equity: Decimal,
    ) -> Result<RiskDecision, Rejection> {
        if self.breaker_tripped(ledger, equity) {
            return Err(Rejection::DailyLossLimit {
                daily_pnl: ledger.realized_pnl().round_dp(2).to_string(),
                limit: self.daily_loss_limit(equity).round_dp(2).to_string(),
            });
        }

        self.health.check(symbol).map_err(Rejection::MarketUnhealthy)?;

        self.decision_for(tier, requested_leverage)
    }

    /// Log once per day when losses approach the limit.
    pub fn warn_if_near_limit(&self, ledger: &mut RiskLedger, equity: Decimal) {
        let limit = self.daily_loss_limit(equity);
        if limit.is_zero() || ledger.realized_pnl() >= Decimal::ZERO {
            return;
        }

        let used = ledger.realized_pnl().abs() / limit;
        if used >= self.config.daily_loss_warning_ratio && ledger.take_warning() {
            warn!(
                daily_pnl = %ledger.realized_pnl().round_dp(2),
                limit = %limit.round_dp(2),
                used_pct = %(used * dec!(100)).round_dp(1),
                "Daily loss approaching limit"
            );
        }
    }

    /// Snapshot of the breaker state for reporting.
    pub fn report(&self, ledger: &RiskLedger, equity: Decimal) -> RiskReport {
        let limit = self.daily_loss_limit(equity);
        RiskReport {
            day: ledger.day(),
            daily_pnl: ledger.realized_pnl(),
            trades_today: ledger.trades(),
            limit,
            remaining: (limit - ledger.realized_pnl().abs()).max(Decimal::ZERO),
            breaker_tripped: self.breaker_tripped(ledger, equity),
        }
    }
}

/// Daily risk status.
#[derive(Debug, Clone)]
pub struct RiskReport {
    pub day: NaiveDate,
    pub daily_pnl: Decimal,
    pub trades_today: u32,
    pub limit: Decimal,
    pub remaining: Decimal,
    pub breaker_tripped: bool,
}

impl fmt::Display for RiskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Risk Report ({}) ===", self.day)?;
        writeln!(f, "Realized PnL today: ${:.2}", self.daily_pnl)?;
        writeln!(f, "Trades closed today: {}", self.trades_today)?;
        writeln!(f, "Daily loss limit: ${:.2}", self.limit)?;
        writeln!(f, "Remaining capacity: ${:.2}", self.remaining)?;
        writeln!(
            f,
            "Circuit breaker: {}",
            if self.breaker_tripped { "TRIPPED" } else { "armed" }
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-10T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default())
    }

    #[test]
    fn test_tier_table() {
        let risk = manager();

        let d = risk.decision_for(Tier::Highest, 8).unwrap();
        assert_eq!(d.leverage, 8);
        assert_eq!(d.stop_loss_pct, dec!(0.03));
        assert_eq!(d.take_profit_pct, dec!(0.10));

        let d = risk.decision_for(Tier::High, 4).unwrap();
        assert_eq!(d.stop_loss_pct, dec!(0.05));
        assert_eq!(d.take_profit_pct, dec!(0.15));

        let d = risk.decision_for(Tier::Medium, 2).unwrap();
        assert_eq!(d.stop_loss_pct, dec!(0.07));
        assert_eq!(d.confidence_multiplier, dec!(0.4));
    }

    #[test]
    fn test_leverage_clamped_never_rejected() {
        let risk = manager();
        assert_eq!(risk.decision_for(Tier::Highest, 15).unwrap().leverage, 10);
        assert_eq!(risk.decision_for(Tier::Highest, 1).unwrap().leverage, 5);
        assert_eq!(risk.decision_for(Tier::High, 10).unwrap().leverage, 5);
        assert_eq!(risk.decision_for(Tier::Medium, 0).unwrap().leverage, 2);

        for tier in [Tier::Medium, Tier::High, Tier::Highest] {
            let max = risk.config().tiers.limits(tier).unwrap().max_leverage;
            for requested in 0..=20 {
                let leverage = risk.decision_for(tier, requested).unwrap().leverage;
                assert!(leverage >= 1 && leverage <= max);
            }
        }
    }

    #[test]
    fn test_take_profit_by_leverage() {
        let risk = manager();
        assert_eq!(risk.take_profit_for(10), dec!(0.05));
        assert_eq!(risk.take_profit_for(12), dec!(0.05));
        assert_eq!(risk.take_profit_for(5), dec!(0.10));
        assert_eq!(risk.take_profit_for(3), dec!(0.15));
    }

    #[test]
    fn test_low_tier_always_rejected() {
        let risk = manager();
        let ledger = RiskLedger::new(now());
        for requested in [1, 5, 10] {
            assert_eq!(
                risk.assess(Tier::Low, requested, "BTCUSDT", &ledger, dec!(10000)),
                Err(Rejection::LowTier)
            );
        }
    }

    #[test]
    fn test_daily_loss_breaker() {
        let risk = manager();
        let mut ledger = RiskLedger::new(now());
        let equity = dec!(10000);

        ledger.record(dec!(-499), now());
        assert!(risk.assess(Tier::Highest, 8, "BTCUSDT", &ledger, equity).is_ok());

        ledger.record(dec!(-1), now());
        for tier in [Tier::Medium, Tier::High, Tier::Highest] {
            assert!(matches!(
                risk.assess(tier, 8, "BTCUSDT", &ledger, equity),
                Err(Rejection::DailyLossLimit { .. })
            ));
        }

        // next day the ledger resets and trading resumes
        ledger.roll(now() + chrono::Duration::days(1));
        assert!(risk.assess(Tier::Highest, 8, "BTCUSDT", &ledger, equity).is_ok());
    }

    #[test]
    fn test_breaker_uses_magnitude() {
        let risk = manager();
        let mut ledger = RiskLedger::new(now());
        ledger.record(dec!(600), now());
        assert!(risk.breaker_tripped(&ledger, dec!(10000)));

        // equity not fetched yet
        assert!(!risk.breaker_tripped(&RiskLedger::new(now()), Decimal::ZERO));
    }

    struct Halted;

    impl MarketHealthCheck for Halted {
        fn check(&self, symbol: &str) -> Result<(), String> {
            Err(format!("{} trading halted", symbol))
        }
    }

    #[test]
    fn test_health_gate_vetoes() {
        let risk = RiskManager::with_health_check(RiskConfig::default(), Arc::new(Halted));
        let ledger = RiskLedger::new(now());
        assert_eq!(
            risk.assess(Tier::Highest, 8, "ETHUSDT", &ledger, dec!(10000)),
            Err(Rejection::MarketUnhealthy("ETHUSDT trading halted".to_string()))
        );
    }

    #[test]
    fn test_near_limit_warning_fires_once() {
        let risk = manager();
        let mut ledger = RiskLedger::new(now());
        ledger.record(dec!(-420), now());

        risk.warn_if_near_limit(&mut ledger, dec!(10000));
        // already consumed by the call above
        assert!(!ledger.take_warning());
    }

    #[test]
    fn test_report() {
        let risk = manager();
        let mut ledger = RiskLedger::new(now());
        ledger.record(dec!(-200), now());

        let report = risk.report(&ledger, dec!(10000));
        assert_eq!(report.limit, dec!(500));
        assert_eq!(report.remaining, dec!(300));
        assert!(!report.breaker_tripped);
        assert!(report.to_string().contains("armed"));
    }
}
