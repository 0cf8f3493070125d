//! Same-day realized PnL counter behind the daily-loss circuit breaker.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Realized PnL for one UTC calendar day.
///
/// Every mutation takes the current time so the day rollover is an explicit
/// transition rather than something read from a global clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLedger {
    day: NaiveDate,
    realized_pnl: Decimal,
    trades: u32,
    /// Whether the near-limit warning already fired today
    warned: bool,
}

impl RiskLedger {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::restore(now.date_naive(), Decimal::ZERO, 0)
    }

    /// Rebuild a persisted ledger.
    pub fn restore(day: NaiveDate, realized_pnl: Decimal, trades: u32) -> Self {
        Self {
            day,
            realized_pnl,
            trades,
            warned: false,
        }
    }

    /// Reset to zero when `now` falls on a later day. Returns true on rollover.
    pub fn roll(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today > self.day {
            *self = Self::new(now);
            return true;
        }
        false
    }

    /// Record a realized quote PnL from a close.
    pub fn record(&mut self, pnl: Decimal, now: DateTime<Utc>) {
        self.roll(now);
        self.realized_pnl += pnl;
        self.trades += 1;
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn trades(&self) -> u32 {
        self.trades
    }

    /// Marks the near-limit warning as sent; returns false if it already was today.
    pub fn take_warning(&mut self) -> bool {
        !std::mem::replace(&mut self.warned, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_accumulates_within_day() {
        let mut ledger = RiskLedger::new(at("2026-03-01T00:10:00Z"));
        ledger.record(dec!(-120), at("2026-03-01T08:00:00Z"));
        ledger.record(dec!(40), at("2026-03-01T23:59:59Z"));

        assert_eq!(ledger.realized_pnl(), dec!(-80));
        assert_eq!(ledger.trades(), 2);
    }

    #[test]
    fn test_rollover_resets() {
        let mut ledger = RiskLedger::new(at("2026-03-01T12:00:00Z"));
        ledger.record(dec!(-500), at("2026-03-01T13:00:00Z"));
        assert!(ledger.take_warning());
        assert!(!ledger.take_warning());

        assert!(!ledger.roll(at("2026-03-01T23:00:00Z")));
        assert!(ledger.roll(at("2026-03-02T00:00:01Z")));
        assert_eq!(ledger.realized_pnl(), Decimal::ZERO);
        assert_eq!(ledger.trades(), 0);
        assert!(ledger.take_warning());

        // a close on the new day starts a fresh tally
        ledger.record(dec!(10), at("2026-03-02T01:00:00Z"));
        assert_eq!(ledger.realized_pnl(), dec!(10));
    }
}
