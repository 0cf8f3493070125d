//! Calculator for performance metrics over closed positions: win rate, drawdown, Sharpe.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::{PerformanceReport, Position};

/// Calculator for the performance report.
pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Report over the closed positions in `history`, taken in close order.
    /// Open positions are ignored.
    pub fn calculate(history: &[Position]) -> PerformanceReport {
        let mut closed: Vec<&Position> = history
            .iter()
            .filter(|p| !p.is_open() && p.realized_pnl_pct.is_some())
            .collect();
        closed.sort_by_key(|p| p.closed_at);

        let mut report = PerformanceReport::default();
        if closed.is_empty() {
            return report;
        }

        let pcts: Vec<Decimal> = closed
            .iter()
            .filter_map(|p| p.realized_pnl_pct)
            .collect();
        let pnls: Vec<Decimal> = closed
            .iter()
            .map(|p| p.realized_pnl.unwrap_or(Decimal::ZERO))
            .collect();

        report.total_trades = pcts.len() as u32;
        report.winning_trades = pcts.iter().filter(|p| **p > Decimal::ZERO).count() as u32;
        report.losing_trades = report.total_trades - report.winning_trades;
        report.win_rate = report.winning_trades as f64 / report.total_trades as f64;

        report.total_pnl_pct = pcts.iter().copied().sum();
        report.avg_pnl_pct = report.total_pnl_pct / Decimal::from(report.total_trades);
        report.best_pnl_pct = pcts.iter().copied().max().unwrap_or(Decimal::ZERO);
        report.worst_pnl_pct = pcts.iter().copied().min().unwrap_or(Decimal::ZERO);
        report.realized_pnl = pnls.iter().copied().sum();

        report.max_drawdown = Self::max_drawdown(&pnls);
        report.sharpe_ratio = Self::sharpe(&pcts);
        report
    }

    /// Largest drop of cumulative PnL below its running peak (peak starts at zero).
    fn max_drawdown(pnls: &[Decimal]) -> Decimal {
        let mut equity = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut max_dd = Decimal::ZERO;

        for pnl in pnls {
            equity += pnl;
            if equity > peak {
                peak = equity;
            }
            max_dd = max_dd.max(peak - equity);
        }

        max_dd
    }

    /// Per-trade Sharpe ratio, zero risk-free rate, not annualized.
    fn sharpe(pcts: &[Decimal]) -> f64 {
        if pcts.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = pcts.iter().filter_map(|p| p.to_f64()).collect();
        let mean = returns.iter().mean();
        let std_dev = returns.iter().std_dev();

        if std_dev > 0.0 && std_dev.is_finite() {
            mean / std_dev
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use rust_decimal_macros::dec;

    use crate::models::{CloseReason, PositionSide, RiskDecision, Tier};

    fn closed(entry: Decimal, exit: Decimal, minutes: i64) -> Position {
        let opened = DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let decision = RiskDecision {
            tier: Tier::High,
            leverage: 4,
            stop_loss_pct: dec!(0.05),
            take_profit_pct: dec!(0.15),
            max_risk_fraction: dec!(0.02),
            confidence_multiplier: dec!(0.7),
        };
        let mut p = Position::open(
            "BTCUSDT".to_string(),
            PositionSide::Long,
            dec!(1000),
            entry,
            &decision,
            "1".to_string(),
            None,
            opened,
        );
        p.close(exit, CloseReason::Manual, opened + Duration::minutes(minutes));
        p
    }

    #[test]
    fn test_performance_report() {
        // +40%, -20%, +20% at 4x on 1000 notional: +100, -50, +50
        let history = vec![
            closed(dec!(100), dec!(110), 10),
            closed(dec!(100), dec!(95), 20),
            closed(dec!(100), dec!(105), 30),
        ];
        let report = PerformanceCalculator::calculate(&history);

        assert_eq!(report.total_trades, 3);
        assert_eq!(report.winning_trades, 2);
        assert_eq!(report.losing_trades, 1);
        assert!((report.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.total_pnl_pct, dec!(0.4));
        assert_eq!(report.best_pnl_pct, dec!(0.4));
        assert_eq!(report.worst_pnl_pct, dec!(-0.2));
        assert_eq!(report.realized_pnl, dec!(100));
        assert_eq!(report.max_drawdown, dec!(50));
        assert!(report.sharpe_ratio > 0.0);
        assert!(report.to_string().contains("PERFORMANCE"));
    }

    #[test]
    fn test_drawdown_uses_close_order() {
        // listed out of order; by close time the loss comes first
        let history = vec![
            closed(dec!(100), dec!(110), 30),
            closed(dec!(100), dec!(95), 10),
        ];
        let report = PerformanceCalculator::calculate(&history);
        assert_eq!(report.max_drawdown, dec!(50));
    }

    #[test]
    fn test_empty_and_open_only() {
        assert_eq!(PerformanceCalculator::calculate(&[]), PerformanceReport::default());

        let mut open = closed(dec!(100), dec!(110), 10);
        open.status = crate::models::PositionStatus::Open;
        let report = PerformanceCalculator::calculate(&[open]);
        assert_eq!(report.total_trades, 0);
    }
}
