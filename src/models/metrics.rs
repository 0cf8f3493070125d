//! Aggregate performance of closed positions.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Performance summary over the closed-position history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    // === Basic Statistics ===
    /// Closed positions counted
    pub total_trades: u32,

    pub winning_trades: u32,
    pub losing_trades: u32,

    /// Win rate (0.0 to 1.0)
    pub win_rate: f64,

    // === Returns ===
    /// Sum of leveraged PnL fractions
    pub total_pnl_pct: Decimal,

    pub avg_pnl_pct: Decimal,
    pub best_pnl_pct: Decimal,
    pub worst_pnl_pct: Decimal,

    /// Realized PnL in the quote asset
    pub realized_pnl: Decimal,

    // === Risk Metrics ===
    /// Largest peak-to-trough fall of cumulative realized PnL, in the quote asset
    pub max_drawdown: Decimal,

    /// Mean over standard deviation of per-trade PnL fractions
    pub sharpe_ratio: f64,
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hundred = Decimal::ONE_HUNDRED;

        writeln!(f, "\n{:=^50}", " PERFORMANCE ")?;
        writeln!(f, "--- Trades ---")?;
        writeln!(f, "Total:       {}", self.total_trades)?;
        writeln!(f, "Winners:     {} ({:.1}%)", self.winning_trades, self.win_rate * 100.0)?;
        writeln!(f, "Losers:      {}", self.losing_trades)?;
        writeln!(f)?;
        writeln!(f, "--- Returns ---")?;
        writeln!(f, "Total PnL:   {:.2}%", self.total_pnl_pct * hundred)?;
        writeln!(f, "Average:     {:.2}%", self.avg_pnl_pct * hundred)?;
        writeln!(f, "Best:        {:.2}%", self.best_pnl_pct * hundred)?;
        writeln!(f, "Worst:       {:.2}%", self.worst_pnl_pct * hundred)?;
        writeln!(f, "Realized:    ${:.2}", self.realized_pnl)?;
        writeln!(f)?;
        writeln!(f, "--- Risk Metrics ---")?;
        writeln!(f, "Max Drawdown: ${:.2}", self.max_drawdown)?;
        writeln!(f, "Sharpe Ratio: {:.2}", self.sharpe_ratio)?;
        writeln!(f, "{:=^50}", "")?;
        Ok(())
    }
}
