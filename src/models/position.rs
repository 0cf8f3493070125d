//! Leveraged position owned by the lifecycle manager.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{RiskDecision, Tier};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    pub fn sign(&self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Side implied by a sentiment polarity; `None` when neutral.
    pub fn from_polarity(polarity: i8) -> Option<Self> {
        match polarity {
            p if p > 0 => Some(PositionSide::Long),
            p if p < 0 => Some(PositionSide::Short),
            _ => None,
        }
    }

    /// Exchange order side that opens this position.
    pub fn entry_order(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Exchange order side that offsets this position.
    pub fn exit_order(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for PositionSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" | "buy" => Ok(PositionSide::Long),
            "short" | "sell" => Ok(PositionSide::Short),
            other => Err(anyhow::anyhow!("unknown position side: {}", other)),
        }
    }
}

/// Market order direction sent to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    /// Exit order about to be sent; never reopened on restore
    Closing,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closing => "closing",
            PositionStatus::Closed => "closed",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PositionStatus::Open),
            "closing" => Ok(PositionStatus::Closing),
            "closed" => Ok(PositionStatus::Closed),
            other => Err(anyhow::anyhow!("unknown position status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::Manual => "manual",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CloseReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop_loss" => Ok(CloseReason::StopLoss),
            "take_profit" => Ok(CloseReason::TakeProfit),
            "manual" => Ok(CloseReason::Manual),
            other => Err(anyhow::anyhow!("unknown close reason: {}", other)),
        }
    }
}

/// A leveraged position, open or historical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    /// Exchange symbol, e.g. "BTCUSDT"
    pub symbol: String,
    pub side: PositionSide,

    /// Quote-currency notional
    pub size: Decimal,

    /// Base-asset quantity sent to the exchange
    pub quantity: Decimal,

    pub entry_price: Decimal,
    pub leverage: u32,
    pub tier: Tier,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,

    /// Sentiment event that produced the trade, `None` for manual trades
    #[serde(default)]
    pub event_id: Option<String>,

    /// Exchange id of the entry order
    #[serde(default)]
    pub entry_order_id: String,

    /// Last observed price
    #[serde(default)]
    pub current_price: Decimal,

    /// Leveraged PnL at the last observed price, as a fraction
    #[serde(default)]
    pub unrealized_pnl_pct: Decimal,

    pub close_price: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,

    /// Leveraged PnL at close, as a fraction (-0.24 is -24%)
    pub realized_pnl_pct: Option<Decimal>,

    /// Realized quote-currency PnL at close
    pub realized_pnl: Option<Decimal>,
}

impl Position {
    /// Create an open position filled at `entry_price`, deriving exit prices from the decision.
    pub fn open(
        symbol: String,
        side: PositionSide,
        size: Decimal,
        entry_price: Decimal,
        decision: &RiskDecision,
        entry_order_id: String,
        event_id: Option<String>,
        opened_at: DateTime<Utc>,
    ) -> Self {
        let (stop_loss_price, take_profit_price) = match side {
            PositionSide::Long => (
                entry_price * (Decimal::ONE - decision.stop_loss_pct),
                entry_price * (Decimal::ONE + decision.take_profit_pct),
            ),
            PositionSide::Short => (
                entry_price * (Decimal::ONE + decision.stop_loss_pct),
                entry_price * (Decimal::ONE - decision.take_profit_pct),
            ),
        };
        let quantity = if entry_price.is_zero() {
            Decimal::ZERO
        } else {
            size / entry_price
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol,
            side,
            size,
            quantity,
            entry_price,
            leverage: decision.leverage,
            tier: decision.tier,
            stop_loss_price,
            take_profit_price,
            opened_at,
            status: PositionStatus::Open,
            event_id,
            entry_order_id,
            current_price: entry_price,
            unrealized_pnl_pct: Decimal::ZERO,
            close_price: None,
            closed_at: None,
            close_reason: None,
            realized_pnl_pct: None,
            realized_pnl: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Unleveraged signed price move relative to entry.
    fn price_change(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.side.sign() * (price - self.entry_price) / self.entry_price
    }

    /// Leveraged PnL fraction at `price`.
    pub fn pnl_pct_at(&self, price: Decimal) -> Decimal {
        self.price_change(price) * Decimal::from(self.leverage)
    }

    /// Quote-currency PnL of the held quantity at `price`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        self.side.sign() * (price - self.entry_price) * self.quantity
    }

    /// Update the mark price and running PnL.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl_pct = self.pnl_pct_at(price);
    }

    /// Exit condition at `price`. Stop-loss is checked first; at most one fires.
    pub fn exit_trigger(&self, price: Decimal) -> Option<CloseReason> {
        let (stopped, took_profit) = match self.side {
            PositionSide::Long => (price <= self.stop_loss_price, price >= self.take_profit_price),
            PositionSide::Short => (price >= self.stop_loss_price, price <= self.take_profit_price),
        };

        if stopped {
            Some(CloseReason::StopLoss)
        } else if took_profit {
            Some(CloseReason::TakeProfit)
        } else {
            None
        }
    }

    /// Turn this position into an immutable historical record.
    pub fn close(&mut self, price: Decimal, reason: CloseReason, at: DateTime<Utc>) {
        self.update_price(price);
        self.status = PositionStatus::Closed;
        self.close_price = Some(price);
        self.closed_at = Some(at);
        self.close_reason = Some(reason);
        self.realized_pnl_pct = Some(self.pnl_pct_at(price));
        self.realized_pnl = Some(self.pnl_at(price));
    }

    /// Margin committed to the position.
    pub fn margin(&self) -> Decimal {
        if self.leverage == 0 {
            return self.size;
        }
        self.size / Decimal::from(self.leverage)
    }
}
