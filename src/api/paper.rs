//! Paper execution: real market data, simulated fills against a local account.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use super::exchange::Exchange;
use super::types::OrderFill;
use crate::error::ExchangeError;
use crate::models::{MarketSeries, OrderSide};

/// Net holding in one symbol. Positive quantity is long.
#[derive(Debug, Clone, Default)]
struct Holding {
    quantity: Decimal,
    avg_price: Decimal,
}

/// Leverage of a symbol that never had one set.
const DEFAULT_LEVERAGE: u32 = 1;
const MAX_LEVERAGE: u32 = 125;

#[derive(Debug, Default)]
struct PaperAccount {
    /// Wallet balance: starting capital plus realized PnL
    balance: Decimal,
    holdings: HashMap<String, Holding>,
    leverage: HashMap<String, u32>,
}

impl PaperAccount {
    fn leverage_of(&self, symbol: &str) -> Decimal {
        Decimal::from(self.leverage.get(symbol).copied().unwrap_or(DEFAULT_LEVERAGE))
    }

    /// Margin locked by every holding at its entry price.
    fn used_margin(&self) -> Decimal {
        self.holdings
            .iter()
            .map(|(symbol, h)| h.quantity.abs() * h.avg_price / self.leverage_of(symbol))
            .sum()
    }

    /// Refuse a fill whose added exposure needs more margin than is free.
    fn check_margin(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<(), ExchangeError> {
        let held = self.holdings.get(symbol).map(|h| h.quantity).unwrap_or(Decimal::ZERO);
        let adding = held.is_zero() || held.is_sign_positive() == (side == OrderSide::Buy);
        let added = if adding {
            quantity
        } else {
            (quantity - held.abs()).max(Decimal::ZERO)
        };
        if added.is_zero() {
            return Ok(());
        }

        let required = added * price / self.leverage_of(symbol);
        let free = self.balance - self.used_margin();
        if required > free {
            return Err(ExchangeError::InsufficientBalance(format!(
                "margin {} required, {} available",
                required.round_dp(2),
                free.round_dp(2)
            )));
        }
        Ok(())
    }

    /// Apply a fill and return the PnL it realized.
    fn fill(&mut self, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Decimal {
        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };

        let holding = self.holdings.entry(symbol.to_string()).or_default();
        let mut realized = Decimal::ZERO;

        if holding.quantity.is_zero() || holding.quantity.is_sign_positive() == signed.is_sign_positive() {
            // Adding to (or opening) the holding
            let total = holding.quantity + signed;
            holding.avg_price = (holding.avg_price * holding.quantity.abs() + price * quantity) / total.abs();
            holding.quantity = total;
        } else {
            let closing = quantity.min(holding.quantity.abs());
            let direction = if holding.quantity.is_sign_positive() { Decimal::ONE } else { -Decimal::ONE };
            realized = closing * (price - holding.avg_price) * direction;

            let remainder = holding.quantity + signed;
            if remainder.is_zero() {
                holding.quantity = Decimal::ZERO;
                holding.avg_price = Decimal::ZERO;
            } else if remainder.is_sign_positive() != holding.quantity.is_sign_positive() {
                // Flipped through zero: the excess opens at the fill price
                holding.avg_price = price;
                holding.quantity = remainder;
            } else {
                holding.quantity = remainder;
            }
        }

        if holding.quantity.is_zero() {
            self.holdings.remove(symbol);
        }
        self.balance += realized;
        realized
    }
}

/// Exchange that reads prices and candles from a live source but never sends orders.
pub struct PaperExchange {
    market: Arc<dyn Exchange>,
    account: Mutex<PaperAccount>,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn Exchange>, starting_balance: Decimal) -> Self {
        Self {
            market,
            account: Mutex::new(PaperAccount {
                balance: starting_balance,
                ..Default::default()
            }),
        }
    }

    fn account(&self) -> std::sync::MutexGuard<'_, PaperAccount> {
        self.account.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Net signed quantity currently held in `symbol`.
    pub fn net_quantity(&self, symbol: &str) -> Decimal {
        self.account()
            .holdings
            .get(symbol)
            .map(|h| h.quantity)
            .unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.market.get_price(symbol).await
    }

    async fn get_balance(&self) -> Result<Decimal, ExchangeError> {
        Ok(self.account().balance)
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<MarketSeries, ExchangeError> {
        self.market.get_klines(symbol, interval, limit).await
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError> {
        if quantity <= Decimal::ZERO {
            return Err(ExchangeError::RejectedOrder(format!(
                "Quantity must be positive, got {}",
                quantity
            )));
        }

        let price = self.market.get_price(symbol).await?;
        let realized = {
            let mut account = self.account();
            account.check_margin(symbol, side, quantity, price)?;
            account.fill(symbol, side, quantity, price)
        };
        let order_id = format!("paper-{}", uuid::Uuid::new_v4());

        info!(
            order_id = %order_id,
            symbol = %symbol,
            side = %side.as_str(),
            quantity = %quantity,
            price = %price,
            realized = %realized.round_dp(2),
            "[PAPER] Filled market order"
        );

        Ok(OrderFill {
            order_id,
            avg_price: Some(price),
            executed_qty: Some(quantity),
        })
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        if !(1..=MAX_LEVERAGE).contains(&leverage) {
            return Err(ExchangeError::RejectedOrder(format!(
                "Leverage {} outside 1..={}",
                leverage, MAX_LEVERAGE
            )));
        }
        self.account().leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }
}
