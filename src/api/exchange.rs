//! Exchange collaborator interface and the timeout decorator every call goes through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::time::timeout;

use super::types::OrderFill;
use crate::error::ExchangeError;
use crate::models::{MarketSeries, OrderSide};

/// Market data, account and order operations the engine needs.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Latest traded price.
    async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Account equity in the quote asset.
    async fn get_balance(&self) -> Result<Decimal, ExchangeError>;

    /// Recent candles, oldest first.
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<MarketSeries, ExchangeError>;

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;
}

/// Bounds every call of the wrapped exchange. An elapsed call becomes
/// `ExchangeError::Timeout` and its future is dropped.
pub struct TimedExchange {
    inner: Arc<dyn Exchange>,
    limit: Duration,
}

impl TimedExchange {
    pub fn new(inner: Arc<dyn Exchange>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    fn elapsed(&self) -> ExchangeError {
        ExchangeError::Timeout(self.limit.as_secs().max(1))
    }
}

#[async_trait]
impl Exchange for TimedExchange {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        timeout(self.limit, self.inner.get_price(symbol))
            .await
            .map_err(|_| self.elapsed())?
    }

    async fn get_balance(&self) -> Result<Decimal, ExchangeError> {
        timeout(self.limit, self.inner.get_balance())
            .await
            .map_err(|_| self.elapsed())?
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<MarketSeries, ExchangeError> {
        timeout(self.limit, self.inner.get_klines(symbol, interval, limit))
            .await
            .map_err(|_| self.elapsed())?
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError> {
        timeout(self.limit, self.inner.submit_market_order(symbol, side, quantity))
            .await
            .map_err(|_| self.elapsed())?
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        timeout(self.limit, self.inner.set_leverage(symbol, leverage))
            .await
            .map_err(|_| self.elapsed())?
    }
}
