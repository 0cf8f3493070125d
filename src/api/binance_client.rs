//! Binance USDT-margined futures REST client.
//!
//! Public market data needs no credentials. Account and order endpoints are
//! signed with HMAC-SHA256 over the query string and carry the API key header.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;

use super::exchange::Exchange;
use super::types::{ApiErrorBody, BalanceEntry, OrderFill, OrderResponse, TickerPrice};
use crate::config::ExchangeConfig;
use crate::error::ExchangeError;
use crate::models::{Bar, MarketSeries, OrderSide};

type HmacSha256 = Hmac<Sha256>;

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Margin is insufficient.
const CODE_INSUFFICIENT_MARGIN: i64 = -2019;
/// Invalid API key, IP, or permissions.
const CODE_REJECTED_MBX_KEY: i64 = -2015;
const CODE_BAD_API_KEY_FMT: i64 = -2014;
const CODE_INVALID_SIGNATURE: i64 = -1022;

pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    quote_asset: String,
    recv_window_ms: u64,
    timeout_secs: u64,
}

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            quote_asset: config.quote_asset.clone(),
            recv_window_ms: config.recv_window_ms,
            timeout_secs: config.timeout_secs,
        })
    }

    fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Unauthorized(format!("Invalid secret: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn transport_error(&self, e: reqwest::Error) -> ExchangeError {
        if e.is_timeout() {
            ExchangeError::Timeout(self.timeout_secs)
        } else if e.is_decode() {
            ExchangeError::InvalidResponse(e.to_string())
        } else {
            ExchangeError::Network(e.to_string())
        }
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(url = %url, "Exchange request");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.parse(response).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(ExchangeError::Unauthorized(
                "BINANCE_API_KEY / BINANCE_API_SECRET not set".to_string(),
            ));
        }

        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        query.push(format!("recvWindow={}", self.recv_window_ms));
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        let query = query.join("&");
        let signature = self.sign(&query)?;

        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        debug!(method = %method, path = %path, "Signed exchange request");

        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.parse(response).await
    }

    async fn parse<T: DeserializeOwned>(&self, response: Response) -> Result<T, ExchangeError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
    }
}

/// Map a non-2xx response to the exchange error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> ExchangeError {
    let api = serde_json::from_str::<ApiErrorBody>(body).ok();
    let detail = match &api {
        Some(err) => format!("{} ({}): {}", status, err.code, err.msg),
        None => format!("{}: {}", status, body),
    };

    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return ExchangeError::RateLimited(detail);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ExchangeError::Unauthorized(detail);
    }
    if status.is_server_error() {
        return ExchangeError::Network(detail);
    }

    match api.map(|a| a.code) {
        Some(CODE_INSUFFICIENT_MARGIN) => ExchangeError::InsufficientBalance(detail),
        Some(CODE_REJECTED_MBX_KEY | CODE_BAD_API_KEY_FMT | CODE_INVALID_SIGNATURE) => {
            ExchangeError::Unauthorized(detail)
        }
        _ => ExchangeError::RejectedOrder(detail),
    }
}

/// Parse one kline row: `[openTime, open, high, low, close, volume, ...]`.
fn parse_kline(row: &[Value]) -> Option<Bar> {
    let decimal = |v: &Value| -> Option<Decimal> { v.as_str()?.parse().ok() };

    let open_ms = row.first()?.as_i64()?;
    Some(Bar {
        timestamp: Utc.timestamp_millis_opt(open_ms).single()?,
        open: decimal(row.get(1)?)?,
        high: decimal(row.get(2)?)?,
        low: decimal(row.get(3)?)?,
        close: decimal(row.get(4)?)?,
        volume: decimal(row.get(5)?)?,
    })
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let ticker: TickerPrice = self
            .public_get("/fapi/v1/ticker/price", &format!("symbol={}", symbol))
            .await?;
        Ok(ticker.price)
    }

    async fn get_balance(&self) -> Result<Decimal, ExchangeError> {
        let balances: Vec<BalanceEntry> = self.signed(Method::GET, "/fapi/v2/balance", &[]).await?;
        balances
            .into_iter()
            .find(|b| b.asset == self.quote_asset)
            .map(|b| b.balance)
            .ok_or_else(|| {
                ExchangeError::InvalidResponse(format!("No {} balance in account", self.quote_asset))
            })
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<MarketSeries, ExchangeError> {
        let rows: Vec<Vec<Value>> = self
            .public_get(
                "/fapi/v1/klines",
                &format!("symbol={}&interval={}&limit={}", symbol, interval, limit),
            )
            .await?;

        let bars = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                parse_kline(row)
                    .ok_or_else(|| ExchangeError::InvalidResponse(format!("Malformed kline at {}", i)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        MarketSeries::new(symbol, interval, bars)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        let response: OrderResponse = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
        debug!(
            order_id = response.order_id,
            symbol = %response.symbol,
            status = %response.status,
            executed = %response.executed_qty,
            "Order acknowledged"
        );

        Ok(OrderFill::from(response))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let params = [("symbol", symbol.to_string()), ("leverage", leverage.to_string())];
        let _: Value = self.signed(Method::POST, "/fapi/v1/leverage", &params).await?;
        Ok(())
    }
}
