//! Wire types for the futures exchange and the sentiment service.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ticker from /fapi/v1/ticker/price.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// Account asset from /fapi/v2/balance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEntry {
    pub asset: String,
    pub balance: Decimal,
}

/// Order acknowledgement from /fapi/v1/order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    /// Zero until the order has fills
    #[serde(default)]
    pub avg_price: Decimal,
    #[serde(default)]
    pub executed_qty: Decimal,
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

/// Result of a market order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: String,
    /// Average fill price, when the venue reports one
    pub avg_price: Option<Decimal>,
    /// Base quantity executed, when the venue reports one
    pub executed_qty: Option<Decimal>,
}

impl From<OrderResponse> for OrderFill {
    fn from(response: OrderResponse) -> Self {
        Self {
            order_id: response.order_id.to_string(),
            avg_price: (response.avg_price > Decimal::ZERO).then_some(response.avg_price),
            executed_qty: (response.executed_qty > Decimal::ZERO).then_some(response.executed_qty),
        }
    }
}

/// Request body sent to the sentiment service.
#[derive(Debug, Clone, Serialize)]
pub struct SentimentRequest<'a> {
    pub text: &'a str,
    pub source: &'a str,
    pub author: &'a str,
}
