//! External collaborators: futures exchange (live and paper) and sentiment service.

mod binance_client;
mod exchange;
mod paper;
mod sentiment_client;
mod types;

pub use binance_client::BinanceClient;
pub use exchange::{Exchange, TimedExchange};
pub use paper::PaperExchange;
pub use sentiment_client::{HttpSentimentClient, SentimentAnalyzer};
pub use types::*;
