//! Data models for market history, signals, sentiment, verification, risk, and positions.

mod market;
mod metrics;
mod position;
mod risk;
mod sentiment;
mod signal;
mod verification;

pub use market::{Bar, MarketSeries};
pub use metrics::PerformanceReport;
pub use position::{CloseReason, OrderSide, Position, PositionSide, PositionStatus};
pub use risk::RiskDecision;
pub use sentiment::{ContentItem, SentimentAnalysis, SentimentEvent, SentimentStatus};
pub use signal::{CombinedSignal, IndicatorSignal, SignalAction};
pub use verification::{Tier, VerificationRecord};

#[cfg(test)]
pub(crate) use market::{series_from_closes, series_from_closes_and_volumes};
