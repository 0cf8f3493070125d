//! Trading logic: risk tiering, daily-loss ledger, position sizing and lifecycle.

mod ledger;
mod position_manager;
mod position_sizer;
mod risk;

pub use ledger::RiskLedger;
pub use position_manager::{MonitorSummary, OpenRequest, PositionManager};
pub use position_sizer::PositionSizer;
pub use risk::{AlwaysHealthy, MarketHealthCheck, RiskManager, RiskReport};
