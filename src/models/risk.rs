//! Risk parameters attached to an approved trade.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Tier;

/// Tier-derived risk bounds for one trade. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub tier: Tier,
    /// Leverage within [1, tier ceiling]
    pub leverage: u32,
    /// Adverse price move that closes the position, as a fraction of entry
    pub stop_loss_pct: Decimal,
    /// Favorable price move that closes the position, as a fraction of entry
    pub take_profit_pct: Decimal,
    /// Fraction of equity put at risk before tier scaling
    pub max_risk_fraction: Decimal,
    /// Sizing multiplier for this tier
    pub confidence_multiplier: Decimal,
}
