//! Position sizing: risk budget scaled by tier and leverage, capped by exposure.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::PositionConfig;
use crate::models::RiskDecision;

/// Calculator for position notionals and order quantities.
pub struct PositionSizer {
    config: PositionConfig,
}

impl PositionSizer {
    pub fn new(config: PositionConfig) -> Self {
        Self { config }
    }

    /// Quote-currency notional for a new position.
    ///
    /// `risk_amount = equity * risk_fraction * confidence_multiplier`,
    /// `size = risk_amount * leverage`, capped at `max_exposure_fraction * equity`.
    pub fn calculate_size(&self, equity: Decimal, decision: &RiskDecision) -> Decimal {
        if equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let risk_amount = equity * decision.max_risk_fraction * decision.confidence_multiplier;
        let size = risk_amount * Decimal::from(decision.leverage);

        self.apply_constraints(size, equity)
    }

    fn apply_constraints(&self, size: Decimal, equity: Decimal) -> Decimal {
        let max_position = equity * self.config.max_exposure_fraction;
        size.min(max_position).max(Decimal::ZERO)
    }

    /// Base quantity for `size` at `price`, truncated to the exchange precision.
    pub fn quantity(&self, size: Decimal, price: Decimal, precision: u32) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (size / price).round_dp_with_strategy(precision, RoundingStrategy::ToZero)
    }
}
