//! Confidence tiers and per-event verification outcomes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CombinedSignal;

/// Discrete confidence bucket, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Low,
    Medium,
    High,
    Highest,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::Medium => "medium",
            Tier::High => "high",
            Tier::Highest => "highest",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Tier::Low),
            "medium" => Ok(Tier::Medium),
            "high" => Ok(Tier::High),
            "highest" => Ok(Tier::Highest),
            other => Err(anyhow::anyhow!("unknown tier: {}", other)),
        }
    }
}

/// Outcome of the three-layer protocol for one (event, coin) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub event_id: String,
    pub coin: String,
    /// Event exists and clears the confidence floor
    pub layer1_passed: bool,
    /// Technical corroboration agrees with the sentiment polarity
    pub layer2_passed: bool,
    /// Similar independent events persisted over time
    pub layer3_passed: bool,
    pub tier: Tier,
    pub approved: bool,
    /// Combined technical signal observed at evaluation time
    pub combined: Option<CombinedSignal>,
    pub evaluated_at: DateTime<Utc>,
    /// Set once the record drove a final decision; never re-evaluated after
    pub finalized_at: Option<DateTime<Utc>>,
}

impl VerificationRecord {
    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }

    pub fn finalize(&mut self, at: DateTime<Utc>) {
        if self.finalized_at.is_none() {
            self.finalized_at = Some(at);
        }
    }
}
