//! Sentiment events produced by the external text-analysis service.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_range, ValidationError};

/// Processing state of a sentiment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentStatus {
    /// Awaiting (more) verification evidence
    Analyzing,
    /// At least one position was opened from it
    Executed,
    /// Verification or risk refused it
    Rejected,
    /// Left the verification window without execution
    Expired,
}

impl SentimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentStatus::Analyzing => "analyzing",
            SentimentStatus::Executed => "executed",
            SentimentStatus::Rejected => "rejected",
            SentimentStatus::Expired => "expired",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, SentimentStatus::Analyzing)
    }
}

impl fmt::Display for SentimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SentimentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyzing" => Ok(Self::Analyzing),
            "executed" => Ok(Self::Executed),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            other => Err(anyhow::anyhow!("unknown sentiment status: {}", other)),
        }
    }
}

/// Raw response of the sentiment collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    pub sentiment: f64,
    #[serde(default)]
    pub coins: Vec<String>,
    #[serde(default)]
    pub impact: f64,
    pub confidence: f64,
}

/// Item of scraped content waiting for analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub source: String,
    #[serde(default)]
    pub author: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
}

/// A validated sentiment observation about one or more coins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentEvent {
    pub id: String,
    pub source: String,
    pub author: String,
    pub content_excerpt: String,
    /// Polarity in [-1, 1]
    pub sentiment: f64,
    /// Upper-case base symbols, e.g. "BTC"
    pub related_coins: BTreeSet<String>,
    /// Impact in [0, 100]
    pub impact_score: f64,
    /// Analyzer confidence in [0, 1]
    pub confidence: f64,
    pub received_at: DateTime<Utc>,
    pub status: SentimentStatus,
}

const EXCERPT_CHARS: usize = 280;

impl SentimentEvent {
    /// Validate an analyzer response into an event in `analyzing` state.
    pub fn from_analysis(
        source: &str,
        author: &str,
        text: &str,
        analysis: &SentimentAnalysis,
        received_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let sentiment = ensure_range("sentiment", analysis.sentiment, -1.0, 1.0)?;
        let impact_score = ensure_range("impact", analysis.impact, 0.0, 100.0)?;
        let confidence = ensure_range("confidence", analysis.confidence, 0.0, 1.0)?;

        let related_coins: BTreeSet<String> = analysis
            .coins
            .iter()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        if related_coins.is_empty() {
            return Err(ValidationError::Empty("related_coins"));
        }
        if source.is_empty() {
            return Err(ValidationError::Empty("source"));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.to_string(),
            author: author.to_string(),
            content_excerpt: text.chars().take(EXCERPT_CHARS).collect(),
            sentiment,
            related_coins,
            impact_score,
            confidence,
            received_at,
            status: SentimentStatus::Analyzing,
        })
    }

    /// +1 bullish, -1 bearish, 0 neutral.
    pub fn polarity(&self) -> i8 {
        if self.sentiment > 0.0 {
            1
        } else if self.sentiment < 0.0 {
            -1
        } else {
            0
        }
    }

    pub fn shares_coin_with(&self, other: &SentimentEvent) -> bool {
        !self.related_coins.is_disjoint(&other.related_coins)
    }
}
