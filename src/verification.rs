//! Three-layer verification of sentiment events.
//!
//! Layer 1 is the event itself clearing the confidence floor. Layer 2 is
//! technical corroboration of the sentiment direction on the coin's market
//! series. Layer 3 is persistence: the event has aged, and other independent
//! events about the same coins arrived within the trailing window.
//!
//! Evaluation is a pure function of its inputs, so re-running it with the
//! same event, series and window contents yields the same record.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::VerificationConfig;
use crate::models::{CombinedSignal, MarketSeries, SentimentEvent, Tier, VerificationRecord};
use crate::strategies::corroborate;

pub struct Verifier {
    config: VerificationConfig,
}

impl Verifier {
    pub fn new(config: VerificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Layer 1: the analyzer was confident enough.
    pub fn detects(&self, event: &SentimentEvent) -> bool {
        event.confidence >= self.config.confidence_floor
    }

    /// Layer 2: indicators agree with the sentiment polarity.
    pub fn corroborates(&self, event: &SentimentEvent, series: Option<&MarketSeries>) -> bool {
        series.map_or(false, |s| {
            corroborate(s, event.polarity(), &self.config.corroboration).passed()
        })
    }

    /// Layer 3: the event is old enough and enough independent events back it up.
    pub fn persists(&self, event: &SentimentEvent, window: &[SentimentEvent], now: DateTime<Utc>) -> bool {
        if now - event.received_at < Duration::minutes(self.config.persistence_min_age_mins) {
            return false;
        }

        let since = now - Duration::minutes(self.config.persistence_window_mins);
        let supporting = window
            .iter()
            .filter(|other| other.id != event.id)
            .filter(|other| other.received_at >= since && other.received_at <= now)
            .filter(|other| other.shares_coin_with(event))
            .filter(|other| (&other.source, &other.author) != (&event.source, &event.author))
            .count();

        supporting >= self.config.persistence_min_events
    }

    /// Run all layers for one coin of `event`.
    ///
    /// `window` holds events about the event's coins from the trailing
    /// persistence window; `combined` is the technical signal of the moment,
    /// stored on the record for later sizing.
    pub fn evaluate(
        &self,
        event: &SentimentEvent,
        coin: &str,
        series: Option<&MarketSeries>,
        combined: Option<CombinedSignal>,
        window: &[SentimentEvent],
        now: DateTime<Utc>,
    ) -> VerificationRecord {
        let layer1_passed = self.detects(event);
        let (layer2_passed, layer3_passed) = if layer1_passed {
            (self.corroborates(event, series), self.persists(event, window, now))
        } else {
            (false, false)
        };

        let tier = tier_for(layer1_passed, layer2_passed, layer3_passed);
        debug!(
            event_id = %event.id,
            coin = %coin,
            layer1 = layer1_passed,
            layer2 = layer2_passed,
            layer3 = layer3_passed,
            tier = %tier,
            "Verification evaluated"
        );

        VerificationRecord {
            event_id: event.id.clone(),
            coin: coin.to_string(),
            layer1_passed,
            layer2_passed,
            layer3_passed,
            tier,
            approved: tier != Tier::Low,
            combined,
            evaluated_at: now,
            finalized_at: None,
        }
    }
}

/// Tier from layer outcomes. Persistence without corroboration earns nothing extra.
pub fn tier_for(layer1: bool, layer2: bool, layer3: bool) -> Tier {
    match (layer1, layer2, layer3) {
        (false, _, _) => Tier::Low,
        (true, true, true) => Tier::Highest,
        (true, true, false) => Tier::High,
        (true, false, _) => Tier::Medium,
    }
}

/// Leverage to ask the risk layer for, from a blend of technical strength,
/// sentiment and impact. The risk layer clamps it into the tier's range.
pub fn requested_leverage(event: &SentimentEvent, combined: Option<&CombinedSignal>) -> u32 {
    let technical = combined
        .filter(|c| c.action.polarity() * f64::from(event.polarity()) > 0.0)
        .map_or(0.0, |c| c.confidence / 100.0);

    let strength = technical * 0.6
        + (event.sentiment + 1.0) / 2.0 * 0.25
        + event.impact_score / 100.0 * 0.15;

    if strength >= 0.85 {
        10
    } else if strength >= 0.75 {
        5
    } else if strength >= 0.65 {
        3
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{series_from_closes_and_volumes, SentimentAnalysis, SignalAction};
    use crate::strategies::CorroborationParams;

    const REBOUND: [f64; 9] = [30.0, 29.0, 30.0, 28.0, 29.0, 27.0, 26.0, 24.0, 26.0];
    const SPIKE: [f64; 9] = [100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 200.0];

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn verifier() -> Verifier {
        Verifier::new(VerificationConfig {
            corroboration: CorroborationParams {
                macd_fast: 2,
                macd_slow: 4,
                macd_signal: 2,
                rsi_period: 3,
                volume_lookback: 3,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn event(source: &str, author: &str, confidence: f64, received_at: DateTime<Utc>) -> SentimentEvent {
        let analysis = SentimentAnalysis {
            sentiment: 0.7,
            coins: vec!["BTC".to_string()],
            impact: 80.0,
            confidence,
        };
        SentimentEvent::from_analysis(source, author, "btc breakout", &analysis, received_at).unwrap()
    }

    #[test]
    fn test_tier_table() {
        assert_eq!(tier_for(true, true, true), Tier::Highest);
        assert_eq!(tier_for(true, true, false), Tier::High);
        assert_eq!(tier_for(true, false, true), Tier::Medium);
        assert_eq!(tier_for(true, false, false), Tier::Medium);
        assert_eq!(tier_for(false, true, true), Tier::Low);
    }

    #[test]
    fn test_below_floor_is_low_and_stops_at_layer_one() {
        let now = at("2026-03-01T12:00:00Z");
        let series = series_from_closes_and_volumes("BTCUSDT", &REBOUND, &SPIKE);
        let weak = event("twitter", "alice", 0.60, now - Duration::minutes(30));

        let record = verifier().evaluate(&weak, "BTC", Some(&series), None, &[], now);
        assert!(!record.layer1_passed);
        assert!(!record.layer2_passed);
        assert_eq!(record.tier, Tier::Low);
        assert!(!record.approved);
    }

    #[test]
    fn test_full_verification_reaches_highest() {
        let now = at("2026-03-01T12:00:00Z");
        let series = series_from_closes_and_volumes("BTCUSDT", &REBOUND, &SPIKE);
        let main = event("twitter", "alice", 0.8, now - Duration::minutes(10));
        let window = vec![
            main.clone(),
            event("reddit", "bob", 0.7, now - Duration::minutes(20)),
            event("twitter", "carol", 0.7, now - Duration::minutes(40)),
        ];

        let v = verifier();
        let record = v.evaluate(&main, "BTC", Some(&series), None, &window, now);
        assert!(record.layer1_passed && record.layer2_passed && record.layer3_passed);
        assert_eq!(record.tier, Tier::Highest);
        assert!(record.approved);

        // idempotent
        assert_eq!(v.evaluate(&main, "BTC", Some(&series), None, &window, now), record);
    }

    #[test]
    fn test_persistence_rules() {
        let now = at("2026-03-01T12:00:00Z");
        let v = verifier();
        let main = event("twitter", "alice", 0.8, now - Duration::minutes(10));

        // same author does not count as independent
        let echo = vec![
            event("twitter", "alice", 0.8, now - Duration::minutes(15)),
            event("twitter", "alice", 0.8, now - Duration::minutes(25)),
        ];
        assert!(!v.persists(&main, &echo, now));

        // one supporting event inside the window, one outside it
        let sparse = vec![
            event("reddit", "bob", 0.7, now - Duration::minutes(20)),
            event("reddit", "dave", 0.7, now - Duration::minutes(90)),
        ];
        assert!(!v.persists(&main, &sparse, now));

        // too young regardless of support
        let fresh = event("twitter", "alice", 0.8, now - Duration::minutes(2));
        let support = vec![
            event("reddit", "bob", 0.7, now - Duration::minutes(20)),
            event("news", "eve", 0.7, now - Duration::minutes(30)),
        ];
        assert!(!v.persists(&fresh, &support, now));
        assert!(v.persists(&main, &support, now));
    }

    #[test]
    fn test_missing_series_fails_layer_two() {
        let now = at("2026-03-01T12:00:00Z");
        let main = event("twitter", "alice", 0.8, now - Duration::minutes(10));
        let record = verifier().evaluate(&main, "BTC", None, None, &[], now);
        assert_eq!(record.tier, Tier::Medium);
        assert!(record.approved);
    }

    #[test]
    fn test_requested_leverage() {
        let now = at("2026-03-01T12:00:00Z");
        let e = event("twitter", "alice", 0.8, now);
        let strong = CombinedSignal {
            action: SignalAction::Buy,
            confidence: 100.0,
            weighted_value: 1.0,
            contributions: vec![],
        };
        // 0.6 + 0.2125 + 0.12
        assert_eq!(requested_leverage(&e, Some(&strong)), 10);

        let against = CombinedSignal {
            action: SignalAction::Sell,
            ..strong.clone()
        };
        // technical ignored: 0.2125 + 0.12
        assert_eq!(requested_leverage(&e, Some(&against)), 1);
        assert_eq!(requested_leverage(&e, None), 1);

        let moderate = CombinedSignal {
            confidence: 60.0,
            ..strong
        };
        // 0.36 + 0.3325
        assert_eq!(requested_leverage(&e, Some(&moderate)), 3);
    }
}
