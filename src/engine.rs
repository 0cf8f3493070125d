//! Pipeline glue: market data refresh, sentiment verification with trade
//! execution, and position supervision, shared by the scheduler and the CLI.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::api::{Exchange, SentimentAnalyzer};
use crate::config::AppConfig;
use crate::db::Store;
use crate::error::{OpenError, Rejection};
use crate::feed::{ContentFeed, IngestSummary};
use crate::metrics::PerformanceCalculator;
use crate::models::{
    MarketSeries, PerformanceReport, Position, PositionSide, SentimentEvent,
    SentimentStatus, Tier, VerificationRecord,
};
use crate::strategies::{SignalCombiner, StrategyRegistry};
use crate::trading::{
    MonitorSummary, OpenRequest, PositionManager, PositionSizer, RiskManager, RiskReport,
};
use crate::verification::{requested_leverage, Verifier};

/// Counts from one refresh run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshSummary {
    pub symbols: usize,
    pub failed_symbols: usize,
    pub equity: Option<Decimal>,
    pub ingest: IngestSummary,
}

impl fmt::Display for RefreshSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "symbols={} failed={} equity={} {}",
            self.symbols,
            self.failed_symbols,
            self.equity
                .map(|e| format!("${:.2}", e))
                .unwrap_or_else(|| "unknown".to_string()),
            self.ingest
        )
    }
}

/// Counts from one evaluation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub events: usize,
    pub expired: usize,
    pub executed: usize,
    pub rejected: usize,
    /// Still analyzing after this run
    pub pending: usize,
    pub failed: usize,
    pub positions_opened: usize,
}

impl fmt::Display for EvaluationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={} expired={} executed={} rejected={} pending={} failed={} opened={}",
            self.events,
            self.expired,
            self.executed,
            self.rejected,
            self.pending,
            self.failed,
            self.positions_opened
        )
    }
}

/// Summaries of one full refresh, evaluation and monitoring cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub refresh: RefreshSummary,
    pub evaluation: EvaluationSummary,
    pub monitor: MonitorSummary,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^50}", " CYCLE ")?;
        writeln!(f, "Refresh:    {}", self.refresh)?;
        writeln!(f, "Evaluation: {}", self.evaluation)?;
        writeln!(f, "Monitor:    {}", self.monitor)?;
        write!(f, "{:=^50}", "")
    }
}

/// Per-coin result of evaluating an event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CoinOutcome {
    Opened,
    Rejected,
    Pending,
}

/// Shared pipeline state and components.
pub struct Engine {
    config: AppConfig,
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn Store>,
    feed: ContentFeed,
    verifier: Verifier,
    strategies: StrategyRegistry,
    combiner: SignalCombiner,
    positions: PositionManager,
    watchlist: BTreeSet<String>,

    series: RwLock<HashMap<String, MarketSeries>>,
}

impl Engine {
    pub fn new(
        config: AppConfig,
        exchange: Arc<dyn Exchange>,
        analyzer: Arc<dyn SentimentAnalyzer>,
        store: Arc<dyn Store>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let combiner =
            SignalCombiner::from_config(&config.strategy).context("Invalid strategy weights")?;
        let positions = PositionManager::new(
            exchange.clone(),
            store.clone(),
            RiskManager::new(config.risk.clone()),
            PositionSizer::new(config.position.clone()),
            config.exchange.clone(),
            config.position.max_open_positions,
            now,
        );

        Ok(Self {
            feed: ContentFeed::new(&config.feed, analyzer, store.clone()),
            verifier: Verifier::new(config.verification.clone()),
            strategies: StrategyRegistry::from_config(&config.strategy),
            watchlist: config.watchlist.iter().map(|c| c.to_uppercase()).collect(),
            combiner,
            positions,
            exchange,
            store,
            config,
            series: RwLock::new(HashMap::new()),
        })
    }

    /// Reload persisted open positions and the risk ledger.
    pub async fn restore(&self, now: DateTime<Utc>) -> Result<usize> {
        self.positions.restore(now).await
    }

    // ==================== Refresh ====================

    /// Fetch market history for every watched symbol concurrently, refresh equity
    /// and drain the inbox. A failing symbol is skipped; its previous series stays cached.
    pub async fn refresh(&self, now: DateTime<Utc>) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        let exchange = &self.config.exchange;

        let symbols = self.config.symbols();
        let fetches = symbols.iter().map(|symbol| {
            self.exchange
                .get_klines(symbol, &exchange.kline_interval, exchange.kline_limit)
        });
        let results = join_all(fetches).await;

        for (symbol, result) in symbols.into_iter().zip(results) {
            summary.symbols += 1;
            match result {
                Ok(series) => {
                    debug!(symbol = %symbol, bars = series.len(), "Market data refreshed");
                    self.series.write().await.insert(symbol, series);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Market data refresh failed");
                    summary.failed_symbols += 1;
                }
            }
        }

        match self.positions.refresh_equity().await {
            Ok(equity) => summary.equity = Some(equity),
            Err(e) => warn!(error = %e, "Equity refresh failed"),
        }

        match self.feed.ingest_inbox(now).await {
            Ok(ingest) => summary.ingest = ingest,
            Err(e) => error!(error = %e, "Inbox ingest failed"),
        }

        info!(summary = %summary, "Refresh complete");
        summary
    }

    /// Analyze one text and store the event.
    pub async fn ingest_text(
        &self,
        text: &str,
        source: &str,
        author: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SentimentEvent>> {
        self.feed.ingest_text(text, source, author, now).await
    }

    // ==================== Evaluation ====================

    /// Verify every analyzing event and trade the ones that qualify.
    /// Failures are isolated per event.
    pub async fn evaluate(&self, now: DateTime<Utc>) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();

        let events = match self.store.events_by_status(SentimentStatus::Analyzing).await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Failed to load analyzing events");
                summary.failed += 1;
                return summary;
            }
        };

        let window = Duration::hours(self.verifier.config().window_hours);
        for event in events {
            summary.events += 1;

            if now - event.received_at > window {
                match self.set_status(&event, SentimentStatus::Expired).await {
                    Ok(()) => summary.expired += 1,
                    Err(e) => {
                        warn!(event_id = %event.id, error = %e, "Failed to expire event");
                        summary.failed += 1;
                    }
                }
                continue;
            }

            match self.evaluate_event(&event, now, &mut summary).await {
                Ok(status) if !status.is_final() => summary.pending += 1,
                Ok(SentimentStatus::Executed) => summary.executed += 1,
                Ok(_) => summary.rejected += 1,
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Event evaluation failed");
                    summary.failed += 1;
                }
            }
        }

        info!(summary = %summary, "Evaluation complete");
        summary
    }

    /// Evaluate all watched coins of one event and settle its status.
    async fn evaluate_event(
        &self,
        event: &SentimentEvent,
        now: DateTime<Utc>,
        summary: &mut EvaluationSummary,
    ) -> Result<SentimentStatus> {
        let Some(side) = PositionSide::from_polarity(event.polarity()) else {
            info!(event_id = %event.id, reason = %Rejection::NeutralSignal, "Event rejected");
            self.set_status(event, SentimentStatus::Rejected).await?;
            return Ok(SentimentStatus::Rejected);
        };

        let coins: Vec<&String> = event
            .related_coins
            .iter()
            .filter(|c| self.watchlist.contains(*c))
            .collect();
        if coins.is_empty() {
            info!(event_id = %event.id, coins = ?event.related_coins, "Event rejected, no watched coins");
            self.set_status(event, SentimentStatus::Rejected).await?;
            return Ok(SentimentStatus::Rejected);
        }

        let since = now - Duration::minutes(self.verifier.config().persistence_window_mins);
        let window = self
            .store
            .recent_events_for_coins(&event.related_coins, since)
            .await
            .context("Failed to load persistence window")?;

        let mut opened = false;
        let mut pending = false;
        for coin in coins {
            if let Some(existing) = self.store.verification_for(&event.id, coin).await? {
                if existing.is_finalized() {
                    continue;
                }
            }

            match self.evaluate_coin(event, coin, side, &window, now).await? {
                CoinOutcome::Opened => {
                    opened = true;
                    summary.positions_opened += 1;
                }
                CoinOutcome::Pending => pending = true,
                CoinOutcome::Rejected => {}
            }
        }

        let status = if opened {
            SentimentStatus::Executed
        } else if pending {
            SentimentStatus::Analyzing
        } else {
            SentimentStatus::Rejected
        };
        if status != event.status {
            self.set_status(event, status).await?;
        }
        Ok(status)
    }

    async fn evaluate_coin(
        &self,
        event: &SentimentEvent,
        coin: &str,
        side: PositionSide,
        window: &[SentimentEvent],
        now: DateTime<Utc>,
    ) -> Result<CoinOutcome> {
        let symbol = self.config.exchange.symbol_for(coin);
        let (series, combined) = {
            let cache = self.series.read().await;
            let series = cache.get(&symbol).cloned();
            let combined = series
                .as_ref()
                .map(|s| self.combiner.combine(&self.strategies.evaluate_all(s)));
            (series, combined)
        };

        let mut record = self
            .verifier
            .evaluate(event, coin, series.as_ref(), combined, window, now);

        if record.tier == Tier::Low {
            info!(event_id = %event.id, coin = %coin, reason = %Rejection::LowTier, "Signal rejected");
            self.finalize(&mut record, now).await?;
            return Ok(CoinOutcome::Rejected);
        }

        let required = self.verifier.config().min_execution_tier;
        if record.tier < required {
            debug!(
                event_id = %event.id,
                coin = %coin,
                tier = %record.tier,
                required = %required,
                "Waiting for more evidence"
            );
            self.save(&record).await?;
            return Ok(CoinOutcome::Pending);
        }

        let request = OpenRequest {
            symbol: symbol.clone(),
            side,
            tier: record.tier,
            requested_leverage: requested_leverage(event, record.combined.as_ref()),
            event_id: Some(event.id.clone()),
        };

        let outcome = match self.positions.open(request, now).await {
            Ok(position) => {
                info!(
                    event_id = %event.id,
                    position_id = %position.id,
                    symbol = %symbol,
                    tier = %record.tier,
                    "Signal executed"
                );
                CoinOutcome::Opened
            }
            Err(OpenError::Rejected(reason)) => {
                info!(event_id = %event.id, symbol = %symbol, tier = %record.tier, reason = %reason, "Signal rejected");
                CoinOutcome::Rejected
            }
            Err(OpenError::Exchange(e)) if e.is_transient() => {
                warn!(event_id = %event.id, symbol = %symbol, error = %e, "Open failed, retrying next run");
                self.save(&record).await?;
                return Ok(CoinOutcome::Pending);
            }
            Err(OpenError::Exchange(e)) => {
                error!(event_id = %event.id, symbol = %symbol, error = %e, "Open failed");
                CoinOutcome::Rejected
            }
            Err(OpenError::Storage(e)) => {
                // The position is live and tracked; only its row is missing.
                error!(event_id = %event.id, symbol = %symbol, error = %e, "Opened position not persisted");
                CoinOutcome::Opened
            }
        };

        self.finalize(&mut record, now).await?;
        Ok(outcome)
    }

    async fn finalize(&self, record: &mut VerificationRecord, now: DateTime<Utc>) -> Result<()> {
        record.finalize(now);
        self.save(record).await
    }

    async fn save(&self, record: &VerificationRecord) -> Result<()> {
        self.store
            .save_verification(record)
            .await
            .context("Failed to save verification record")
    }

    async fn set_status(&self, event: &SentimentEvent, status: SentimentStatus) -> Result<()> {
        self.store
            .update_event_status(&event.id, status)
            .await
            .with_context(|| format!("Failed to mark event {} {}", event.id, status))
    }

    // ==================== Positions ====================

    pub async fn monitor(&self, now: DateTime<Utc>) -> MonitorSummary {
        let summary = self.positions.monitor(now).await;
        info!(summary = %summary, "Monitoring complete");
        summary
    }

    /// Refresh, evaluate and monitor once, in that order.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        CycleReport {
            refresh: self.refresh(now).await,
            evaluation: self.evaluate(now).await,
            monitor: self.monitor(now).await,
        }
    }

    /// Open a position without verification. Risk tiering and lifecycle rules still apply.
    pub async fn manual_trade(
        &self,
        coin: &str,
        side: PositionSide,
        leverage: u32,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<Position, OpenError> {
        let request = OpenRequest {
            symbol: self.config.exchange.symbol_for(coin),
            side,
            tier,
            requested_leverage: leverage,
            event_id: None,
        };
        self.positions.open(request, now).await
    }

    pub async fn close_position(&self, id: &str, now: DateTime<Utc>) -> Result<Position> {
        self.positions.close_manual(id, now).await
    }

    /// Open positions repriced at the current market without triggering exits.
    /// A position whose price cannot be fetched keeps its last known price.
    pub async fn open_positions(&self) -> Vec<Position> {
        let mut positions = self.positions.open_positions().await;
        for position in &mut positions {
            match self.exchange.get_price(&position.symbol).await {
                Ok(price) => position.update_price(price),
                Err(e) => warn!(position_id = %position.id, error = %e, "Price unavailable"),
            }
        }
        positions
    }

    pub async fn performance(&self) -> Result<PerformanceReport> {
        let closed = self
            .store
            .closed_positions()
            .await
            .context("Failed to load closed positions")?;
        Ok(PerformanceCalculator::calculate(&closed))
    }

    pub async fn risk_report(&self, now: DateTime<Utc>) -> RiskReport {
        if self.positions.equity().await.is_zero() {
            if let Err(e) = self.positions.refresh_equity().await {
                warn!(error = %e, "Equity refresh failed");
            }
        }
        self.positions.risk_report(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{series_from_closes_and_volumes, SentimentAnalysis};
    use crate::strategies::CorroborationParams;
    use crate::testing::{MemoryStore, MockAnalyzer, MockExchange};
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    const REBOUND: [f64; 9] = [30.0, 29.0, 30.0, 28.0, 29.0, 27.0, 26.0, 24.0, 26.0];
    const SPIKE: [f64; 9] = [100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 200.0];

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.feed.inbox_dir = std::env::temp_dir()
            .join(format!("cryptolev-missing-{}", uuid::Uuid::new_v4()))
            .display()
            .to_string();
        config.verification.corroboration = CorroborationParams {
            macd_fast: 2,
            macd_slow: 4,
            macd_signal: 2,
            rsi_period: 3,
            volume_lookback: 3,
            ..Default::default()
        };
        config
    }

    fn engine(config: AppConfig, mock: Arc<MockExchange>, store: Arc<MemoryStore>) -> Engine {
        assert_ok!(Engine::new(config, mock, Arc::new(MockAnalyzer::new()), store, now()))
    }

    async fn stored_event(
        store: &MemoryStore,
        author: &str,
        sentiment: f64,
        confidence: f64,
        coin: &str,
        minutes_ago: i64,
    ) -> SentimentEvent {
        let analysis = SentimentAnalysis {
            sentiment,
            coins: vec![coin.to_string()],
            impact: 70.0,
            confidence,
        };
        let event = SentimentEvent::from_analysis(
            "twitter",
            author,
            "coin news",
            &analysis,
            now() - Duration::minutes(minutes_ago),
        )
        .unwrap();
        assert_ok!(store.insert_event(&event).await);
        event
    }

    async fn status_of(store: &MemoryStore, event: &SentimentEvent) -> SentimentStatus {
        assert_ok!(store.get_event(&event.id).await).unwrap().status
    }

    #[tokio::test]
    async fn test_low_confidence_issues_no_exchange_call() {
        let mock = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());
        let engine = engine(config(), mock.clone(), store.clone());
        let event = stored_event(&store, "alice", 0.7, 0.60, "BTC", 10).await;

        let summary = engine.evaluate(now()).await;
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.positions_opened, 0);
        assert_eq!(mock.call_count(), 0);
        assert_eq!(status_of(&store, &event).await, SentimentStatus::Rejected);

        let record = assert_ok!(store.verification_for(&event.id, "BTC").await).unwrap();
        assert_eq!(record.tier, Tier::Low);
        assert!(!record.approved);
        assert!(record.is_finalized());
        assert!(assert_ok!(store.open_positions().await).is_empty());
    }

    #[tokio::test]
    async fn test_verified_event_opens_highest_tier_position() {
        let mock = Arc::new(MockExchange::new());
        mock.set_klines(series_from_closes_and_volumes("BTCUSDT", &REBOUND, &SPIKE));
        mock.set_price("BTCUSDT", dec!(26));
        let store = Arc::new(MemoryStore::new());
        let engine = engine(config(), mock.clone(), store.clone());

        let refresh = engine.refresh(now()).await;
        assert_eq!(refresh.equity, Some(dec!(10000)));
        // only BTC has history
        assert_eq!(refresh.failed_symbols, 3);

        let first = stored_event(&store, "carol", 0.7, 0.8, "BTC", 40).await;
        let second = stored_event(&store, "bob", 0.6, 0.7, "BTC", 20).await;
        let third = stored_event(&store, "alice", 0.8, 0.9, "BTC", 10).await;

        let summary = engine.evaluate(now()).await;
        assert_eq!(summary.events, 3);
        assert_eq!(summary.positions_opened, 1);
        assert_eq!(summary.executed, 1);
        // later events about the same coin hit the open position
        assert_eq!(summary.rejected, 2);

        assert_eq!(status_of(&store, &first).await, SentimentStatus::Executed);
        assert_eq!(status_of(&store, &second).await, SentimentStatus::Rejected);
        assert_eq!(status_of(&store, &third).await, SentimentStatus::Rejected);

        let record = assert_ok!(store.verification_for(&first.id, "BTC").await).unwrap();
        assert_eq!(record.tier, Tier::Highest);
        assert!(record.layer1_passed && record.layer2_passed && record.layer3_passed);
        assert!(record.combined.is_some());

        let open = engine.open_positions().await;
        assert_eq!(open.len(), 1);
        let position = &open[0];
        assert_eq!(position.side, PositionSide::Long);
        assert_eq!(position.tier, Tier::Highest);
        assert_eq!(position.leverage, 5);
        assert_eq!(position.size, dec!(1000));
        assert_eq!(position.event_id.as_deref(), Some(first.id.as_str()));
        assert_eq!(mock.orders().len(), 1);

        // finalized records are not evaluated again
        let again = engine.evaluate(now()).await;
        assert_eq!(again.events, 0);
        assert_eq!(mock.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_rejects_signal_without_order() {
        let mock = Arc::new(MockExchange::new());
        for (symbol, price) in [("ETHUSDT", dec!(2000)), ("DOGEUSDT", dec!(1)), ("SHIBUSDT", dec!(1))] {
            mock.set_price(symbol, price);
        }
        mock.set_price("BTCUSDT", dec!(50000));
        let store = Arc::new(MemoryStore::new());
        let engine = engine(config(), mock.clone(), store.clone());

        for coin in ["ETH", "DOGE", "SHIB"] {
            assert_ok!(
                engine
                    .manual_trade(coin, PositionSide::Long, 3, Tier::High, now())
                    .await
            );
        }
        assert_eq!(mock.orders().len(), 3);

        // no BTC history: corroboration fails, tier is medium
        let event = stored_event(&store, "alice", 0.7, 0.8, "BTC", 10).await;
        let summary = engine.evaluate(now()).await;
        assert_eq!(summary.rejected, 1);
        assert_eq!(mock.orders().len(), 3);
        assert_eq!(status_of(&store, &event).await, SentimentStatus::Rejected);

        let record = assert_ok!(store.verification_for(&event.id, "BTC").await).unwrap();
        assert_eq!(record.tier, Tier::Medium);
        assert!(record.is_finalized());

        let err = assert_err!(
            engine
                .manual_trade("BTC", PositionSide::Short, 3, Tier::High, now())
                .await
        );
        assert_eq!(err.to_string(), "rejected: max open positions reached: 3/3");
    }

    #[tokio::test]
    async fn test_below_execution_tier_waits_then_expires() {
        let mock = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());
        let mut config = config();
        config.verification.min_execution_tier = Tier::High;
        let engine = engine(config, mock.clone(), store.clone());

        let event = stored_event(&store, "alice", -0.5, 0.8, "ETH", 10).await;
        let summary = engine.evaluate(now()).await;
        assert_eq!(summary.pending, 1);
        assert_eq!(status_of(&store, &event).await, SentimentStatus::Analyzing);
        let record = assert_ok!(store.verification_for(&event.id, "ETH").await).unwrap();
        assert_eq!(record.tier, Tier::Medium);
        assert!(!record.is_finalized());
        assert_eq!(mock.call_count(), 0);

        let later = now() + Duration::hours(25);
        let summary = engine.evaluate(later).await;
        assert_eq!(summary.expired, 1);
        assert_eq!(status_of(&store, &event).await, SentimentStatus::Expired);
    }

    #[tokio::test]
    async fn test_neutral_and_unwatched_events_rejected() {
        let mock = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());
        let engine = engine(config(), mock.clone(), store.clone());

        let neutral = stored_event(&store, "alice", 0.0, 0.9, "BTC", 10).await;
        let unwatched = stored_event(&store, "bob", 0.5, 0.9, "PEPE", 10).await;

        let summary = engine.evaluate(now()).await;
        assert_eq!(summary.rejected, 2);
        assert_eq!(status_of(&store, &neutral).await, SentimentStatus::Rejected);
        assert_eq!(status_of(&store, &unwatched).await, SentimentStatus::Rejected);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_open_failure_keeps_event_analyzing() {
        let mock = Arc::new(MockExchange::new());
        mock.set_price("ETHUSDT", dec!(2000));
        mock.set_failure(Some(crate::error::ExchangeError::Network("reset".into())));
        let store = Arc::new(MemoryStore::new());
        let engine = engine(config(), mock.clone(), store.clone());

        let event = stored_event(&store, "alice", 0.5, 0.8, "ETH", 10).await;
        let summary = engine.evaluate(now()).await;
        assert_eq!(summary.pending, 1);
        assert_eq!(status_of(&store, &event).await, SentimentStatus::Analyzing);

        mock.set_failure(None);
        let summary = engine.evaluate(now()).await;
        assert_eq!(summary.executed, 1);
        assert_eq!(status_of(&store, &event).await, SentimentStatus::Executed);
    }

    #[tokio::test]
    async fn test_close_and_performance() {
        let mock = Arc::new(MockExchange::new());
        mock.set_price("ETHUSDT", dec!(2000));
        let store = Arc::new(MemoryStore::new());
        let engine = engine(config(), mock.clone(), store.clone());

        let position = assert_ok!(
            engine
                .manual_trade("eth", PositionSide::Long, 3, Tier::High, now())
                .await
        );
        mock.set_price("ETHUSDT", dec!(2100));
        let closed = assert_ok!(engine.close_position(&position.id, now()).await);
        assert_eq!(closed.realized_pnl_pct, Some(dec!(0.15)));

        let report = assert_ok!(engine.performance().await);
        assert_eq!(report.total_trades, 1);
        assert_eq!(report.winning_trades, 1);

        let risk = engine.risk_report(now()).await;
        assert_eq!(risk.trades_today, 1);
        assert!(assert_err!(engine.close_position(&position.id, now()).await)
            .to_string()
            .contains("No open position"));
    }
}
