//! In-memory collaborators for unit and scenario tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::api::{Exchange, OrderFill, SentimentAnalyzer};
use crate::db::Store;
use crate::error::ExchangeError;
use crate::models::{
    MarketSeries, OrderSide, Position, PositionStatus, SentimentAnalysis, SentimentEvent,
    SentimentStatus, VerificationRecord,
};
use crate::trading::RiskLedger;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
}

#[derive(Default)]
struct MockState {
    prices: HashMap<String, Decimal>,
    klines: HashMap<String, MarketSeries>,
    balance: Decimal,
    delay: Duration,
    /// Extra delay on order submission only
    order_delay: Duration,
    /// Returned by every call while set
    failure: Option<ExchangeError>,
    /// Symbols whose price lookups fail
    broken_symbols: HashSet<String>,
    orders: Vec<RecordedOrder>,
    leverage: Vec<(String, u32)>,
    next_order_id: u64,
}

/// Scripted exchange. Calls sleep for the configured delay before acting, so
/// a call dropped by a timeout has no effect.
pub struct MockExchange {
    state: Mutex<MockState>,
    calls: AtomicUsize,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                balance: Decimal::new(10000, 0),
                next_order_id: 1,
                ..Default::default()
            }),
            calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state().prices.insert(symbol.to_string(), price);
    }

    pub fn set_klines(&self, series: MarketSeries) {
        self.state().klines.insert(series.symbol().to_string(), series);
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.state().balance = balance;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    pub fn set_order_delay(&self, delay: Duration) {
        self.state().order_delay = delay;
    }

    pub fn set_failure(&self, failure: Option<ExchangeError>) {
        self.state().failure = failure;
    }

    pub fn break_symbol(&self, symbol: &str) {
        self.state().broken_symbols.insert(symbol.to_string());
    }

    pub fn orders(&self) -> Vec<RecordedOrder> {
        self.state().orders.clone()
    }

    pub fn leverage_calls(&self) -> Vec<(String, u32)> {
        self.state().leverage.clone()
    }

    /// Every call received, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> Result<(), ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = self.state().failure.clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn price_of(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let state = self.state();
        if state.broken_symbols.contains(symbol) {
            return Err(ExchangeError::Network(format!("{} unavailable", symbol)));
        }
        state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("no price for {}", symbol)))
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.begin().await?;
        self.price_of(symbol)
    }

    async fn get_balance(&self) -> Result<Decimal, ExchangeError> {
        self.begin().await?;
        Ok(self.state().balance)
    }

    async fn get_klines(
        &self,
        symbol: &str,
        _interval: &str,
        _limit: u32,
    ) -> Result<MarketSeries, ExchangeError> {
        self.begin().await?;
        self.state()
            .klines
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("no klines for {}", symbol)))
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderFill, ExchangeError> {
        self.begin().await?;
        let delay = self.state().order_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let price = self.price_of(symbol)?;

        let mut state = self.state();
        state.orders.push(RecordedOrder {
            symbol: symbol.to_string(),
            side,
            quantity,
        });
        let order_id = state.next_order_id;
        state.next_order_id += 1;

        Ok(OrderFill {
            order_id: order_id.to_string(),
            avg_price: Some(price),
            executed_qty: Some(quantity),
        })
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.begin().await?;
        self.state().leverage.push((symbol.to_string(), leverage));
        Ok(())
    }
}

/// Analyzer returning canned readings keyed by exact text.
#[derive(Default)]
pub struct MockAnalyzer {
    responses: Mutex<HashMap<String, SentimentAnalysis>>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, text: &str, analysis: SentimentAnalysis) {
        self.responses
            .lock()
            .unwrap()
            .insert(text.to_string(), analysis);
    }
}

#[async_trait]
impl SentimentAnalyzer for MockAnalyzer {
    async fn analyze(&self, text: &str, _source: &str, _author: &str) -> Result<SentimentAnalysis> {
        self.responses
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("analyzer unavailable"))
    }
}

#[derive(Default)]
struct MemoryState {
    events: HashMap<String, SentimentEvent>,
    verifications: BTreeMap<(String, String), VerificationRecord>,
    positions: HashMap<String, Position>,
    processed: HashSet<String>,
    ledgers: BTreeMap<NaiveDate, RiskLedger>,
    /// `update_position` fails for positions in these states
    failing_updates: HashSet<PositionStatus>,
}

/// Store backed by plain maps.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    /// Make `update_position` fail for positions in `statuses`; an empty slice heals it.
    pub fn fail_position_updates(&self, statuses: &[PositionStatus]) {
        self.state().failing_updates = statuses.iter().copied().collect();
    }

    fn positions_with(&self, status: PositionStatus) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .state()
            .positions
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        positions.sort_by_key(|p| (p.closed_at, p.opened_at));
        positions
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_event(&self, event: &SentimentEvent) -> Result<()> {
        self.state().events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn update_event_status(&self, event_id: &str, status: SentimentStatus) -> Result<()> {
        if let Some(event) = self.state().events.get_mut(event_id) {
            event.status = status;
        }
        Ok(())
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<SentimentEvent>> {
        Ok(self.state().events.get(event_id).cloned())
    }

    async fn events_by_status(&self, status: SentimentStatus) -> Result<Vec<SentimentEvent>> {
        let mut events: Vec<SentimentEvent> = self
            .state()
            .events
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.received_at);
        Ok(events)
    }

    async fn recent_events_for_coins(
        &self,
        coins: &BTreeSet<String>,
        since: DateTime<Utc>,
    ) -> Result<Vec<SentimentEvent>> {
        let mut events: Vec<SentimentEvent> = self
            .state()
            .events
            .values()
            .filter(|e| e.received_at >= since && !e.related_coins.is_disjoint(coins))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.received_at);
        Ok(events)
    }

    async fn save_verification(&self, record: &VerificationRecord) -> Result<()> {
        let mut state = self.state();
        let key = (record.event_id.clone(), record.coin.clone());
        let finalized_at = state
            .verifications
            .get(&key)
            .and_then(|r| r.finalized_at)
            .or(record.finalized_at);
        let mut record = record.clone();
        record.finalized_at = finalized_at;
        state.verifications.insert(key, record);
        Ok(())
    }

    async fn verification_for(&self, event_id: &str, coin: &str) -> Result<Option<VerificationRecord>> {
        Ok(self
            .state()
            .verifications
            .get(&(event_id.to_string(), coin.to_string()))
            .cloned())
    }

    async fn insert_position(&self, position: &Position) -> Result<()> {
        let mut state = self.state();
        if state.positions.contains_key(&position.id) {
            anyhow::bail!("duplicate position id {}", position.id);
        }
        state.positions.insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<()> {
        let mut state = self.state();
        if state.failing_updates.contains(&position.status) {
            anyhow::bail!("database is locked");
        }
        state.positions.insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn get_position(&self, id: &str) -> Result<Option<Position>> {
        Ok(self.state().positions.get(id).cloned())
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions_with(PositionStatus::Open))
    }

    async fn closing_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions_with(PositionStatus::Closing))
    }

    async fn closed_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions_with(PositionStatus::Closed))
    }

    async fn is_processed(&self, content_id: &str) -> Result<bool> {
        Ok(self.state().processed.contains(content_id))
    }

    async fn mark_processed(&self, content_id: &str, _at: DateTime<Utc>) -> Result<()> {
        self.state().processed.insert(content_id.to_string());
        Ok(())
    }

    async fn load_ledger(&self, day: NaiveDate) -> Result<Option<RiskLedger>> {
        Ok(self
            .state()
            .ledgers
            .get(&day)
            .map(|l| RiskLedger::restore(l.day(), l.realized_pnl(), l.trades())))
    }

    async fn save_ledger(&self, ledger: &RiskLedger) -> Result<()> {
        self.state().ledgers.insert(ledger.day(), ledger.clone());
        Ok(())
    }
}
