//! Position lifecycle: sizing, opening, supervision and closing of leveraged positions.
//!
//! The position book is locked only for bookkeeping. Exchange and storage
//! calls run outside the lock, while the symbol being opened or the position
//! being priced or closed is marked in flight so no other run touches it.
//!
//! A close is recorded as `closing` before the exit order is sent. A row left
//! in that state is never put back under supervision by [`PositionManager::restore`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{PositionSizer, RiskLedger, RiskManager, RiskReport};
use crate::api::Exchange;
use crate::config::ExchangeConfig;
use crate::db::Store;
use crate::error::{ExchangeError, OpenError, Rejection};
use crate::models::{CloseReason, Position, PositionSide, PositionStatus, Tier};

/// What to open.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub symbol: String,
    pub side: PositionSide,
    pub tier: Tier,
    pub requested_leverage: u32,
    /// Originating sentiment event, `None` for manual trades
    pub event_id: Option<String>,
}

/// Outcome counts of one supervision run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    pub checked: usize,
    pub closed: usize,
    pub failed: usize,
}

impl fmt::Display for MonitorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked={} closed={} failed={}",
            self.checked, self.closed, self.failed
        )
    }
}

#[derive(Debug, Default)]
struct Book {
    open: HashMap<String, Position>,
    /// Symbols with an entry order in flight
    opening: HashSet<String>,
    /// Position ids currently being priced or closed
    busy: HashSet<String>,
    /// Closed on the exchange, not yet recorded in storage
    unsaved: Vec<Position>,
}

pub struct PositionManager {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn Store>,
    risk: RiskManager,
    sizer: PositionSizer,
    exchange_config: ExchangeConfig,
    max_open_positions: usize,

    book: Mutex<Book>,
    ledger: Mutex<RiskLedger>,
    equity: RwLock<Decimal>,
}

impl PositionManager {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn Store>,
        risk: RiskManager,
        sizer: PositionSizer,
        exchange_config: ExchangeConfig,
        max_open_positions: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange,
            store,
            risk,
            sizer,
            exchange_config,
            max_open_positions,
            book: Mutex::new(Book::default()),
            ledger: Mutex::new(RiskLedger::new(now)),
            equity: RwLock::new(Decimal::ZERO),
        }
    }

    /// Reload open positions and today's ledger from storage.
    pub async fn restore(&self, now: DateTime<Utc>) -> Result<usize> {
        let open = self.store.open_positions().await?;
        let count = open.len();

        for stranded in self.store.closing_positions().await? {
            warn!(
                position_id = %stranded.id,
                symbol = %stranded.symbol,
                side = %stranded.side,
                quantity = %stranded.quantity,
                "Position was mid-close at shutdown, left unsupervised; check it on the exchange"
            );
        }

        let mut book = self.book.lock().await;
        book.open.clear();
        book.open.extend(open.into_iter().map(|p| (p.id.clone(), p)));
        drop(book);

        if let Some(ledger) = self.store.load_ledger(now.date_naive()).await? {
            info!(
                day = %ledger.day(),
                daily_pnl = %ledger.realized_pnl().round_dp(2),
                trades = ledger.trades(),
                "Restored risk ledger"
            );
            *self.ledger.lock().await = ledger;
        }

        info!(open_positions = count, "Restored positions");
        Ok(count)
    }

    /// Fetch account equity and cache it.
    pub async fn refresh_equity(&self) -> Result<Decimal, ExchangeError> {
        let balance = self.exchange.get_balance().await?;
        *self.equity.write().await = balance;
        debug!(equity = %balance, "Equity refreshed");
        Ok(balance)
    }

    pub async fn equity(&self) -> Decimal {
        *self.equity.read().await
    }

    async fn equity_or_fetch(&self) -> Result<Decimal, ExchangeError> {
        let cached = self.equity().await;
        if cached > Decimal::ZERO {
            return Ok(cached);
        }
        self.refresh_equity().await
    }

    /// Snapshot of open positions, oldest first.
    pub async fn open_positions(&self) -> Vec<Position> {
        let mut open: Vec<Position> = self.book.lock().await.open.values().cloned().collect();
        open.sort_by_key(|p| p.opened_at);
        open
    }

    pub async fn open_count(&self) -> usize {
        self.book.lock().await.open.len()
    }

    /// Size and open a position.
    ///
    /// Capacity and risk refusals return before any order is sent. Exchange
    /// failures while opening leave no position behind.
    pub async fn open(&self, request: OpenRequest, now: DateTime<Utc>) -> Result<Position, OpenError> {
        self.reserve(&request).await?;
        let symbol = request.symbol.clone();
        let result = self.execute_open(request, now).await;

        let mut book = self.book.lock().await;
        book.opening.remove(&symbol);
        let position = result?;
        book.open.insert(position.id.clone(), position.clone());
        drop(book);

        // Tracked in memory either way; the next monitor run rewrites the row.
        self.store
            .insert_position(&position)
            .await
            .map_err(OpenError::Storage)?;

        Ok(position)
    }

    /// Claim a slot for `request.symbol`. Entries in flight count against capacity.
    async fn reserve(&self, request: &OpenRequest) -> Result<(), OpenError> {
        let mut book = self.book.lock().await;

        let taken = book.open.len() + book.opening.len();
        if taken >= self.max_open_positions {
            return Err(Rejection::MaxOpenPositions {
                open: taken,
                max: self.max_open_positions,
            }
            .into());
        }
        if book.opening.contains(&request.symbol)
            || book.open.values().any(|p| p.symbol == request.symbol)
        {
            return Err(Rejection::DuplicatePosition(request.symbol.clone()).into());
        }
        if request.tier == Tier::Low {
            return Err(Rejection::LowTier.into());
        }

        book.opening.insert(request.symbol.clone());
        Ok(())
    }

    async fn execute_open(&self, request: OpenRequest, now: DateTime<Utc>) -> Result<Position, OpenError> {
        // Sizing
        let equity = self.equity_or_fetch().await?;
        let decision = {
            let mut ledger = self.ledger.lock().await;
            ledger.roll(now);
            self.risk
                .assess(request.tier, request.requested_leverage, &request.symbol, &ledger, equity)?
        };

        let price = self.exchange.get_price(&request.symbol).await?;
        let size = self.sizer.calculate_size(equity, &decision);
        let precision = self.exchange_config.precision_for(&request.symbol);
        let quantity = self.sizer.quantity(size, price, precision);
        if quantity.is_zero() {
            return Err(Rejection::ZeroSize.into());
        }

        // Opening
        self.exchange
            .set_leverage(&request.symbol, decision.leverage)
            .await?;
        let fill = self
            .exchange
            .submit_market_order(&request.symbol, request.side.entry_order(), quantity)
            .await?;

        let entry_price = fill.avg_price.unwrap_or(price);
        let mut position = Position::open(
            request.symbol,
            request.side,
            size,
            entry_price,
            &decision,
            fill.order_id,
            request.event_id,
            now,
        );
        position.quantity = fill.executed_qty.unwrap_or(quantity);

        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            side = %position.side,
            tier = %position.tier,
            leverage = position.leverage,
            size = %position.size.round_dp(2),
            quantity = %position.quantity,
            entry = %position.entry_price,
            stop_loss = %position.stop_loss_price,
            take_profit = %position.take_profit_price,
            "Opened position"
        );

        Ok(position)
    }

    /// Reprice every open position and close those whose stop or target was hit.
    ///
    /// Failures are isolated per position: a position whose price or close
    /// call fails stays open for the next run.
    pub async fn monitor(&self, now: DateTime<Utc>) -> MonitorSummary {
        self.flush_unsaved().await;
        let mut summary = MonitorSummary::default();

        for mut position in self.claim_open().await {
            summary.checked += 1;
            self.supervise(&mut position, now, &mut summary).await;
            self.release(position).await;
        }

        summary
    }

    async fn supervise(&self, position: &mut Position, now: DateTime<Utc>, summary: &mut MonitorSummary) {
        let price = match self.exchange.get_price(&position.symbol).await {
            Ok(price) => price,
            Err(e) => {
                warn!(position_id = %position.id, symbol = %position.symbol, error = %e, "Price refresh failed");
                summary.failed += 1;
                return;
            }
        };

        position.update_price(price);
        debug!(
            position_id = %position.id,
            symbol = %position.symbol,
            price = %price,
            pnl_pct = %(position.unrealized_pnl_pct * Decimal::ONE_HUNDRED).round_dp(2),
            "Position repriced"
        );

        match position.exit_trigger(price) {
            Some(reason) => match self.close_position(position, price, reason, now).await {
                Ok(()) => summary.closed += 1,
                Err(e) => {
                    warn!(position_id = %position.id, reason = %reason, error = %e, "Close failed, retrying next tick");
                    summary.failed += 1;
                }
            },
            None => {
                if let Err(e) = self.store.update_position(position).await {
                    error!(position_id = %position.id, error = %e, "Failed to persist position price");
                }
            }
        }
    }

    /// Mark every idle open position busy and hand out copies, ordered by id.
    async fn claim_open(&self) -> Vec<Position> {
        let mut book = self.book.lock().await;
        let mut ids: Vec<String> = book
            .open
            .keys()
            .filter(|id| !book.busy.contains(*id))
            .cloned()
            .collect();
        ids.sort();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(position) = book.open.get(&id).cloned() {
                book.busy.insert(id);
                claimed.push(position);
            }
        }
        claimed
    }

    /// Hand a claimed position back: still open replaces the book entry, otherwise it leaves.
    async fn release(&self, position: Position) {
        let mut book = self.book.lock().await;
        book.busy.remove(&position.id);
        if position.is_open() {
            book.open.insert(position.id.clone(), position);
        } else {
            book.open.remove(&position.id);
        }
    }

    /// Retry storage of positions already closed on the exchange.
    async fn flush_unsaved(&self) {
        let pending = std::mem::take(&mut self.book.lock().await.unsaved);
        if pending.is_empty() {
            return;
        }

        let mut failed = Vec::new();
        for position in pending {
            match self.store.update_position(&position).await {
                Ok(()) => info!(position_id = %position.id, "Recorded closed position"),
                Err(e) => {
                    warn!(position_id = %position.id, error = %e, "Closed position still unrecorded");
                    failed.push(position);
                }
            }
        }
        self.book.lock().await.unsaved.extend(failed);
    }

    /// Close an open position at market with `close_reason = manual`.
    pub async fn close_manual(&self, id: &str, now: DateTime<Utc>) -> Result<Position> {
        let mut position = {
            let mut book = self.book.lock().await;
            let Some(position) = book.open.get(id).cloned() else {
                bail!("No open position with id {}", id);
            };
            if !book.busy.insert(id.to_string()) {
                bail!("Position {} is being supervised, try again", id);
            }
            position
        };

        let result = match self.exchange.get_price(&position.symbol).await {
            Ok(price) => self
                .close_position(&mut position, price, CloseReason::Manual, now)
                .await,
            Err(e) => Err(e.into()),
        };
        self.release(position.clone()).await;

        result?;
        Ok(position)
    }

    /// Record the intent, send the offsetting order, then record the close and
    /// update the ledger. On failure the position is left open.
    async fn close_position(
        &self,
        position: &mut Position,
        price: Decimal,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Result<()> {
        position.status = PositionStatus::Closing;
        if let Err(e) = self.store.update_position(position).await {
            position.status = PositionStatus::Open;
            return Err(e.context("Failed to record closing intent, no order sent"));
        }

        let fill = match self
            .exchange
            .submit_market_order(&position.symbol, position.side.exit_order(), position.quantity)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                position.status = PositionStatus::Open;
                if let Err(store_err) = self.store.update_position(position).await {
                    error!(position_id = %position.id, error = %store_err, "Failed to reopen position row");
                }
                return Err(e.into());
            }
        };

        let close_price = fill.avg_price.unwrap_or(price);
        position.close(close_price, reason, now);

        let realized = position.realized_pnl.unwrap_or(Decimal::ZERO);
        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            reason = %reason,
            close_price = %close_price,
            pnl_pct = %(position.realized_pnl_pct.unwrap_or(Decimal::ZERO) * Decimal::ONE_HUNDRED).round_dp(2),
            pnl = %realized.round_dp(2),
            "Closed position"
        );

        let equity = self.equity().await;
        let mut ledger = self.ledger.lock().await;
        ledger.record(realized, now);
        self.risk.warn_if_near_limit(&mut ledger, equity);

        if let Err(e) = self.store.update_position(position).await {
            error!(position_id = %position.id, error = %e, "Failed to persist closed position, retrying next tick");
            self.book.lock().await.unsaved.push(position.clone());
        }
        if let Err(e) = self.store.save_ledger(&ledger).await {
            error!(day = %ledger.day(), error = %e, "Failed to persist risk ledger");
        }

        Ok(())
    }

    /// Today's breaker status.
    pub async fn risk_report(&self, now: DateTime<Utc>) -> RiskReport {
        let equity = self.equity().await;
        let mut ledger = self.ledger.lock().await;
        ledger.roll(now);
        self.risk.report(&ledger, equity)
    }
}
