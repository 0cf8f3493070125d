//! Database persistence for everything the engine needs to resume after restart:
//! - Sentiment events and their coin index
//! - Verification records per (event, coin)
//! - Positions, open and closed
//! - Processed content ids (feed dedup)
//! - The daily risk ledger

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{
    CloseReason, CombinedSignal, Position, SentimentEvent, SentimentStatus, VerificationRecord,
};
use crate::trading::RiskLedger;

/// Persistence collaborator. Every engine write goes through here.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_event(&self, event: &SentimentEvent) -> Result<()>;
    async fn update_event_status(&self, event_id: &str, status: SentimentStatus) -> Result<()>;
    async fn get_event(&self, event_id: &str) -> Result<Option<SentimentEvent>>;
    async fn events_by_status(&self, status: SentimentStatus) -> Result<Vec<SentimentEvent>>;

    /// Events of any status mentioning one of `coins`, received at or after `since`.
    async fn recent_events_for_coins(
        &self,
        coins: &BTreeSet<String>,
        since: DateTime<Utc>,
    ) -> Result<Vec<SentimentEvent>>;

    /// Insert or replace the record for its (event, coin) pair.
    async fn save_verification(&self, record: &VerificationRecord) -> Result<()>;
    async fn verification_for(&self, event_id: &str, coin: &str) -> Result<Option<VerificationRecord>>;

    async fn insert_position(&self, position: &Position) -> Result<()>;
    async fn update_position(&self, position: &Position) -> Result<()>;
    async fn get_position(&self, id: &str) -> Result<Option<Position>>;
    async fn open_positions(&self) -> Result<Vec<Position>>;
    /// Positions whose exit order may have been sent but whose close was never recorded.
    async fn closing_positions(&self) -> Result<Vec<Position>>;
    /// Closed positions, oldest close first.
    async fn closed_positions(&self) -> Result<Vec<Position>>;

    async fn is_processed(&self, content_id: &str) -> Result<bool>;
    async fn mark_processed(&self, content_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn load_ledger(&self, day: NaiveDate) -> Result<Option<RiskLedger>>;
    async fn save_ledger(&self, ledger: &RiskLedger) -> Result<()>;
}

/// Fixed-width RFC3339 so stored timestamps compare correctly as text.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp: {}", raw))?
        .with_timezone(&Utc))
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    raw.parse()
        .with_context(|| format!("Invalid decimal: {}", raw))
}

/// Stored sentiment event.
#[derive(Debug, Clone, sqlx::FromRow)]
struct EventRow {
    id: String,
    source: String,
    author: String,
    content_excerpt: String,
    sentiment: f64,
    related_coins: String,
    impact_score: f64,
    confidence: f64,
    received_at: String,
    status: String,
}

impl TryFrom<EventRow> for SentimentEvent {
    type Error = anyhow::Error;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(SentimentEvent {
            related_coins: serde_json::from_str(&row.related_coins)
                .context("Invalid related_coins column")?,
            received_at: parse_ts(&row.received_at)?,
            status: row.status.parse()?,
            id: row.id,
            source: row.source,
            author: row.author,
            content_excerpt: row.content_excerpt,
            sentiment: row.sentiment,
            impact_score: row.impact_score,
            confidence: row.confidence,
        })
    }
}

/// Stored verification record.
#[derive(Debug, Clone, sqlx::FromRow)]
struct VerificationRow {
    event_id: String,
    coin: String,
    layer1_passed: bool,
    layer2_passed: bool,
    layer3_passed: bool,
    tier: String,
    approved: bool,
    combined: Option<String>,
    evaluated_at: String,
    finalized_at: Option<String>,
}

impl TryFrom<VerificationRow> for VerificationRecord {
    type Error = anyhow::Error;

    fn try_from(row: VerificationRow) -> Result<Self> {
        let combined = row
            .combined
            .as_deref()
            .map(serde_json::from_str::<CombinedSignal>)
            .transpose()
            .context("Invalid combined signal column")?;

        Ok(VerificationRecord {
            tier: row.tier.parse()?,
            evaluated_at: parse_ts(&row.evaluated_at)?,
            finalized_at: row.finalized_at.as_deref().map(parse_ts).transpose()?,
            combined,
            event_id: row.event_id,
            coin: row.coin,
            layer1_passed: row.layer1_passed,
            layer2_passed: row.layer2_passed,
            layer3_passed: row.layer3_passed,
            approved: row.approved,
        })
    }
}

/// Stored position record. Decimals are kept as text to stay exact.
#[derive(Debug, Clone, sqlx::FromRow)]
struct PositionRow {
    id: String,
    symbol: String,
    side: String,
    size: String,
    quantity: String,
    entry_price: String,
    leverage: i64,
    tier: String,
    stop_loss_price: String,
    take_profit_price: String,
    opened_at: String,
    status: String,
    event_id: Option<String>,
    entry_order_id: String,
    current_price: String,
    unrealized_pnl_pct: String,
    close_price: Option<String>,
    closed_at: Option<String>,
    close_reason: Option<String>,
    realized_pnl_pct: Option<String>,
    realized_pnl: Option<String>,
}

impl TryFrom<PositionRow> for Position {
    type Error = anyhow::Error;

    fn try_from(row: PositionRow) -> Result<Self> {
        let optional = |raw: &Option<String>| raw.as_deref().map(parse_decimal).transpose();

        Ok(Position {
            side: row.side.parse()?,
            size: parse_decimal(&row.size)?,
            quantity: parse_decimal(&row.quantity)?,
            entry_price: parse_decimal(&row.entry_price)?,
            leverage: u32::try_from(row.leverage).context("Invalid leverage column")?,
            tier: row.tier.parse()?,
            stop_loss_price: parse_decimal(&row.stop_loss_price)?,
            take_profit_price: parse_decimal(&row.take_profit_price)?,
            opened_at: parse_ts(&row.opened_at)?,
            status: row.status.parse()?,
            current_price: parse_decimal(&row.current_price)?,
            unrealized_pnl_pct: parse_decimal(&row.unrealized_pnl_pct)?,
            close_price: optional(&row.close_price)?,
            closed_at: row.closed_at.as_deref().map(parse_ts).transpose()?,
            close_reason: row.close_reason.as_deref().map(str::parse::<CloseReason>).transpose()?,
            realized_pnl_pct: optional(&row.realized_pnl_pct)?,
            realized_pnl: optional(&row.realized_pnl)?,
            id: row.id,
            symbol: row.symbol,
            event_id: row.event_id,
            entry_order_id: row.entry_order_id,
        })
    }
}

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    #[cfg(test)]
    /// Private in-memory database. A single connection, since every
    /// connection to `sqlite::memory:` opens a fresh database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Sentiment events
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sentiment_events (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                author TEXT NOT NULL DEFAULT '',
                content_excerpt TEXT NOT NULL DEFAULT '',
                sentiment REAL NOT NULL,
                related_coins TEXT NOT NULL,
                impact_score REAL NOT NULL,
                confidence REAL NOT NULL,
                received_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'analyzing'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Coin index for persistence lookups
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_coins (
                event_id TEXT NOT NULL,
                coin TEXT NOT NULL,
                PRIMARY KEY (event_id, coin),
                FOREIGN KEY (event_id) REFERENCES sentiment_events(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Verification outcomes
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS verification_records (
                event_id TEXT NOT NULL,
                coin TEXT NOT NULL,
                layer1_passed INTEGER NOT NULL,
                layer2_passed INTEGER NOT NULL,
                layer3_passed INTEGER NOT NULL,
                tier TEXT NOT NULL,
                approved INTEGER NOT NULL,
                combined TEXT,
                evaluated_at TEXT NOT NULL,
                finalized_at TEXT,
                PRIMARY KEY (event_id, coin)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Positions
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                quantity TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                leverage INTEGER NOT NULL,
                tier TEXT NOT NULL,
                stop_loss_price TEXT NOT NULL,
                take_profit_price TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                status TEXT NOT NULL,
                event_id TEXT,
                entry_order_id TEXT NOT NULL DEFAULT '',
                current_price TEXT NOT NULL,
                unrealized_pnl_pct TEXT NOT NULL DEFAULT '0',
                close_price TEXT,
                closed_at TEXT,
                close_reason TEXT,
                realized_pnl_pct TEXT,
                realized_pnl TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Feed dedup
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_content (
                content_id TEXT PRIMARY KEY,
                processed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Daily risk ledger
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_ledger (
                day TEXT PRIMARY KEY,
                realized_pnl TEXT NOT NULL,
                trades INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_status ON sentiment_events(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_event_coins_coin ON event_coins(coin)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn write_position(&self, position: &Position, replace: bool) -> Result<()> {
        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
        let sql = format!(
            r#"
            {} INTO positions (
                id, symbol, side, size, quantity, entry_price, leverage, tier,
                stop_loss_price, take_profit_price, opened_at, status, event_id,
                entry_order_id, current_price, unrealized_pnl_pct, close_price,
                closed_at, close_reason, realized_pnl_pct, realized_pnl
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            verb
        );

        sqlx::query(&sql)
            .bind(&position.id)
            .bind(&position.symbol)
            .bind(position.side.as_str())
            .bind(position.size.to_string())
            .bind(position.quantity.to_string())
            .bind(position.entry_price.to_string())
            .bind(i64::from(position.leverage))
            .bind(position.tier.as_str())
            .bind(position.stop_loss_price.to_string())
            .bind(position.take_profit_price.to_string())
            .bind(ts(position.opened_at))
            .bind(position.status.as_str())
            .bind(position.event_id.as_deref())
            .bind(&position.entry_order_id)
            .bind(position.current_price.to_string())
            .bind(position.unrealized_pnl_pct.to_string())
            .bind(position.close_price.map(|p| p.to_string()))
            .bind(position.closed_at.map(ts))
            .bind(position.close_reason.map(|r| r.as_str()))
            .bind(position.realized_pnl_pct.map(|p| p.to_string()))
            .bind(position.realized_pnl.map(|p| p.to_string()))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to write position {}", position.id))?;

        Ok(())
    }

    async fn positions_where(&self, status: &str, order_by: &str) -> Result<Vec<Position>> {
        let sql = format!("SELECT * FROM positions WHERE status = ? ORDER BY {}", order_by);
        let rows = sqlx::query_as::<_, PositionRow>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch positions")?;

        rows.into_iter().map(Position::try_from).collect()
    }
}

#[async_trait]
impl Store for Database {
    // ==================== Sentiment Events ====================

    async fn insert_event(&self, event: &SentimentEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sentiment_events (
                id, source, author, content_excerpt, sentiment, related_coins,
                impact_score, confidence, received_at, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.source)
        .bind(&event.author)
        .bind(&event.content_excerpt)
        .bind(event.sentiment)
        .bind(serde_json::to_string(&event.related_coins)?)
        .bind(event.impact_score)
        .bind(event.confidence)
        .bind(ts(event.received_at))
        .bind(event.status.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to insert sentiment event")?;

        for coin in &event.related_coins {
            sqlx::query("INSERT OR IGNORE INTO event_coins (event_id, coin) VALUES (?, ?)")
                .bind(&event.id)
                .bind(coin)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_event_status(&self, event_id: &str, status: SentimentStatus) -> Result<()> {
        sqlx::query("UPDATE sentiment_events SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<SentimentEvent>> {
        sqlx::query_as::<_, EventRow>("SELECT * FROM sentiment_events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
            .map(SentimentEvent::try_from)
            .transpose()
    }

    async fn events_by_status(&self, status: SentimentStatus) -> Result<Vec<SentimentEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT * FROM sentiment_events WHERE status = ? ORDER BY received_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch sentiment events")?;

        rows.into_iter().map(SentimentEvent::try_from).collect()
    }

    async fn recent_events_for_coins(
        &self,
        coins: &BTreeSet<String>,
        since: DateTime<Utc>,
    ) -> Result<Vec<SentimentEvent>> {
        let mut found: BTreeMap<String, SentimentEvent> = BTreeMap::new();

        for coin in coins {
            let rows = sqlx::query_as::<_, EventRow>(
                r#"
                SELECT e.* FROM sentiment_events e
                JOIN event_coins c ON c.event_id = e.id
                WHERE c.coin = ? AND e.received_at >= ?
                "#,
            )
            .bind(coin)
            .bind(ts(since))
            .fetch_all(&self.pool)
            .await?;

            for row in rows {
                let event = SentimentEvent::try_from(row)?;
                found.entry(event.id.clone()).or_insert(event);
            }
        }

        let mut events: Vec<SentimentEvent> = found.into_values().collect();
        events.sort_by_key(|e| e.received_at);
        Ok(events)
    }

    // ==================== Verification ====================

    async fn save_verification(&self, record: &VerificationRecord) -> Result<()> {
        let combined = record
            .combined
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO verification_records (
                event_id, coin, layer1_passed, layer2_passed, layer3_passed,
                tier, approved, combined, evaluated_at, finalized_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(event_id, coin) DO UPDATE SET
                layer1_passed = excluded.layer1_passed,
                layer2_passed = excluded.layer2_passed,
                layer3_passed = excluded.layer3_passed,
                tier = excluded.tier,
                approved = excluded.approved,
                combined = excluded.combined,
                evaluated_at = excluded.evaluated_at,
                finalized_at = COALESCE(verification_records.finalized_at, excluded.finalized_at)
            "#,
        )
        .bind(&record.event_id)
        .bind(&record.coin)
        .bind(record.layer1_passed)
        .bind(record.layer2_passed)
        .bind(record.layer3_passed)
        .bind(record.tier.as_str())
        .bind(record.approved)
        .bind(combined)
        .bind(ts(record.evaluated_at))
        .bind(record.finalized_at.map(ts))
        .execute(&self.pool)
        .await
        .context("Failed to save verification record")?;

        Ok(())
    }

    async fn verification_for(&self, event_id: &str, coin: &str) -> Result<Option<VerificationRecord>> {
        sqlx::query_as::<_, VerificationRow>(
            "SELECT * FROM verification_records WHERE event_id = ? AND coin = ?",
        )
        .bind(event_id)
        .bind(coin)
        .fetch_optional(&self.pool)
        .await?
        .map(VerificationRecord::try_from)
        .transpose()
    }

    // ==================== Positions ====================

    async fn insert_position(&self, position: &Position) -> Result<()> {
        self.write_position(position, false).await
    }

    async fn update_position(&self, position: &Position) -> Result<()> {
        self.write_position(position, true).await
    }

    async fn get_position(&self, id: &str) -> Result<Option<Position>> {
        sqlx::query_as::<_, PositionRow>("SELECT * FROM positions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Position::try_from)
            .transpose()
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        self.positions_where("open", "opened_at").await
    }

    async fn closing_positions(&self) -> Result<Vec<Position>> {
        self.positions_where("closing", "opened_at").await
    }

    async fn closed_positions(&self) -> Result<Vec<Position>> {
        self.positions_where("closed", "closed_at").await
    }

    // ==================== Processed Content ====================

    async fn is_processed(&self, content_id: &str) -> Result<bool> {
        let result: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM processed_content WHERE content_id = ?")
                .bind(content_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(result.is_some())
    }

    async fn mark_processed(&self, content_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO processed_content (content_id, processed_at) VALUES (?, ?)")
            .bind(content_id)
            .bind(ts(at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Risk Ledger ====================

    async fn load_ledger(&self, day: NaiveDate) -> Result<Option<RiskLedger>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT realized_pnl, trades FROM risk_ledger WHERE day = ?")
                .bind(day.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(pnl, trades)| {
            Ok(RiskLedger::restore(
                day,
                parse_decimal(&pnl)?,
                u32::try_from(trades).unwrap_or(0),
            ))
        })
        .transpose()
    }

    async fn save_ledger(&self, ledger: &RiskLedger) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_ledger (day, realized_pnl, trades, updated_at)
            VALUES (?, ?, ?, datetime('now'))
            ON CONFLICT(day) DO UPDATE SET
                realized_pnl = excluded.realized_pnl,
                trades = excluded.trades,
                updated_at = datetime('now')
            "#,
        )
        .bind(ledger.day().to_string())
        .bind(ledger.realized_pnl().to_string())
        .bind(i64::from(ledger.trades()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PositionSide, PositionStatus, RiskDecision, SentimentAnalysis, Tier};
    use rust_decimal_macros::dec;
    use tokio_test::assert_ok;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn event(coins: &[&str], received_at: DateTime<Utc>) -> SentimentEvent {
        let analysis = SentimentAnalysis {
            sentiment: 0.6,
            coins: coins.iter().map(|c| c.to_string()).collect(),
            impact: 70.0,
            confidence: 0.8,
        };
        SentimentEvent::from_analysis("twitter", "alice", "text", &analysis, received_at).unwrap()
    }

    #[tokio::test]
    async fn test_event_round_trip_and_coin_lookup() {
        let db = assert_ok!(Database::in_memory().await);
        let old = event(&["BTC"], at("2026-03-01T09:00:00Z"));
        let recent = event(&["BTC", "ETH"], at("2026-03-01T11:30:00Z"));
        let other = event(&["DOGE"], at("2026-03-01T11:45:00Z"));
        for e in [&old, &recent, &other] {
            assert_ok!(db.insert_event(e).await);
        }

        let loaded = assert_ok!(db.get_event(&recent.id).await).unwrap();
        assert_eq!(loaded, recent);

        let coins: BTreeSet<String> = ["BTC".to_string(), "ETH".to_string()].into();
        let found = assert_ok!(db.recent_events_for_coins(&coins, at("2026-03-01T11:00:00Z")).await);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, recent.id);

        assert_ok!(db.update_event_status(&old.id, SentimentStatus::Expired).await);
        let analyzing = assert_ok!(db.events_by_status(SentimentStatus::Analyzing).await);
        assert_eq!(analyzing.len(), 2);
    }

    #[tokio::test]
    async fn test_position_lifecycle_persisted() {
        let db = assert_ok!(Database::in_memory().await);
        let decision = RiskDecision {
            tier: Tier::Highest,
            leverage: 8,
            stop_loss_pct: dec!(0.03),
            take_profit_pct: dec!(0.10),
            max_risk_fraction: dec!(0.02),
            confidence_multiplier: dec!(1.0),
        };
        let mut position = Position::open(
            "BTCUSDT".to_string(),
            PositionSide::Long,
            dec!(1600),
            dec!(100),
            &decision,
            "42".to_string(),
            Some("evt".to_string()),
            at("2026-03-01T10:00:00Z"),
        );
        assert_ok!(db.insert_position(&position).await);
        assert_eq!(assert_ok!(db.open_positions().await), vec![position.clone()]);

        position.status = PositionStatus::Closing;
        assert_ok!(db.update_position(&position).await);
        assert!(assert_ok!(db.open_positions().await).is_empty());
        assert_eq!(assert_ok!(db.closing_positions().await), vec![position.clone()]);

        position.close(dec!(97), CloseReason::StopLoss, at("2026-03-01T12:00:00Z"));
        assert_ok!(db.update_position(&position).await);

        assert!(assert_ok!(db.open_positions().await).is_empty());
        assert!(assert_ok!(db.closing_positions().await).is_empty());
        let closed = assert_ok!(db.closed_positions().await);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].realized_pnl_pct, Some(dec!(-0.24)));
        assert_eq!(closed[0].close_reason, Some(CloseReason::StopLoss));
    }

    #[tokio::test]
    async fn test_verification_finalization_sticks() {
        let db = assert_ok!(Database::in_memory().await);
        let mut record = VerificationRecord {
            event_id: "evt".to_string(),
            coin: "BTC".to_string(),
            layer1_passed: true,
            layer2_passed: false,
            layer3_passed: false,
            tier: Tier::Medium,
            approved: true,
            combined: Some(CombinedSignal::neutral()),
            evaluated_at: at("2026-03-01T10:00:00Z"),
            finalized_at: Some(at("2026-03-01T10:00:00Z")),
        };
        assert_ok!(db.save_verification(&record).await);

        record.finalized_at = None;
        record.tier = Tier::High;
        assert_ok!(db.save_verification(&record).await);

        let loaded = assert_ok!(db.verification_for("evt", "BTC").await).unwrap();
        assert_eq!(loaded.tier, Tier::High);
        assert!(loaded.is_finalized());
        assert_eq!(loaded.combined, Some(CombinedSignal::neutral()));
    }

    #[tokio::test]
    async fn test_processed_and_ledger() {
        let db = assert_ok!(Database::in_memory().await);
        let now = at("2026-03-01T10:00:00Z");

        assert!(!assert_ok!(db.is_processed("tweet-1").await));
        assert_ok!(db.mark_processed("tweet-1", now).await);
        assert_ok!(db.mark_processed("tweet-1", now).await);
        assert!(assert_ok!(db.is_processed("tweet-1").await));

        let mut ledger = RiskLedger::new(now);
        ledger.record(dec!(-120.5), now);
        assert_ok!(db.save_ledger(&ledger).await);

        let loaded = assert_ok!(db.load_ledger(now.date_naive()).await).unwrap();
        assert_eq!(loaded.realized_pnl(), dec!(-120.5));
        assert_eq!(loaded.trades(), 1);
        assert!(assert_ok!(db.load_ledger(now.date_naive().succ_opt().unwrap()).await).is_none());
    }
}
