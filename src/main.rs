//! Sentiment-Verified Leveraged Trading Bot
//!
//! Turns social-media sentiment about crypto assets into leveraged futures
//! positions, after three layers of verification and tiered risk control.

mod api;
mod bot;
mod config;
mod db;
mod engine;
mod error;
mod feed;
mod indicators;
mod metrics;
mod models;
mod strategies;
mod trading;
mod verification;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::{BinanceClient, Exchange, HttpSentimentClient, PaperExchange, TimedExchange};
use crate::bot::Bot;
use crate::config::AppConfig;
use crate::db::Database;
use crate::engine::Engine;
use crate::models::{PositionSide, Tier};

/// Sentiment-verified leveraged trading bot CLI.
#[derive(Parser)]
#[command(name = "cryptolev")]
#[command(about = "Trade crypto futures on verified social sentiment", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, default_value = "sqlite:./cryptolev.db?mode=rwc")]
    database: String,

    /// JSON configuration file overriding the defaults
    #[arg(short, long, env = "CRYPTOLEV_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler
    Run {
        /// Send real orders instead of paper fills
        #[arg(long)]
        live: bool,
    },

    /// Run one refresh, evaluation and monitoring cycle now
    Evaluate {
        #[arg(long)]
        live: bool,
    },

    /// List open positions with live PnL
    Positions,

    /// Aggregate performance of closed positions
    Performance,

    /// Open a position manually, bypassing verification
    Trade {
        /// Base coin, e.g. BTC
        #[arg(long)]
        coin: String,

        #[arg(long, value_enum)]
        side: SideArg,

        /// Requested leverage, clamped into the tier's range
        #[arg(long, default_value = "3")]
        leverage: u32,

        /// Risk tier applied to the trade (medium, high, highest)
        #[arg(long, default_value = "high")]
        tier: Tier,

        #[arg(long)]
        live: bool,
    },

    /// Close an open position at market
    Close {
        /// Position ID
        id: String,

        #[arg(long)]
        live: bool,
    },

    /// Analyze one text and store the resulting sentiment event
    Ingest {
        #[arg(long)]
        text: String,

        #[arg(long, default_value = "manual")]
        source: String,

        #[arg(long, default_value = "")]
        author: String,
    },

    /// Show today's risk ledger and circuit breaker state
    Risk,

    /// Show effective configuration (secrets redacted)
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Long,
    Short,
}

impl From<SideArg> for PositionSide {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Long => PositionSide::Long,
            SideArg::Short => PositionSide::Short,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cryptolev={}", cli.log_level.to_lowercase())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            let redacted = serde_json::to_string_pretty(&config.redacted())?;
            println!("{}", redacted);
        }

        Commands::Run { live } => {
            let engine = Arc::new(build_engine(&cli.database, config.clone(), live).await?);
            if !live {
                println!("\nPaper trading: orders are simulated. Pass --live to trade for real.");
            }
            println!("Press Ctrl+C to stop.\n");

            Bot::new(engine, config.scheduler.clone(), !live).run().await?;
        }

        Commands::Evaluate { live } => {
            let engine = build_engine(&cli.database, config, live).await?;
            engine.restore(Utc::now()).await?;
            let report = engine.run_cycle(Utc::now()).await;
            println!("{}", report);
        }

        Commands::Positions => {
            let engine = build_engine(&cli.database, config, false).await?;
            engine.restore(Utc::now()).await?;
            let positions = engine.open_positions().await;

            if positions.is_empty() {
                println!("No open positions.");
                return Ok(());
            }

            println!(
                "\n{:<36} {:<10} {:<6} {:<8} {:>4} {:>12} {:>12} {:>9}",
                "ID", "SYMBOL", "SIDE", "TIER", "LEV", "ENTRY", "PRICE", "PNL%"
            );
            println!("{}", "-".repeat(104));
            for p in positions {
                println!(
                    "{:<36} {:<10} {:<6} {:<8} {:>3}x {:>12} {:>12} {:>8.2}%",
                    p.id,
                    p.symbol,
                    p.side,
                    p.tier,
                    p.leverage,
                    p.entry_price,
                    p.current_price,
                    p.unrealized_pnl_pct * Decimal::ONE_HUNDRED
                );
            }
        }

        Commands::Performance => {
            let engine = build_engine(&cli.database, config, false).await?;
            let report = engine.performance().await?;
            println!("{}", report);
        }

        Commands::Trade {
            coin,
            side,
            leverage,
            tier,
            live,
        } => {
            let engine = build_engine(&cli.database, config, live).await?;
            engine.restore(Utc::now()).await?;

            info!(coin = %coin, tier = %tier, leverage = leverage, live = live, "Manual trade");
            let position = engine
                .manual_trade(&coin, side.into(), leverage, tier, Utc::now())
                .await?;

            println!("\nOpened position {}", position.id);
            println!("  {} {} {}x ({})", position.side, position.symbol, position.leverage, position.tier);
            println!("  Size:        ${:.2}", position.size);
            println!("  Margin:      ${:.2}", position.margin());
            println!("  Quantity:    {}", position.quantity);
            println!("  Entry:       {}", position.entry_price);
            println!("  Stop-loss:   {}", position.stop_loss_price);
            println!("  Take-profit: {}", position.take_profit_price);
        }

        Commands::Close { id, live } => {
            let engine = build_engine(&cli.database, config, live).await?;
            engine.restore(Utc::now()).await?;
            let position = engine.close_position(&id, Utc::now()).await?;

            println!(
                "Closed {} {} at {}: {:.2}% (${:.2})",
                position.symbol,
                position.side,
                position.close_price.unwrap_or_default(),
                position.realized_pnl_pct.unwrap_or_default() * Decimal::ONE_HUNDRED,
                position.realized_pnl.unwrap_or_default()
            );
        }

        Commands::Ingest {
            text,
            source,
            author,
        } => {
            let engine = build_engine(&cli.database, config, false).await?;
            match engine.ingest_text(&text, &source, &author, Utc::now()).await? {
                Some(event) => println!(
                    "Stored event {} (sentiment {:.2}, confidence {:.2}, coins {:?})",
                    event.id, event.sentiment, event.confidence, event.related_coins
                ),
                None => println!("No sentiment event produced."),
            }
        }

        Commands::Risk => {
            let engine = build_engine(&cli.database, config, false).await?;
            engine.restore(Utc::now()).await?;
            let report = engine.risk_report(Utc::now()).await;
            println!("{}", report);
        }
    }

    Ok(())
}

/// Wire collaborators: storage, exchange (paper unless `live`) with a call timeout, and the analyzer.
async fn build_engine(database_url: &str, config: AppConfig, live: bool) -> Result<Engine> {
    let db = Database::new(database_url).await?;

    let client: Arc<dyn Exchange> = Arc::new(BinanceClient::new(&config.exchange)?);
    let exchange: Arc<dyn Exchange> = if live {
        if !config.exchange.has_credentials() {
            anyhow::bail!("Live trading requires BINANCE_API_KEY and BINANCE_API_SECRET");
        }
        client
    } else {
        Arc::new(PaperExchange::new(client, config.exchange.paper_balance))
    };
    let exchange: Arc<dyn Exchange> = Arc::new(TimedExchange::new(
        exchange,
        Duration::from_secs(config.exchange.timeout_secs),
    ));

    let analyzer = Arc::new(
        HttpSentimentClient::new(&config.sentiment).context("Failed to build sentiment client")?,
    );

    Engine::new(config, exchange, analyzer, Arc::new(db), Utc::now())
}
