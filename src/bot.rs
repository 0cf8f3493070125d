//! Bot runner: three independent periodic tasks over one shared engine.
//!
//! Handles:
//! - Refreshing market data, equity and the content inbox
//! - Verifying sentiment events and executing approved trades
//! - Monitoring open positions for stop-loss and take-profit exits
//!
//! A failing run is logged by the engine and the next tick proceeds normally.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::engine::Engine;

/// Scheduler over a shared [`Engine`].
pub struct Bot {
    engine: Arc<Engine>,
    config: SchedulerConfig,
    dry_run: bool,
}

impl Bot {
    pub fn new(engine: Arc<Engine>, config: SchedulerConfig, dry_run: bool) -> Self {
        Self {
            engine,
            config,
            dry_run,
        }
    }

    /// Restore persisted state and run until ctrl-c.
    pub async fn run(&self) -> Result<()> {
        let restored = self
            .engine
            .restore(Utc::now())
            .await
            .context("Failed to restore state")?;

        info!(
            dry_run = self.dry_run,
            restored_positions = restored,
            refresh_secs = self.config.refresh_interval_secs,
            evaluation_secs = self.config.evaluation_interval_secs,
            monitor_secs = self.config.monitor_interval_secs,
            "Starting bot"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
            shutdown_tx.send(true).ok();
        });

        self.run_until(shutdown_rx).await
    }

    /// Run the three tasks until `shutdown` turns true.
    pub async fn run_until(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let engine = self.engine.clone();
        let refresh = spawn_periodic(
            "refresh",
            self.config.refresh_interval_secs,
            shutdown.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    engine.refresh(Utc::now()).await;
                }
            },
        );

        let engine = self.engine.clone();
        let evaluation = spawn_periodic(
            "evaluation",
            self.config.evaluation_interval_secs,
            shutdown.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    engine.evaluate(Utc::now()).await;
                }
            },
        );

        let engine = self.engine.clone();
        let monitor = spawn_periodic(
            "monitor",
            self.config.monitor_interval_secs,
            shutdown,
            move || {
                let engine = engine.clone();
                async move {
                    engine.monitor(Utc::now()).await;
                }
            },
        );

        let names = ["refresh", "evaluation", "monitor"];
        let results = join_all([refresh, evaluation, monitor]).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                error!(task = name, error = %e, "Scheduler task aborted");
            }
        }

        info!("Bot shutdown complete");
        Ok(())
    }
}

/// Run `job` every `period_secs` until shutdown. Ticks missed while a run is
/// in progress are skipped rather than bunched up.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period_secs: u64,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(period_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!(task = name, "Tick");
                    job().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!(task = name, "Task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_ticks_until_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = runs.clone();
        let handle = spawn_periodic("test", 10, rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // first tick fires immediately, then one per period
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_independently() {
        let fast = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        // a slow job on one task does not hold back another
        let slow = spawn_periodic("slow", 60, rx.clone(), || async {
            tokio::time::sleep(Duration::from_secs(1000)).await;
        });
        let counter = fast.clone();
        let quick = spawn_periodic("quick", 5, rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(22)).await;
        assert_eq!(fast.load(Ordering::SeqCst), 5);

        tx.send(true).unwrap();
        quick.await.unwrap();
        slow.abort();
    }
}
