//! Content inbox: scraped items dropped as JSON files, turned into sentiment events.
//!
//! Each `*.json` file in the inbox holds an array of content items. Items
//! already in the processed-id set, or published too long ago, are skipped.
//! The rest go through the sentiment analyzer. A file whose items are all
//! settled is renamed to `*.done`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::api::SentimentAnalyzer;
use crate::config::FeedConfig;
use crate::db::Store;
use crate::models::{ContentItem, SentimentEvent};

/// Counts from one pass over the inbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files: usize,
    pub items: usize,
    /// Already processed or too old
    pub skipped: usize,
    /// Turned into stored events
    pub stored: usize,
    /// Analyzer answered but the reading was unusable
    pub discarded: usize,
    /// Analyzer unavailable; retried on the next pass
    pub failed: usize,
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "files={} items={} skipped={} stored={} discarded={} failed={}",
            self.files, self.items, self.skipped, self.stored, self.discarded, self.failed
        )
    }
}

/// What became of one analyzed text.
#[derive(Debug)]
enum Analyzed {
    Stored(SentimentEvent),
    Discarded,
    Unavailable,
}

pub struct ContentFeed {
    inbox: PathBuf,
    max_age: Duration,
    analyzer: Arc<dyn SentimentAnalyzer>,
    store: Arc<dyn Store>,
}

impl ContentFeed {
    pub fn new(config: &FeedConfig, analyzer: Arc<dyn SentimentAnalyzer>, store: Arc<dyn Store>) -> Self {
        Self {
            inbox: PathBuf::from(&config.inbox_dir),
            max_age: Duration::minutes(config.max_content_age_mins),
            analyzer,
            store,
        }
    }

    /// Process every pending inbox file. A missing inbox directory is not an error.
    pub async fn ingest_inbox(&self, now: DateTime<Utc>) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();

        let mut entries = match tokio::fs::read_dir(&self.inbox).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(inbox = %self.inbox.display(), "Inbox does not exist, nothing to ingest");
                return Ok(summary);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read inbox {}", self.inbox.display()))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("Failed to list inbox")? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        for path in files {
            summary.files += 1;
            if let Err(e) = self.ingest_file(&path, now, &mut summary).await {
                warn!(file = %path.display(), error = %e, "Skipping inbox file");
            }
        }

        if summary.items > 0 {
            info!(summary = %summary, "Inbox ingested");
        }
        Ok(summary)
    }

    async fn ingest_file(&self, path: &Path, now: DateTime<Utc>, summary: &mut IngestSummary) -> Result<()> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let items: Vec<ContentItem> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let mut pending = 0;
        for item in &items {
            summary.items += 1;

            if now - item.published_at > self.max_age {
                debug!(content_id = %item.id, published_at = %item.published_at, "Content too old");
                summary.skipped += 1;
                continue;
            }
            if self.store.is_processed(&item.id).await? {
                summary.skipped += 1;
                continue;
            }

            match self.analyze(&item.content, &item.source, &item.author, now).await? {
                Analyzed::Stored(_) => summary.stored += 1,
                Analyzed::Discarded => summary.discarded += 1,
                Analyzed::Unavailable => {
                    summary.failed += 1;
                    pending += 1;
                    continue;
                }
            }
            self.store.mark_processed(&item.id, now).await?;
        }

        if pending == 0 {
            let done = path.with_extension("done");
            tokio::fs::rename(path, &done)
                .await
                .with_context(|| format!("Failed to archive {}", path.display()))?;
            debug!(file = %done.display(), "Inbox file archived");
        }

        Ok(())
    }

    /// Analyze a single text and store the resulting event, if any.
    pub async fn ingest_text(
        &self,
        text: &str,
        source: &str,
        author: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SentimentEvent>> {
        match self.analyze(text, source, author, now).await? {
            Analyzed::Stored(event) => Ok(Some(event)),
            Analyzed::Discarded | Analyzed::Unavailable => Ok(None),
        }
    }

    /// Analyzer failures and invalid readings mean "no event". Only storage errors propagate.
    async fn analyze(&self, text: &str, source: &str, author: &str, now: DateTime<Utc>) -> Result<Analyzed> {
        let analysis = match self.analyzer.analyze(text, source, author).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(source = %source, author = %author, error = %e, "Sentiment analysis failed");
                return Ok(Analyzed::Unavailable);
            }
        };

        let event = match SentimentEvent::from_analysis(source, author, text, &analysis, now) {
            Ok(event) => event,
            Err(e) => {
                debug!(source = %source, author = %author, error = %e, "Discarding sentiment reading");
                return Ok(Analyzed::Discarded);
            }
        };

        self.store
            .insert_event(&event)
            .await
            .context("Failed to store sentiment event")?;

        info!(
            event_id = %event.id,
            source = %event.source,
            author = %event.author,
            coins = ?event.related_coins,
            sentiment = event.sentiment,
            confidence = event.confidence,
            "Sentiment event stored"
        );
        Ok(Analyzed::Stored(event))
    }
}
