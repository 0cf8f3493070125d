//! Client for the external sentiment analysis service.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::types::SentimentRequest;
use crate::config::SentimentConfig;
use crate::models::SentimentAnalysis;

/// Turns free text into a sentiment reading.
#[async_trait]
pub trait SentimentAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str, source: &str, author: &str) -> Result<SentimentAnalysis>;
}

/// HTTP analyzer: POSTs `{text, source, author}` and expects
/// `{sentiment, coins, impact, confidence}` back.
pub struct HttpSentimentClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpSentimentClient {
    pub fn new(config: &SentimentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl SentimentAnalyzer for HttpSentimentClient {
    async fn analyze(&self, text: &str, source: &str, author: &str) -> Result<SentimentAnalysis> {
        debug!(url = %self.api_url, source = %source, chars = text.len(), "Requesting sentiment");

        let mut request = self
            .client
            .post(&self.api_url)
            .json(&SentimentRequest { text, source, author });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Failed to reach sentiment service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Sentiment API error {}: {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse sentiment response")
    }
}
