//! HTTP quote feed.
//!
//! Reads the reference asset price from a CoinGecko-compatible
//! `simple/price` endpoint.
//!
//! API: `{base}/simple/price?ids={asset}&vs_currencies={vs}`
//! Response: `{ "<asset>": { "<vs>": 64250.12 } }`
//! Auth: optional key sent in the `x-cg-pro-api-key` header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use tracing::debug;

use super::PriceFeed;
use crate::types::Price;

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

const API_KEY_HEADER: &str = "x-cg-pro-api-key";

type QuoteResponse = HashMap<String, HashMap<String, Decimal>>;

pub struct HttpPriceFeed {
    http: Client,
    base_url: String,
    asset: String,
    vs_currency: String,
    api_key: Option<SecretString>,
}

impl HttpPriceFeed {
    pub fn new(
        base_url: Option<String>,
        asset: String,
        vs_currency: String,
        api_key: Option<SecretString>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("WAGER/0.1.0")
            .build()
            .context("Failed to build price feed HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            asset,
            vs_currency,
            api_key,
        })
    }

    fn quote_url(&self) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.asset),
            urlencoding::encode(&self.vs_currency),
        )
    }

    /// Pull `asset`/`vs_currency` out of a quote body.
    fn parse_quote(body: &str, asset: &str, vs_currency: &str) -> Result<Price> {
        let quotes: QuoteResponse =
            serde_json::from_str(body).context("Failed to parse price quote")?;

        let value = quotes
            .get(asset)
            .and_then(|q| q.get(vs_currency))
            .copied()
            .with_context(|| format!("Quote missing {asset}/{vs_currency}"))?;

        Price::from_decimal(value).with_context(|| {
            format!("Quote for {asset}/{vs_currency} is not a positive price: {value}")
        })
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn current_price(&self) -> Result<Price> {
        let url = self.quote_url();
        let mut req = self.http.get(&url);
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key.expose_secret().as_str());
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Price request failed for {}", self.asset))?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Price API error for {}: {status}", self.asset);
        }

        let body = resp
            .text()
            .await
            .context("Failed to read price response body")?;
        let price = Self::parse_quote(&body, &self.asset, &self.vs_currency)?;

        debug!(asset = %self.asset, price = %price, "Fetched price");
        Ok(price)
    }
}
