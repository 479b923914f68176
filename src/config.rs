//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::closer::CloserConfig;
use crate::engine::settlement::{DrawPolicy, SettlementConfig, BPS_DENOMINATOR, DEFAULT_FEE_BPS};
use crate::types::{AccountId, Amount, Price};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub settlement: SettlementSection,
    pub closer: CloserSection,
    pub price_feed: PriceFeedConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub state_file: Option<String>,
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

fn default_snapshot_interval() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettlementSection {
    #[serde(default = "default_fee_bps")]
    pub fee_bps: u64,
    #[serde(default)]
    pub draw_policy: DrawPolicy,
}

fn default_fee_bps() -> u64 {
    DEFAULT_FEE_BPS
}

impl Default for SettlementSection {
    fn default() -> Self {
        Self {
            fee_bps: DEFAULT_FEE_BPS,
            draw_policy: DrawPolicy::default(),
        }
    }
}

impl SettlementSection {
    pub fn to_settlement_config(&self) -> SettlementConfig {
        SettlementConfig {
            fee_bps: self.fee_bps,
            draw_policy: self.draw_policy,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CloserSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub close_timeout_secs: u64,
    /// Account credited with the fee of every close the service performs.
    pub identity: String,
}

impl CloserSection {
    pub fn to_closer_config(&self) -> CloserConfig {
        CloserConfig {
            interval: Duration::from_secs(self.interval_secs),
            close_timeout: Duration::from_secs(self.close_timeout_secs),
            identity: AccountId::new(self.identity.clone()),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceFeedKind {
    /// Prices pushed by a trusted reporter account.
    Reported,
    /// Prices pulled from an HTTP quote endpoint.
    Http,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PriceFeedConfig {
    pub kind: PriceFeedKind,
    #[serde(default)]
    pub reporter: Option<String>,
    #[serde(default)]
    pub initial_price: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub vs_currency: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl PriceFeedConfig {
    /// Seed price for a reported feed, if one is configured.
    pub fn initial_price(&self) -> Result<Option<Price>> {
        let Some(raw) = self.initial_price else {
            return Ok(None);
        };
        let decimal = Decimal::try_from(raw)
            .with_context(|| format!("Invalid initial_price: {raw}"))?;
        match Price::from_decimal(decimal) {
            Some(price) => Ok(Some(price)),
            None => bail!("initial_price must be positive, got {raw}"),
        }
    }

    /// API key for the HTTP feed. Missing env vars are not an error; the
    /// public endpoint works without a key.
    pub fn api_key(&self) -> Option<SecretString> {
        self.api_key_env
            .as_deref()
            .and_then(|name| AppConfig::resolve_env(name).ok())
            .map(SecretString::new)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LedgerConfig {
    /// Balances credited to the in-memory ledger at startup.
    #[serde(default)]
    pub accounts: Vec<SeedAccount>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedAccount {
    pub account: String,
    pub balance: Amount,
    #[serde(default)]
    pub allowance: Amount,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to load config file: {path}"))
    }

    /// Parse and validate configuration text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.settlement.fee_bps > BPS_DENOMINATOR {
            bail!(
                "settlement.fee_bps must be at most {BPS_DENOMINATOR}, got {}",
                self.settlement.fee_bps
            );
        }
        if self.closer.enabled {
            if self.closer.interval_secs == 0 {
                bail!("closer.interval_secs must be positive");
            }
            if self.closer.close_timeout_secs == 0 {
                bail!("closer.close_timeout_secs must be positive");
            }
        }
        if self.closer.identity.trim().is_empty() {
            bail!("closer.identity must not be empty");
        }
        match self.price_feed.kind {
            PriceFeedKind::Reported => {
                if self.price_feed.reporter.as_deref().map_or(true, |r| r.trim().is_empty()) {
                    bail!("price_feed.reporter is required for kind = \"reported\"");
                }
                self.price_feed.initial_price()?;
            }
            PriceFeedKind::Http => {
                if self.price_feed.asset.is_none() || self.price_feed.vs_currency.is_none() {
                    bail!("price_feed.asset and price_feed.vs_currency are required for http");
                }
            }
        }
        if self.service.snapshot_interval_secs == 0 {
            bail!("service.snapshot_interval_secs must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
