//! Reporter-driven price feed.
//!
//! A single trusted reporter identity pushes price observations; every
//! read returns the most recent one. Reports from any other identity are
//! rejected.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use tracing::info;

use super::PriceFeed;
use crate::types::{AccountId, Price, WagerError, WagerResult};

/// The most recent accepted observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceReport {
    pub price: Price,
    pub reported_at: DateTime<Utc>,
}

pub struct ReportedPriceFeed {
    reporter: AccountId,
    latest: RwLock<Option<PriceReport>>,
}

impl ReportedPriceFeed {
    pub fn new(reporter: AccountId) -> Self {
        Self {
            reporter,
            latest: RwLock::new(None),
        }
    }

    /// Start with a seeded observation (e.g. from config).
    pub fn with_initial(reporter: AccountId, price: Price, at: DateTime<Utc>) -> Self {
        Self {
            reporter,
            latest: RwLock::new(Some(PriceReport {
                price,
                reported_at: at,
            })),
        }
    }

    pub fn reporter(&self) -> &AccountId {
        &self.reporter
    }

    /// Accept a new observation from the trusted reporter.
    pub fn report(&self, caller: &AccountId, price: Price, at: DateTime<Utc>) -> WagerResult<()> {
        if caller != &self.reporter {
            return Err(WagerError::Unauthorized(format!(
                "{caller} is not the price reporter"
            )));
        }
        if !price.is_positive() {
            return Err(WagerError::InvalidParameters(
                "price must be positive".to_string(),
            ));
        }

        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(PriceReport {
            price,
            reported_at: at,
        });
        info!(reporter = %caller, price = %price, "Price reported");
        Ok(())
    }

    pub fn latest(&self) -> Option<PriceReport> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PriceFeed for ReportedPriceFeed {
    async fn current_price(&self) -> Result<Price> {
        match self.latest() {
            Some(report) => Ok(report.price),
            None => bail!("No price has been reported yet"),
        }
    }
}
