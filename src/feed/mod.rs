//! Price feed integrations.
//!
//! Defines the `PriceFeed` trait and provides implementations for:
//! - a trusted reporter that pushes observations (the on-chain oracle model)
//! - an HTTP quote endpoint (CoinGecko `simple/price` shape)

pub mod http;
pub mod reporter;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::Price;

/// Source of the latest observed reference asset price.
///
/// The core only ever reads from it; the price is trusted as-is.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest price, positive and scaled to 6 decimals.
    async fn current_price(&self) -> Result<Price>;
}
