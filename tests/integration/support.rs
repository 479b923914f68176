//! Shared fixtures for integration tests.
//!
//! Builds a full service (registry, ledger, reported feed, manual clock)
//! and provides ledgers that misbehave on demand.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use wager::clock::{Clock, ManualClock};
use wager::engine::closer::{CloserConfig, CloserScheduler};
use wager::engine::registry::BetRegistry;
use wager::engine::settlement::{SettlementConfig, SettlementEngine};
use wager::feed::reporter::ReportedPriceFeed;
use wager::ledger::memory::InMemoryLedger;
use wager::ledger::{TransferReceipt, ValueLedger};
use wager::types::{AccountId, Amount, BetId, Price, Side};

pub const STAKE: Amount = 1_000;
pub const FUNDING: Amount = 5_000;

pub fn account(name: &str) -> AccountId {
    AccountId::new(name)
}

pub fn price(units: u64) -> Price {
    Price::from_units(units).unwrap()
}

/// Wraps the in-memory ledger, rejecting payouts to blocked accounts and
/// optionally delaying every payout.
pub struct FaultyLedger {
    inner: Arc<InMemoryLedger>,
    blocked: Mutex<HashSet<AccountId>>,
    payout_delay: Mutex<Option<std::time::Duration>>,
}

impl FaultyLedger {
    pub fn new(inner: Arc<InMemoryLedger>) -> Self {
        Self {
            inner,
            blocked: Mutex::new(HashSet::new()),
            payout_delay: Mutex::new(None),
        }
    }

    pub fn block(&self, who: &AccountId) {
        self.blocked.lock().unwrap().insert(who.clone());
    }

    pub fn unblock(&self, who: &AccountId) {
        self.blocked.lock().unwrap().remove(who);
    }

    pub fn delay_payouts(&self, by: std::time::Duration) {
        *self.payout_delay.lock().unwrap() = Some(by);
    }
}

#[async_trait]
impl ValueLedger for FaultyLedger {
    async fn escrow(&self, payer: &AccountId, amount: Amount) -> Result<TransferReceipt> {
        self.inner.escrow(payer, amount).await
    }

    async fn payout(&self, recipient: &AccountId, amount: Amount) -> Result<TransferReceipt> {
        let delay = *self.payout_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.blocked.lock().unwrap().contains(recipient) {
            bail!("Recipient {recipient} rejected the transfer");
        }
        self.inner.payout(recipient, amount).await
    }
}

pub struct Service {
    pub registry: Arc<BetRegistry>,
    pub ledger: Arc<InMemoryLedger>,
    pub faults: Arc<FaultyLedger>,
    pub feed: Arc<ReportedPriceFeed>,
    pub clock: Arc<ManualClock>,
    pub reporter: AccountId,
}

impl Service {
    pub fn new() -> Self {
        Self::with_settlement(SettlementConfig::default())
    }

    pub fn with_settlement(config: SettlementConfig) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let reporter = account("oracle");
        let feed = Arc::new(ReportedPriceFeed::with_initial(
            reporter.clone(),
            price(25_000),
            clock.now(),
        ));
        let ledger = Arc::new(InMemoryLedger::new());
        let faults = Arc::new(FaultyLedger::new(ledger.clone()));
        let registry = Arc::new(BetRegistry::new(
            feed.clone(),
            faults.clone(),
            clock.clone(),
            SettlementEngine::new(config),
        ));
        Self {
            registry,
            ledger,
            faults,
            feed,
            clock,
            reporter,
        }
    }

    pub fn fund(&self, who: &AccountId) {
        self.ledger.mint(who, FUNDING).unwrap();
        self.ledger.approve(who, FUNDING);
    }

    pub fn set_price(&self, units: u64) {
        self.feed
            .report(&self.reporter, price(units), self.clock.now())
            .unwrap();
    }

    /// Open a LONG bet for `a`, joined by `b`, closing in one hour.
    pub async fn active_bet(&self, a: &AccountId, b: &AccountId) -> BetId {
        let now = self.clock.now();
        let id = self
            .registry
            .create_bet(
                a,
                STAKE,
                now + Duration::minutes(10),
                now + Duration::hours(1),
                Side::Long,
            )
            .await
            .unwrap();
        self.registry.join_bet(b, id).await.unwrap();
        id
    }

    pub fn scheduler(&self, close_timeout: std::time::Duration) -> Arc<CloserScheduler> {
        Arc::new(CloserScheduler::new(
            self.registry.clone(),
            self.clock.clone(),
            CloserConfig {
                interval: std::time::Duration::from_millis(20),
                close_timeout,
                identity: account("closer"),
            },
        ))
    }
}
