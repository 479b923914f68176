//! In-process stablecoin ledger.
//!
//! Mirrors an allowance-based token: holders `approve` the service to pull
//! a bounded amount, escrow pulls consume the allowance, and payouts are
//! drawn from the pooled escrow balance. Every accepted transfer is kept
//! in a journal for inspection.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{TransferDirection, TransferReceipt, ValueLedger};
use crate::types::{AccountId, Amount};

#[derive(Debug, Default)]
struct Book {
    balances: HashMap<AccountId, Amount>,
    allowances: HashMap<AccountId, Amount>,
    escrowed: Amount,
    journal: Vec<TransferReceipt>,
}

/// Persistable balances. The journal is not carried across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub balances: HashMap<AccountId, Amount>,
    pub allowances: HashMap<AccountId, Amount>,
    pub escrowed: Amount,
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    book: Mutex<Book>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(snapshot: LedgerSnapshot) -> Self {
        Self {
            book: Mutex::new(Book {
                balances: snapshot.balances,
                allowances: snapshot.allowances,
                escrowed: snapshot.escrowed,
                journal: Vec::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let book = self.book();
        LedgerSnapshot {
            balances: book.balances.clone(),
            allowances: book.allowances.clone(),
            escrowed: book.escrowed,
        }
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Credit new funds to an account.
    pub fn mint(&self, account: &AccountId, amount: Amount) -> Result<()> {
        let mut book = self.book();
        let balance = book.balances.entry(account.clone()).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("Balance overflow for {account}"))?;
        Ok(())
    }

    /// Authorise escrow pulls of up to `amount` from `owner`. Replaces any
    /// previous allowance.
    pub fn approve(&self, owner: &AccountId, amount: Amount) {
        self.book().allowances.insert(owner.clone(), amount);
        debug!(owner = %owner, amount, "Allowance set");
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.book().balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &AccountId) -> Amount {
        self.book().allowances.get(owner).copied().unwrap_or(0)
    }

    /// Total currently held in escrow across all bets.
    pub fn escrow_balance(&self) -> Amount {
        self.book().escrowed
    }

    pub fn journal(&self) -> Vec<TransferReceipt> {
        self.book().journal.clone()
    }

    pub fn payouts(&self) -> Vec<TransferReceipt> {
        self.book()
            .journal
            .iter()
            .filter(|r| r.direction == TransferDirection::Payout)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ValueLedger for InMemoryLedger {
    async fn escrow(&self, payer: &AccountId, amount: Amount) -> Result<TransferReceipt> {
        let mut book = self.book();

        let allowance = book.allowances.get(payer).copied().unwrap_or(0);
        if allowance < amount {
            bail!("Insufficient allowance for {payer}: need {amount}, approved {allowance}");
        }
        let balance = book.balances.get(payer).copied().unwrap_or(0);
        if balance < amount {
            bail!("Insufficient balance for {payer}: need {amount}, have {balance}");
        }
        let escrowed = book
            .escrowed
            .checked_add(amount)
            .ok_or_else(|| anyhow!("Escrow overflow"))?;

        book.balances.insert(payer.clone(), balance - amount);
        book.allowances.insert(payer.clone(), allowance - amount);
        book.escrowed = escrowed;

        let receipt = TransferReceipt::new(payer.clone(), amount, TransferDirection::Escrow);
        book.journal.push(receipt.clone());
        Ok(receipt)
    }

    async fn payout(&self, recipient: &AccountId, amount: Amount) -> Result<TransferReceipt> {
        let mut book = self.book();

        if book.escrowed < amount {
            bail!(
                "Escrow underfunded: need {amount}, holding {}",
                book.escrowed
            );
        }
        let balance = book.balances.get(recipient).copied().unwrap_or(0);
        let credited = balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("Balance overflow for {recipient}"))?;

        book.escrowed -= amount;
        book.balances.insert(recipient.clone(), credited);

        let receipt = TransferReceipt::new(recipient.clone(), amount, TransferDirection::Payout);
        book.journal.push(receipt.clone());
        Ok(receipt)
    }
}
