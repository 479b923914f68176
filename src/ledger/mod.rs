//! Value ledger integration.
//!
//! Defines the `ValueLedger` trait the registry uses to move stakes into
//! escrow and disburse settlements, plus an in-process implementation.
//! All amounts are exact integers in the stablecoin's smallest unit.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AccountId, Amount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Payer → escrow.
    Escrow,
    /// Escrow → recipient.
    Payout,
}

/// Confirmation of a transfer accepted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub id: Uuid,
    pub account: AccountId,
    pub amount: Amount,
    pub direction: TransferDirection,
    pub timestamp: DateTime<Utc>,
}

impl TransferReceipt {
    pub fn new(account: AccountId, amount: Amount, direction: TransferDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            account,
            amount,
            direction,
            timestamp: Utc::now(),
        }
    }
}

/// Custodian of stablecoin balances.
///
/// `escrow` pulls a pre-authorised amount from the payer into escrow;
/// `payout` pushes an amount from escrow to the recipient. Either may be
/// rejected (insufficient authorisation, balance, or escrow).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ValueLedger: Send + Sync {
    async fn escrow(&self, payer: &AccountId, amount: Amount) -> Result<TransferReceipt>;

    async fn payout(&self, recipient: &AccountId, amount: Amount) -> Result<TransferReceipt>;
}
