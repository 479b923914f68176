//! Settlement engine: winner rule and fee-adjusted payout math.
//!
//! Pure functions: given an active bet, the close price, the current time
//! and the caller who triggered the close, compute the outcome and the
//! exact set of transfers out of escrow. Executing them is the registry's
//! job.
//!
//! Winner rule: `delta = close - open`; up → LONG wins, down → SHORT wins,
//! unchanged → draw.
//!
//! Fee rule: `fee = pot × fee_bps / 10_000` goes to the closer. On a draw
//! the `DrawPolicy` decides whether the fee is still charged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::{
    AccountId, Amount, Bet, BetStatus, Outcome, Price, Settlement, Side, Transfer, TransferKind,
    WagerError, WagerResult,
};

pub const BPS_DENOMINATOR: u64 = 10_000;

/// 2% of the pot.
pub const DEFAULT_FEE_BPS: u64 = 200;

/// How a draw is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawPolicy {
    /// The fee is still charged, split evenly between both bettors.
    #[default]
    SplitFee,
    /// Both stakes are refunded in full; the closer earns nothing.
    NoFee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementConfig {
    pub fee_bps: u64,
    pub draw_policy: DrawPolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            fee_bps: DEFAULT_FEE_BPS,
            draw_policy: DrawPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettlementEngine {
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(config: SettlementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// `amount × fee_bps / 10_000`, rounded down. Never exceeds `amount`.
    pub fn fee_on(&self, amount: Amount) -> Amount {
        let bps = self.config.fee_bps.min(BPS_DENOMINATOR);
        let fee = u128::from(amount) * u128::from(bps) / u128::from(BPS_DENOMINATOR);
        // fee <= amount, so it always fits
        fee as Amount
    }

    /// Which side, if any, the price move favours.
    pub fn winning_side(open: Price, close: Price) -> Option<Side> {
        match close.cmp(&open) {
            Ordering::Greater => Some(Side::Long),
            Ordering::Less => Some(Side::Short),
            Ordering::Equal => None,
        }
    }

    /// Lifecycle and time checks for a close attempt, in the order callers
    /// observe them: already closed, not active, too early.
    pub fn ensure_closeable(&self, bet: &Bet, now: DateTime<Utc>) -> WagerResult<()> {
        match bet.status {
            BetStatus::Closed => return Err(WagerError::AlreadyClosed(bet.id)),
            BetStatus::Pending => {
                return Err(WagerError::InvalidState(format!(
                    "bet {} is not active",
                    bet.id
                )))
            }
            BetStatus::Active => {}
        }
        if now < bet.closing_time {
            return Err(WagerError::NotYetCloseable(bet.id));
        }
        Ok(())
    }

    /// Compute the outcome and transfers for closing `bet` at `close_price`.
    pub fn close(
        &self,
        bet: &Bet,
        close_price: Price,
        now: DateTime<Utc>,
        fee_recipient: &AccountId,
    ) -> WagerResult<Settlement> {
        self.ensure_closeable(bet, now)?;

        let counterparty = bet.bettor_b.clone().ok_or_else(|| {
            WagerError::InvalidState(format!("bet {} has no counterparty", bet.id))
        })?;

        let pot = bet.pot();
        let (outcome, fee, mut transfers) = match Self::winning_side(bet.open_price, close_price) {
            Some(side) => {
                let winner = if side == bet.side {
                    bet.bettor_a.clone()
                } else {
                    counterparty
                };
                let fee = self.fee_on(pot);
                let transfers = vec![
                    Transfer::new(winner.clone(), pot - fee, TransferKind::Winnings),
                    Transfer::new(fee_recipient.clone(), fee, TransferKind::Fee),
                ];
                (Outcome::Winner(winner), fee, transfers)
            }
            None => {
                let share = match self.config.draw_policy {
                    DrawPolicy::SplitFee => self.fee_on(bet.amount),
                    DrawPolicy::NoFee => 0,
                };
                let refund = bet.amount - share;
                let fee = share * 2;
                let transfers = vec![
                    Transfer::new(bet.bettor_a.clone(), refund, TransferKind::Refund),
                    Transfer::new(counterparty, refund, TransferKind::Refund),
                    Transfer::new(fee_recipient.clone(), fee, TransferKind::Fee),
                ];
                (Outcome::Draw, fee, transfers)
            }
        };
        transfers.retain(|t| t.amount > 0);

        Ok(Settlement {
            outcome,
            open_price: bet.open_price,
            close_price,
            fee,
            fee_recipient: fee_recipient.clone(),
            transfers,
            computed_at: now,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
