//! Bet registry. Holds the table of all bets and owns their transitions.
//!
//! Bets are stored densely by id (`0..upper_bound`). Each bet sits behind
//! its own async mutex which is held for the whole of a join or close,
//! including the ledger calls, so transitions on one id are serialized
//! while different ids proceed independently.
//!
//! Every transition also holds the read side of a registry-wide gate.
//! Snapshots take the write side, so a snapshot never observes a transition
//! halfway through its ledger calls.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, RwLock as Gate};
use tracing::{debug, info, warn};

use super::settlement::SettlementEngine;
use crate::clock::Clock;
use crate::feed::PriceFeed;
use crate::ledger::ValueLedger;
use crate::types::{
    AccountId, Amount, Bet, BetId, BetStatus, Price, SettlementResult, Side, WagerError,
    WagerResult, MAX_STAKE,
};

type BetCell = Arc<Mutex<Bet>>;

/// Serializable copy of the whole table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub saved_at: DateTime<Utc>,
    pub bets: Vec<Bet>,
}

pub struct BetRegistry {
    bets: RwLock<Vec<BetCell>>,
    transitions: Gate<()>,
    feed: Arc<dyn PriceFeed>,
    ledger: Arc<dyn ValueLedger>,
    clock: Arc<dyn Clock>,
    engine: SettlementEngine,
}

impl BetRegistry {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        ledger: Arc<dyn ValueLedger>,
        clock: Arc<dyn Clock>,
        engine: SettlementEngine,
    ) -> Self {
        Self {
            bets: RwLock::new(Vec::new()),
            transitions: Gate::new(()),
            feed,
            ledger,
            clock,
            engine,
        }
    }

    /// Rebuild a registry from a snapshot. Ids must be dense and in order.
    pub fn restore(
        snapshot: RegistrySnapshot,
        feed: Arc<dyn PriceFeed>,
        ledger: Arc<dyn ValueLedger>,
        clock: Arc<dyn Clock>,
        engine: SettlementEngine,
    ) -> WagerResult<Self> {
        for (index, bet) in snapshot.bets.iter().enumerate() {
            if bet.id != index as BetId {
                return Err(WagerError::InvalidParameters(format!(
                    "snapshot out of order: bet {} at position {index}",
                    bet.id
                )));
            }
        }
        let cells = snapshot
            .bets
            .into_iter()
            .map(|bet| Arc::new(Mutex::new(bet)))
            .collect();

        Ok(Self {
            bets: RwLock::new(cells),
            transitions: Gate::new(()),
            feed,
            ledger,
            clock,
            engine,
        })
    }

    /// Next id to be assigned; every id below it exists.
    pub fn upper_bound(&self) -> BetId {
        self.bets.read().unwrap_or_else(PoisonError::into_inner).len() as BetId
    }

    fn cell(&self, bet_id: BetId) -> WagerResult<BetCell> {
        let bets = self.bets.read().unwrap_or_else(PoisonError::into_inner);
        let cell = usize::try_from(bet_id)
            .ok()
            .and_then(|i| bets.get(i))
            .cloned();
        cell.ok_or(WagerError::NotFound(bet_id))
    }

    fn cells(&self) -> Vec<BetCell> {
        self.bets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // -- Create -------------------------------------------------------------

    /// Open a new bet: capture the open price, then escrow the creator's stake.
    /// A feed failure rejects the bet before any funds move.
    pub async fn create_bet(
        &self,
        caller: &AccountId,
        amount: Amount,
        joining_deadline: DateTime<Utc>,
        closing_time: DateTime<Utc>,
        side: Side,
    ) -> WagerResult<BetId> {
        let now = self.clock.now();

        if amount == 0 {
            return Err(WagerError::InvalidParameters(
                "amount must be positive".to_string(),
            ));
        }
        if amount > MAX_STAKE {
            return Err(WagerError::InvalidParameters(format!(
                "amount exceeds maximum stake of {MAX_STAKE}"
            )));
        }
        if joining_deadline >= closing_time {
            return Err(WagerError::InvalidParameters(
                "joining deadline must be before closing time".to_string(),
            ));
        }
        if joining_deadline <= now {
            return Err(WagerError::InvalidParameters(
                "joining deadline is already in the past".to_string(),
            ));
        }

        let _gate = self.transitions.read().await;
        let open_price = self.read_price().await?;

        self.ledger
            .escrow(caller, amount)
            .await
            .map_err(|e| WagerError::EscrowFailure(format!("{e:#}")))?;

        let bet_id = {
            let mut bets = self.bets.write().unwrap_or_else(PoisonError::into_inner);
            let bet_id = bets.len() as BetId;
            bets.push(Arc::new(Mutex::new(Bet::open(
                bet_id,
                caller.clone(),
                amount,
                side,
                open_price,
                joining_deadline,
                closing_time,
                now,
            ))));
            bet_id
        };

        info!(
            bet_id,
            bettor = %caller,
            amount,
            side = %side,
            open_price = %open_price,
            closing_time = %closing_time.to_rfc3339(),
            "Bet created"
        );
        Ok(bet_id)
    }

    async fn read_price(&self) -> WagerResult<Price> {
        let price = self
            .feed
            .current_price()
            .await
            .map_err(|e| WagerError::PriceFeed(format!("{e:#}")))?;
        if !price.is_positive() {
            return Err(WagerError::PriceFeed(format!(
                "feed returned a non-positive price: {price}"
            )));
        }
        Ok(price)
    }

    // -- Join ---------------------------------------------------------------

    /// Take the opposite side of a pending bet.
    pub async fn join_bet(&self, caller: &AccountId, bet_id: BetId) -> WagerResult<()> {
        let _gate = self.transitions.read().await;
        let cell = self.cell(bet_id)?;
        let mut bet = cell.lock().await;

        if bet.status != BetStatus::Pending {
            return Err(WagerError::InvalidState(format!("bet {bet_id} is not pending")));
        }
        let now = self.clock.now();
        if !bet.is_joinable_at(now) {
            return Err(WagerError::Expired(bet_id));
        }
        if caller == &bet.bettor_a {
            return Err(WagerError::InvalidParameters(
                "cannot join your own bet".to_string(),
            ));
        }

        self.ledger
            .escrow(caller, bet.amount)
            .await
            .map_err(|e| WagerError::EscrowFailure(format!("{e:#}")))?;

        bet.bettor_b = Some(caller.clone());
        bet.status = BetStatus::Active;
        bet.joined_at = Some(now);

        info!(
            bet_id,
            bettor = %caller,
            side = %bet.counter_side(),
            amount = bet.amount,
            "Bet joined"
        );
        Ok(())
    }

    // -- Read ---------------------------------------------------------------

    pub async fn get_bet(&self, bet_id: BetId) -> WagerResult<Bet> {
        let cell = self.cell(bet_id)?;
        let bet = cell.lock().await;
        Ok(bet.clone())
    }

    /// Non-blocking read. `Ok(None)` means another operation currently holds
    /// the bet (a join or close in flight).
    pub fn try_get_bet(&self, bet_id: BetId) -> WagerResult<Option<Bet>> {
        let cell = self.cell(bet_id)?;
        let bet = cell.try_lock().ok().map(|bet| bet.clone());
        Ok(bet)
    }

    pub async fn list_bets(&self) -> Vec<Bet> {
        join_all(
            self.cells()
                .into_iter()
                .map(|cell| async move {
                    let bet = cell.lock().await;
                    bet.clone()
                }),
        )
        .await
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let (snapshot, ()) = self.snapshot_with(|| ()).await;
        snapshot
    }

    /// Snapshot the table and run `also` while no create, join or close is
    /// in flight. Used to read ledger balances consistent with the bets.
    pub async fn snapshot_with<T>(&self, also: impl FnOnce() -> T) -> (RegistrySnapshot, T) {
        let _gate = self.transitions.write().await;
        let snapshot = RegistrySnapshot {
            saved_at: self.clock.now(),
            bets: self.list_bets().await,
        };
        (snapshot, also())
    }

    // -- Close --------------------------------------------------------------

    /// Settle a bet and disburse its escrow. `caller` receives the fee.
    ///
    /// The computed settlement is recorded on the bet before any payout. If
    /// a payout fails the bet stays ACTIVE with the paid transfers marked,
    /// and the next close resumes the remaining ones without re-pricing.
    pub async fn close_bet(
        &self,
        caller: &AccountId,
        bet_id: BetId,
    ) -> WagerResult<SettlementResult> {
        let _gate = self.transitions.read().await;
        let cell = self.cell(bet_id)?;
        let mut bet = cell.lock().await;
        let now = self.clock.now();

        let resumed = bet.has_pending_settlement();
        if resumed {
            warn!(bet_id, "Resuming partially paid settlement");
        } else {
            self.engine.ensure_closeable(&bet, now)?;
            let close_price = self.read_price().await?;
            let settlement = self.engine.close(&bet, close_price, now, caller)?;
            debug!(
                bet_id,
                outcome = %settlement.outcome,
                close_price = %close_price,
                fee = settlement.fee,
                "Settlement computed"
            );
            bet.settlement = Some(settlement);
        }

        let settlement = {
            let Some(settlement) = bet.settlement.as_mut() else {
                return Err(WagerError::InvalidState(format!(
                    "bet {bet_id} has no settlement"
                )));
            };
            for transfer in settlement.transfers.iter_mut().filter(|t| !t.paid) {
                self.ledger
                    .payout(&transfer.recipient, transfer.amount)
                    .await
                    .map_err(|e| {
                        WagerError::PayoutFailure(format!(
                            "bet {bet_id}: {} to {}: {e:#}",
                            transfer.amount, transfer.recipient
                        ))
                    })?;
                transfer.paid = true;
            }
            settlement.clone()
        };

        bet.status = BetStatus::Closed;
        bet.winner = Some(settlement.outcome.clone());
        bet.closed_at = Some(now);

        let result = SettlementResult {
            bet_id,
            outcome: settlement.outcome,
            open_price: settlement.open_price,
            close_price: settlement.close_price,
            fee: settlement.fee,
            transfers: settlement.transfers,
            resumed,
        };
        info!(
            bet_id,
            outcome = %result.outcome,
            open_price = %result.open_price,
            close_price = %result.close_price,
            fee = result.fee,
            draw = result.outcome.is_draw(),
            triggered_by = %caller,
            "Bet closed"
        );
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
