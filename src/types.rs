//! Shared types for the WAGER service.
//!
//! These types form the data model used across all modules. They are
//! kept free of behaviour that needs I/O so that the registry, the
//! settlement engine and the operator API can all depend on them.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequential bet identifier, assigned from 0 upwards.
pub type BetId = u64;

/// Monetary amount in the ledger's smallest unit (6 decimals).
pub type Amount = u64;

/// Largest stake a single side may put up. The pot (two stakes) must
/// still fit in an `Amount`.
pub const MAX_STAKE: Amount = Amount::MAX / 2;

/// Number of decimal places carried by prices and stablecoin amounts.
pub const PRICE_DECIMALS: u32 = 6;

/// `10^PRICE_DECIMALS`.
pub const PRICE_SCALE: u64 = 1_000_000;

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// An owning identity on the ledger (bettor, closer, reporter).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Price
// ---------------------------------------------------------------------------

/// Reference asset price as fixed-point micro-units (6 decimals).
///
/// Stored as an integer so that persisted and compared prices are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(u64);

impl Price {
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Whole units of the quote currency, e.g. `from_units(25_000)` for $25,000.
    pub fn from_units(units: u64) -> Option<Self> {
        units.checked_mul(PRICE_SCALE).map(Self)
    }

    /// Convert a decimal quote, rounding to 6 places.
    /// Returns `None` for non-positive or out-of-range values.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        if value <= Decimal::ZERO {
            return None;
        }
        let scaled = value
            .round_dp(PRICE_DECIMALS)
            .checked_mul(Decimal::from(PRICE_SCALE))?;
        scaled.to_u64().filter(|m| *m > 0).map(Self)
    }

    pub fn micros(&self) -> u64 {
        self.0
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::from_i128_with_scale(i128::from(self.0), PRICE_DECIMALS)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Directional position. LONG wins when the price rises, SHORT when it falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The side implicitly taken by the joining bettor.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Bet lifecycle. Only ever advances PENDING → ACTIVE → CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Pending,
    Active,
    Closed,
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Pending => write!(f, "PENDING"),
            BetStatus::Active => write!(f, "ACTIVE"),
            BetStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Result of a settled bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Winner(AccountId),
    Draw,
}

impl Outcome {
    pub fn winner(&self) -> Option<&AccountId> {
        match self {
            Outcome::Winner(account) => Some(account),
            Outcome::Draw => None,
        }
    }

    pub fn is_draw(&self) -> bool {
        matches!(self, Outcome::Draw)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Winner(account) => write!(f, "winner {account}"),
            Outcome::Draw => write!(f, "draw"),
        }
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Winnings,
    Refund,
    Fee,
}

/// A single disbursement out of escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub recipient: AccountId,
    pub amount: Amount,
    pub kind: TransferKind,
    /// Set once the ledger has accepted the payout.
    #[serde(default)]
    pub paid: bool,
}

impl Transfer {
    pub fn new(recipient: AccountId, amount: Amount, kind: TransferKind) -> Self {
        Self {
            recipient,
            amount,
            kind,
            paid: false,
        }
    }
}

/// The computed outcome and disbursement plan for one bet.
///
/// Recorded on the bet before any payout is attempted so that an
/// interrupted disbursement resumes with the same transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub outcome: Outcome,
    pub open_price: Price,
    pub close_price: Price,
    pub fee: Amount,
    pub fee_recipient: AccountId,
    pub transfers: Vec<Transfer>,
    pub computed_at: DateTime<Utc>,
}

impl Settlement {
    /// Sum of all transfers. Always equals the pot.
    pub fn total(&self) -> Amount {
        self.transfers.iter().map(|t| t.amount).sum()
    }

    pub fn is_fully_paid(&self) -> bool {
        self.transfers.iter().all(|t| t.paid)
    }

    pub fn unpaid(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.iter().filter(|t| !t.paid)
    }

    /// Amount routed to a given account across all transfers.
    pub fn amount_for(&self, account: &AccountId) -> Amount {
        self.transfers
            .iter()
            .filter(|t| &t.recipient == account)
            .map(|t| t.amount)
            .sum()
    }
}

/// Returned by a successful close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub bet_id: BetId,
    pub outcome: Outcome,
    pub open_price: Price,
    pub close_price: Price,
    pub fee: Amount,
    pub transfers: Vec<Transfer>,
    /// True when this call finished a disbursement started by an earlier attempt.
    pub resumed: bool,
}

impl fmt::Display for SettlementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bet #{}: {} (open={} close={} fee={} transfers={})",
            self.bet_id,
            self.outcome,
            self.open_price,
            self.close_price,
            self.fee,
            self.transfers.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Bet
// ---------------------------------------------------------------------------

/// A two-party directional wager with escrowed stakes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    /// Stake per side.
    pub amount: Amount,
    pub bettor_a: AccountId,
    pub bettor_b: Option<AccountId>,
    /// Side chosen by `bettor_a`.
    pub side: Side,
    pub open_price: Price,
    pub joining_deadline: DateTime<Utc>,
    pub closing_time: DateTime<Utc>,
    pub status: BetStatus,
    pub winner: Option<Outcome>,
    pub created_at: DateTime<Utc>,
    pub joined_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub settlement: Option<Settlement>,
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bet #{} [{}] {} {} stake={} open={} closes={}",
            self.id,
            self.status,
            self.bettor_a,
            self.side,
            self.amount,
            self.open_price,
            self.closing_time.to_rfc3339(),
        )?;
        if let Some(b) = &self.bettor_b {
            write!(f, " vs {b}")?;
        }
        if let Some(outcome) = &self.winner {
            write!(f, " ({outcome})")?;
        }
        Ok(())
    }
}

impl Bet {
    /// A freshly opened bet awaiting a counterparty.
    pub fn open(
        id: BetId,
        bettor_a: AccountId,
        amount: Amount,
        side: Side,
        open_price: Price,
        joining_deadline: DateTime<Utc>,
        closing_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            amount,
            bettor_a,
            bettor_b: None,
            side,
            open_price,
            joining_deadline,
            closing_time,
            status: BetStatus::Pending,
            winner: None,
            created_at,
            joined_at: None,
            closed_at: None,
            settlement: None,
        }
    }

    /// Total escrow once both sides have staked.
    pub fn pot(&self) -> Amount {
        self.amount.saturating_mul(2)
    }

    /// Side held by `bettor_b` (the opposite of the creator's).
    pub fn counter_side(&self) -> Side {
        self.side.opposite()
    }

    /// The bettor holding the given side, if bound.
    pub fn bettor_on(&self, side: Side) -> Option<&AccountId> {
        if side == self.side {
            Some(&self.bettor_a)
        } else {
            self.bettor_b.as_ref()
        }
    }

    pub fn is_joinable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == BetStatus::Pending && now < self.joining_deadline
    }

    /// Whether the autonomous closer should pick this bet up.
    pub fn is_due_for_close(&self, now: DateTime<Utc>) -> bool {
        self.status == BetStatus::Active && self.closing_time < now
    }

    pub fn close_price(&self) -> Option<Price> {
        self.settlement.as_ref().map(|s| s.close_price)
    }

    /// Disbursement computed but not yet fully paid.
    pub fn has_pending_settlement(&self) -> bool {
        self.status != BetStatus::Closed && self.settlement.is_some()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain errors surfaced by the registry and settlement engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WagerError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Bet not found: {0}")]
    NotFound(BetId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Bet {0} has expired")]
    Expired(BetId),

    #[error("Bet {0} is not yet closeable")]
    NotYetCloseable(BetId),

    #[error("Bet {0} is already closed")]
    AlreadyClosed(BetId),

    #[error("Escrow failed: {0}")]
    EscrowFailure(String),

    #[error("Payout failed: {0}")]
    PayoutFailure(String),

    #[error("Price feed error: {0}")]
    PriceFeed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

pub type WagerResult<T> = Result<T, WagerError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
