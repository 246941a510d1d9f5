//! Shared types for the WAGERBOOK ledger.
//!
//! These types form the data model used across all modules: accounts and
//! their audit trail, bets and wagers, activity windows and reward records.
//! They are kept free of storage concerns beyond the `sqlx` derives so that
//! the ledger, wager, and activity modules can share them without cycles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque platform user id.
pub type AccountId = i64;
/// Row id of a bet.
pub type BetId = i64;
/// Opaque community (guild) id.
pub type CommunityId = i64;
/// Opaque channel id within a community.
pub type ChannelId = i64;

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A user's point account. Balance is authoritative only in conjunction with
/// the transaction log; the counters are a cached view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub account_id: AccountId,
    pub display_name: String,
    pub balance: i64,
    pub bets_placed: i64,
    pub bets_won: i64,
    pub amount_won: i64,
    pub amount_lost: i64,
    pub last_daily_claim: Option<DateTime<Utc>>,
    pub last_bailout_claim: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) balance={} bets={} won={}",
            self.display_name, self.account_id, self.balance, self.bets_placed, self.bets_won,
        )
    }
}

impl Account {
    /// The cached counters as a stats view.
    pub fn stats(&self) -> AccountStats {
        AccountStats {
            bets_placed: self.bets_placed,
            bets_won: self.bets_won,
            amount_won: self.amount_won,
            amount_lost: self.amount_lost,
        }
    }
}

/// Betting statistics derived from wagers and the audit log.
///
/// `amount_lost` is the sum of all stakes ever placed, including stakes later
/// refunded or still pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStats {
    pub bets_placed: i64,
    pub bets_won: i64,
    pub amount_won: i64,
    pub amount_lost: i64,
}

impl AccountStats {
    /// Win percentage rounded to one decimal place.
    pub fn win_rate(&self) -> f64 {
        let rate = self.bets_won as f64 / self.bets_placed.max(1) as f64 * 100.0;
        (rate * 10.0).round() / 10.0
    }

    pub fn net_profit(&self) -> i64 {
        self.amount_won - self.amount_lost
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Category of an audit-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransactionKind {
    WagerPlaced,
    WagerWon,
    WagerLost,
    WagerRefunded,
    DailyBonus,
    Bailout,
    AdminAdjustment,
    ActivityReward,
}

impl TransactionKind {
    pub const ALL: &'static [TransactionKind] = &[
        TransactionKind::WagerPlaced,
        TransactionKind::WagerWon,
        TransactionKind::WagerLost,
        TransactionKind::WagerRefunded,
        TransactionKind::DailyBonus,
        TransactionKind::Bailout,
        TransactionKind::AdminAdjustment,
        TransactionKind::ActivityReward,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::WagerPlaced => "wager_placed",
            TransactionKind::WagerWon => "wager_won",
            TransactionKind::WagerLost => "wager_lost",
            TransactionKind::WagerRefunded => "wager_refunded",
            TransactionKind::DailyBonus => "daily_bonus",
            TransactionKind::Bailout => "bailout",
            TransactionKind::AdminAdjustment => "admin_adjustment",
            TransactionKind::ActivityReward => "activity_reward",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| LedgerError::Serialization(format!("unknown transaction kind: {s}")))
    }
}

/// Immutable audit record of one balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub transaction_id: i64,
    pub account_id: AccountId,
    pub amount: i64,
    pub kind: TransactionKind,
    pub reference_id: Option<BetId>,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {:+} ({} -> {})",
            self.transaction_id, self.kind, self.amount, self.balance_before, self.balance_after,
        )
    }
}

/// Stored balance versus the balance replayed from the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceAudit {
    pub account_id: AccountId,
    pub stored: i64,
    pub replayed: i64,
}

impl BalanceAudit {
    pub fn is_consistent(&self) -> bool {
        self.stored == self.replayed
    }
}

/// Why a bonus or bailout claim was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ClaimDenial {
    Cooldown { next_eligible_at: DateTime<Utc> },
    BalanceNotZero { balance: i64 },
}

/// Result of a daily-bonus or bailout claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClaimOutcome {
    pub granted: bool,
    pub amount: i64,
    pub denial: Option<ClaimDenial>,
}

impl ClaimOutcome {
    pub fn granted(amount: i64) -> Self {
        Self { granted: true, amount, denial: None }
    }

    pub fn denied(denial: ClaimDenial) -> Self {
        Self { granted: false, amount: 0, denial: Some(denial) }
    }
}

// ---------------------------------------------------------------------------
// Bets and wagers
// ---------------------------------------------------------------------------

/// Bet lifecycle: `open -> locked -> {resolved, cancelled}`, with `open` able
/// to skip straight to either terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BetStatus {
    Open,
    Locked,
    Resolved,
    Cancelled,
}

impl BetStatus {
    /// Resolution and cancellation are valid from open and locked.
    pub fn is_settleable(&self) -> bool {
        matches!(self, BetStatus::Open | BetStatus::Locked)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BetStatus::Resolved | BetStatus::Cancelled)
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Open => write!(f, "open"),
            BetStatus::Locked => write!(f, "locked"),
            BetStatus::Resolved => write!(f, "resolved"),
            BetStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A user-created proposition with 2–5 mutually exclusive options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bet {
    pub bet_id: BetId,
    pub creator_id: AccountId,
    pub title: String,
    pub description: Option<String>,
    #[sqlx(json)]
    pub options: Vec<String>,
    pub total_pool: i64,
    pub status: BetStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub winning_option: Option<String>,
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bet #{} '{}' [{}] pool={} ({})",
            self.bet_id,
            self.title,
            self.options.join(" / "),
            self.total_pool,
            self.status,
        )
    }
}

impl Bet {
    /// The bet's own spelling of `option`, matched case-insensitively.
    pub fn canonical_option(&self, option: &str) -> Option<&str> {
        let wanted = normalize_option(option);
        self.options
            .iter()
            .find(|o| normalize_option(o) == wanted)
            .map(String::as_str)
    }
}

/// Case-normalisation used for option matching and uniqueness.
pub fn normalize_option(option: &str) -> String {
    option.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
    Refunded,
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerStatus::Pending => write!(f, "pending"),
            WagerStatus::Won => write!(f, "won"),
            WagerStatus::Lost => write!(f, "lost"),
            WagerStatus::Refunded => write!(f, "refunded"),
        }
    }
}

/// One account's stake on one option of one bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wager {
    pub wager_id: i64,
    pub account_id: AccountId,
    pub bet_id: BetId,
    pub option_chosen: String,
    pub amount: i64,
    /// Amount credited back at settlement (0 while pending or lost).
    pub payout: i64,
    pub status: WagerStatus,
    pub created_at: DateTime<Utc>,
}

/// A single credit made when a bet is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub account_id: AccountId,
    pub stake: i64,
    pub payout: i64,
    pub kind: TransactionKind,
}

impl Payout {
    pub fn profit(&self) -> i64 {
        self.payout - self.stake
    }
}

/// Outcome of `WagerEngine::resolve_bet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub bet_id: BetId,
    pub winning_option: String,
    pub winner_count: usize,
    pub loser_count: usize,
    pub total_pool: i64,
    pub payouts: Vec<Payout>,
    /// Points left undistributed by floor division.
    pub rounding_loss: i64,
}

/// Outcome of `WagerEngine::cancel_bet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReport {
    pub bet_id: BetId,
    pub refunded_count: usize,
    pub total_refunded: i64,
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Per (account, community, hour) message aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityWindow {
    pub account_id: AccountId,
    pub community_id: CommunityId,
    pub channel_id: ChannelId,
    /// Start of the hour, as unix seconds.
    pub hour_bucket: i64,
    pub message_count: i64,
    /// Messages in this hour already converted to points.
    pub messages_rewarded: i64,
    pub last_message_at: DateTime<Utc>,
}

/// Messages paid for and points credited by reward runs over one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRewardRecord {
    pub account_id: AccountId,
    pub community_id: CommunityId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub messages_counted: i64,
    pub points_awarded: i64,
    pub bonus_multiplier: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// Why `record_message` did or did not count a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Counted { hour_count: i64 },
    Disabled,
    TooShort,
    ExcludedChannel,
    Cooldown,
    HourlyCapReached,
}

impl IngestOutcome {
    pub fn is_counted(&self) -> bool {
        matches!(self, IngestOutcome::Counted { .. })
    }
}

/// Summary of one batch-reward run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRunReport {
    pub accounts_processed: usize,
    pub communities_processed: usize,
    pub total_points_awarded: i64,
}

/// Trailing-window activity summary for one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityStats {
    pub days: i64,
    pub total_points_earned: i64,
    pub total_messages: i64,
    pub reward_periods: i64,
    pub average_points_per_day: f64,
    pub average_messages_per_day: f64,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Every failure the ledger can report. Validation and precondition variants
/// are rejected before any state change; `Storage` leaves state untouched.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Bet not found: {0}")]
    BetNotFound(BetId),

    #[error("Invalid amount: {0} (must be positive)")]
    InvalidAmount(i64),

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: i64, available: i64 },

    #[error("Invalid bet: {0}")]
    InvalidBet(String),

    #[error("Invalid option '{option}' for bet {bet_id}")]
    InvalidOption { bet_id: BetId, option: String },

    #[error("Bet {bet_id} is not open (status: {status})")]
    BetNotOpen { bet_id: BetId, status: BetStatus },

    #[error("Bet {bet_id} cannot be settled (status: {status})")]
    BetNotResolvable { bet_id: BetId, status: BetStatus },

    #[error("Account {account_id} already has a wager on bet {bet_id}")]
    AlreadyWagered { account_id: AccountId, bet_id: BetId },

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),
}

impl LedgerError {
    /// Only commit failures are safe to retry; nothing was applied.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
