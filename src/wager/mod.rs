//! Wager engine: bet lifecycle, wager placement, and settlement.
//!
//! Bets move `open -> locked -> {resolved, cancelled}` (or straight from open
//! to either terminal state). Placement, resolution, and cancellation each
//! run as one atomic unit together with the ledger entries they cause, so a
//! failure part-way through leaves the bet settleable and nobody paid; a
//! retry cannot double-pay.

pub mod payout;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::ledger::AccountLedger;
use crate::notify::{notify, EventSink, LedgerEvent};
use crate::types::{
    normalize_option, AccountId, Bet, BetId, BetStatus, CancellationReport, LedgerError,
    LedgerResult, Payout, ResolutionReport, TransactionKind, Wager, WagerStatus,
};
use payout::settle;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 5;

/// One of an account's wagers on a bet that has not been settled yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OpenWager {
    pub bet_id: BetId,
    pub title: String,
    pub bet_status: BetStatus,
    pub option_chosen: String,
    pub amount: i64,
}

pub struct WagerEngine {
    ledger: Arc<AccountLedger>,
    sink: Arc<dyn EventSink>,
}

impl WagerEngine {
    pub fn new(ledger: Arc<AccountLedger>, sink: Arc<dyn EventSink>) -> Self {
        Self { ledger, sink }
    }

    pub fn ledger(&self) -> &Arc<AccountLedger> {
        &self.ledger
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Create an open bet with 2–5 options, unique ignoring case.
    pub async fn create_bet(
        &self,
        creator_id: AccountId,
        title: &str,
        options: &[String],
        description: Option<&str>,
    ) -> LedgerResult<Bet> {
        let title = title.trim();
        if title.is_empty() {
            return Err(LedgerError::InvalidBet("title must not be empty".into()));
        }
        let options = validate_options(options)?;
        let description = description.map(str::trim).filter(|d| !d.is_empty());
        let now = self.ledger.now();

        let mut unit = self.ledger.store().begin_write().await?;
        let result = sqlx::query(
            "INSERT INTO bets (creator_id, title, description, options, total_pool, status, created_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(creator_id)
        .bind(title)
        .bind(description)
        .bind(serde_json::to_string(&options)?)
        .bind(BetStatus::Open)
        .bind(now)
        .execute(unit.conn())
        .await?;
        let bet = require_bet(unit.conn(), result.last_insert_rowid()).await?;
        unit.commit().await?;

        info!(bet_id = bet.bet_id, creator_id, title = %bet.title, "Bet created");
        notify(&self.sink, LedgerEvent::BetCreated { bet: bet.clone() }).await;
        Ok(bet)
    }

    /// Stop accepting wagers. Only an open bet can be locked.
    pub async fn lock_bet(&self, bet_id: BetId) -> LedgerResult<Bet> {
        let mut unit = self.ledger.store().begin_write().await?;
        let mut bet = require_bet(unit.conn(), bet_id).await?;
        if bet.status != BetStatus::Open {
            return Err(LedgerError::BetNotOpen { bet_id, status: bet.status });
        }
        set_status(unit.conn(), bet_id, BetStatus::Locked, None, None).await?;
        unit.commit().await?;

        info!(bet_id, "Bet locked");
        notify(
            &self.sink,
            LedgerEvent::BetStatusChanged { bet_id, from: BetStatus::Open, to: BetStatus::Locked },
        )
        .await;
        bet.status = BetStatus::Locked;
        Ok(bet)
    }

    /// Stake `amount` on `option`. The debit, the wager row, and the pool
    /// increment commit together or not at all.
    pub async fn place_wager(
        &self,
        account_id: AccountId,
        bet_id: BetId,
        option: &str,
        amount: i64,
    ) -> LedgerResult<Wager> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut unit = self.ledger.store().begin_write().await?;
        let bet = require_bet(unit.conn(), bet_id).await?;
        if bet.status != BetStatus::Open {
            return Err(LedgerError::BetNotOpen { bet_id, status: bet.status });
        }
        let chosen = bet
            .canonical_option(option)
            .ok_or_else(|| LedgerError::InvalidOption { bet_id, option: option.to_string() })?
            .to_string();

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT wager_id FROM wagers WHERE account_id = ? AND bet_id = ?")
                .bind(account_id)
                .bind(bet_id)
                .fetch_optional(unit.conn())
                .await?;
        if existing.is_some() {
            return Err(LedgerError::AlreadyWagered { account_id, bet_id });
        }

        let description = format!("Wager on '{}' - {chosen}", bet.title);
        let tx = self
            .ledger
            .debit_in(
                &mut unit,
                account_id,
                amount,
                TransactionKind::WagerPlaced,
                Some(bet_id),
                Some(description.as_str()),
            )
            .await?;

        let result = sqlx::query(
            "INSERT INTO wagers (account_id, bet_id, option_chosen, amount, payout, status, created_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(account_id)
        .bind(bet_id)
        .bind(&chosen)
        .bind(amount)
        .bind(WagerStatus::Pending)
        .bind(tx.created_at)
        .execute(unit.conn())
        .await?;

        sqlx::query("UPDATE bets SET total_pool = total_pool + ? WHERE bet_id = ?")
            .bind(amount)
            .bind(bet_id)
            .execute(unit.conn())
            .await?;
        unit.commit().await?;

        info!(
            account_id,
            bet_id,
            option = %chosen,
            amount,
            balance = tx.balance_after,
            "Wager placed"
        );

        Ok(Wager {
            wager_id: result.last_insert_rowid(),
            account_id,
            bet_id,
            option_chosen: chosen,
            amount,
            payout: 0,
            status: WagerStatus::Pending,
            created_at: tx.created_at,
        })
    }

    /// Resolve the bet in favour of `winning_option` and pay out pari-mutuel.
    pub async fn resolve_bet(
        &self,
        bet_id: BetId,
        winning_option: &str,
    ) -> LedgerResult<ResolutionReport> {
        let mut unit = self.ledger.store().begin_write().await?;
        let bet = require_bet(unit.conn(), bet_id).await?;
        if !bet.status.is_settleable() {
            return Err(LedgerError::BetNotResolvable { bet_id, status: bet.status });
        }
        let winning = bet
            .canonical_option(winning_option)
            .ok_or_else(|| LedgerError::InvalidOption {
                bet_id,
                option: winning_option.to_string(),
            })?
            .to_string();

        let wagers = fetch_wagers(unit.conn(), bet_id).await?;
        let settlement = settle(&wagers, &winning);
        let mut payouts = Vec::new();

        for s in &settlement.settled {
            update_wager(unit.conn(), s.wager_id, s.status, s.payout).await?;

            if let Some(kind) = s.credit_kind() {
                let description = match kind {
                    TransactionKind::WagerRefunded => {
                        format!("Refund on '{}' - no opposing wagers", bet.title)
                    }
                    _ => format!("Won '{}' - {winning}", bet.title),
                };
                self.ledger
                    .credit_in(
                        &mut unit,
                        s.account_id,
                        s.payout,
                        kind,
                        Some(bet_id),
                        Some(description.as_str()),
                    )
                    .await?;
                payouts.push(Payout {
                    account_id: s.account_id,
                    stake: s.stake,
                    payout: s.payout,
                    kind,
                });
            }
        }

        set_status(
            unit.conn(),
            bet_id,
            BetStatus::Resolved,
            Some(&winning),
            Some(self.ledger.now()),
        )
        .await?;
        unit.commit().await?;

        let report = ResolutionReport {
            bet_id,
            winning_option: winning,
            winner_count: settlement.winner_count(),
            loser_count: settlement.loser_count(),
            total_pool: bet.total_pool,
            payouts,
            rounding_loss: settlement.rounding_loss,
        };

        info!(
            bet_id,
            winning_option = %report.winning_option,
            winners = report.winner_count,
            losers = report.loser_count,
            paid = settlement.total_paid(),
            rounding_loss = report.rounding_loss,
            "Bet resolved"
        );
        notify(
            &self.sink,
            LedgerEvent::BetResolved { title: bet.title, report: report.clone() },
        )
        .await;
        Ok(report)
    }

    /// Cancel the bet and refund every pending wager in full.
    pub async fn cancel_bet(&self, bet_id: BetId) -> LedgerResult<CancellationReport> {
        let mut unit = self.ledger.store().begin_write().await?;
        let bet = require_bet(unit.conn(), bet_id).await?;
        if !bet.status.is_settleable() {
            return Err(LedgerError::BetNotResolvable { bet_id, status: bet.status });
        }

        let wagers = fetch_wagers(unit.conn(), bet_id).await?;
        let description = format!("Refund on '{}' - bet cancelled", bet.title);
        let mut report = CancellationReport { bet_id, refunded_count: 0, total_refunded: 0 };

        for w in wagers.iter().filter(|w| w.status == WagerStatus::Pending) {
            self.ledger
                .credit_in(
                    &mut unit,
                    w.account_id,
                    w.amount,
                    TransactionKind::WagerRefunded,
                    Some(bet_id),
                    Some(description.as_str()),
                )
                .await?;
            update_wager(unit.conn(), w.wager_id, WagerStatus::Refunded, w.amount).await?;
            report.refunded_count += 1;
            report.total_refunded += w.amount;
        }

        set_status(unit.conn(), bet_id, BetStatus::Cancelled, None, Some(self.ledger.now())).await?;
        unit.commit().await?;

        info!(
            bet_id,
            refunded = report.refunded_count,
            total_refunded = report.total_refunded,
            "Bet cancelled"
        );
        notify(&self.sink, LedgerEvent::BetCancelled { title: bet.title, report }).await;
        Ok(report)
    }

    // -- Queries -----------------------------------------------------------

    pub async fn get_bet(&self, bet_id: BetId) -> LedgerResult<Bet> {
        sqlx::query_as::<_, Bet>("SELECT * FROM bets WHERE bet_id = ?")
            .bind(bet_id)
            .fetch_optional(self.ledger.store().pool())
            .await?
            .ok_or(LedgerError::BetNotFound(bet_id))
    }

    /// Open bets, newest first.
    pub async fn active_bets(&self, limit: i64) -> LedgerResult<Vec<Bet>> {
        let bets = sqlx::query_as::<_, Bet>(
            "SELECT * FROM bets WHERE status = 'open' ORDER BY created_at DESC, bet_id DESC LIMIT ?",
        )
        .bind(limit.max(1))
        .fetch_all(self.ledger.store().pool())
        .await?;
        Ok(bets)
    }

    pub async fn wagers_for_bet(&self, bet_id: BetId) -> LedgerResult<Vec<Wager>> {
        let wagers = sqlx::query_as::<_, Wager>(
            "SELECT * FROM wagers WHERE bet_id = ? ORDER BY wager_id",
        )
        .bind(bet_id)
        .fetch_all(self.ledger.store().pool())
        .await?;
        Ok(wagers)
    }

    /// The account's stakes on bets that are still open or locked.
    pub async fn open_wagers_for(&self, account_id: AccountId) -> LedgerResult<Vec<OpenWager>> {
        let rows = sqlx::query_as::<_, OpenWager>(
            "SELECT b.bet_id, b.title, b.status AS bet_status, w.option_chosen, w.amount
             FROM wagers w JOIN bets b ON b.bet_id = w.bet_id
             WHERE w.account_id = ? AND b.status IN ('open', 'locked')
             ORDER BY b.created_at DESC",
        )
        .bind(account_id)
        .fetch_all(self.ledger.store().pool())
        .await?;
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Trim options and enforce count and case-insensitive uniqueness.
fn validate_options(options: &[String]) -> LedgerResult<Vec<String>> {
    let trimmed: Vec<String> = options.iter().map(|o| o.trim().to_string()).collect();

    if trimmed.len() < MIN_OPTIONS || trimmed.len() > MAX_OPTIONS {
        return Err(LedgerError::InvalidBet(format!(
            "a bet needs {MIN_OPTIONS} to {MAX_OPTIONS} options, got {}",
            trimmed.len()
        )));
    }
    if trimmed.iter().any(String::is_empty) {
        return Err(LedgerError::InvalidBet("options must not be empty".into()));
    }

    let mut seen = HashSet::new();
    for option in &trimmed {
        if !seen.insert(normalize_option(option)) {
            return Err(LedgerError::InvalidBet(format!("duplicate option '{option}'")));
        }
    }
    Ok(trimmed)
}

async fn require_bet(conn: &mut SqliteConnection, bet_id: BetId) -> LedgerResult<Bet> {
    sqlx::query_as::<_, Bet>("SELECT * FROM bets WHERE bet_id = ?")
        .bind(bet_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::BetNotFound(bet_id))
}

async fn fetch_wagers(conn: &mut SqliteConnection, bet_id: BetId) -> LedgerResult<Vec<Wager>> {
    let wagers = sqlx::query_as::<_, Wager>("SELECT * FROM wagers WHERE bet_id = ? ORDER BY wager_id")
        .bind(bet_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(wagers)
}

async fn update_wager(
    conn: &mut SqliteConnection,
    wager_id: i64,
    status: WagerStatus,
    payout: i64,
) -> LedgerResult<()> {
    sqlx::query("UPDATE wagers SET status = ?, payout = ? WHERE wager_id = ? AND status = 'pending'")
        .bind(status)
        .bind(payout)
        .bind(wager_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Move a bet forward. The guard on the current status means a transition
/// out of a terminal state is reported instead of applied.
async fn set_status(
    conn: &mut SqliteConnection,
    bet_id: BetId,
    to: BetStatus,
    winning_option: Option<&str>,
    resolved_at: Option<chrono::DateTime<Utc>>,
) -> LedgerResult<()> {
    let result = sqlx::query(
        "UPDATE bets
         SET status = ?, winning_option = COALESCE(?, winning_option), resolved_at = COALESCE(?, resolved_at)
         WHERE bet_id = ? AND status IN ('open', 'locked')",
    )
    .bind(to)
    .bind(winning_option)
    .bind(resolved_at)
    .bind(bet_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(LedgerError::InvariantViolation(format!(
            "bet {bet_id} left open/locked during transition to {to}"
        )));
    }
    debug!(bet_id, %to, "Bet status updated");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
