//! Account ledger: balances and the append-only transaction log.
//!
//! Every balance change in the system goes through [`AccountLedger`]: the
//! balance update and its audit entry are written in the same atomic unit,
//! so an account's balance always equals the sum of its transactions.
//! The wager and activity modules compose their own atomic units and call
//! [`AccountLedger::credit_in`] / [`AccountLedger::debit_in`] inside them.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EconomyConfig;
use crate::storage::{Store, WriteUnit};
use crate::types::{
    Account, AccountId, AccountStats, BalanceAudit, BetId, ClaimDenial, ClaimOutcome,
    LedgerError, LedgerResult, Transaction, TransactionKind,
};

const MAX_LEADERBOARD: i64 = 20;
const DEFAULT_LEADERBOARD: i64 = 10;

// ---------------------------------------------------------------------------
// Ledger entry
// ---------------------------------------------------------------------------

/// A signed balance change waiting to be applied.
#[derive(Debug, Clone)]
pub struct Entry<'a> {
    pub account_id: AccountId,
    pub amount: i64,
    pub kind: TransactionKind,
    pub reference_id: Option<BetId>,
    pub description: Option<&'a str>,
}

/// Which claim timestamp a bonus uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimKind {
    Daily,
    Bailout,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct AccountLedger {
    store: Store,
    clock: Arc<dyn Clock>,
    economy: EconomyConfig,
}

impl AccountLedger {
    pub fn new(store: Store, clock: Arc<dyn Clock>, economy: EconomyConfig) -> Self {
        Self { store, clock, economy }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn economy(&self) -> &EconomyConfig {
        &self.economy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -- Accounts ----------------------------------------------------------

    /// Return the account, registering it with the starting balance on first
    /// sight. An existing account gets its display name and activity refreshed.
    pub async fn get_or_create(
        &self,
        account_id: AccountId,
        display_name: &str,
    ) -> LedgerResult<(Account, bool)> {
        let now = self.now();
        let mut unit = self.store.begin_write().await?;

        if let Some(mut account) = fetch_account(unit.conn(), account_id).await? {
            sqlx::query(
                "UPDATE accounts SET display_name = ?, last_active_at = ? WHERE account_id = ?",
            )
            .bind(display_name)
            .bind(now)
            .bind(account_id)
            .execute(unit.conn())
            .await?;
            unit.commit().await?;

            account.display_name = display_name.to_string();
            account.last_active_at = now;
            return Ok((account, false));
        }

        sqlx::query(
            "INSERT INTO accounts (account_id, display_name, balance, registered_at, last_active_at)
             VALUES (?, ?, 0, ?, ?)",
        )
        .bind(account_id)
        .bind(display_name)
        .bind(now)
        .bind(now)
        .execute(unit.conn())
        .await?;

        apply(
            unit.conn(),
            Entry {
                account_id,
                amount: self.economy.starting_balance,
                kind: TransactionKind::AdminAdjustment,
                reference_id: None,
                description: Some("Initial registration grant"),
            },
            now,
        )
        .await?;

        let account = require_account(unit.conn(), account_id).await?;
        unit.commit().await?;

        info!(
            account_id,
            display_name,
            balance = account.balance,
            "Account registered"
        );
        Ok((account, true))
    }

    pub async fn find_account(&self, account_id: AccountId) -> LedgerResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE account_id = ?")
            .bind(account_id)
            .fetch_optional(self.store.pool())
            .await?;
        Ok(account)
    }

    pub async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.find_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    // -- Balance changes ---------------------------------------------------

    /// Add `amount` (> 0) to the account and log it.
    pub async fn credit(
        &self,
        account_id: AccountId,
        amount: i64,
        kind: TransactionKind,
        reference_id: Option<BetId>,
        description: Option<&str>,
    ) -> LedgerResult<Transaction> {
        let mut unit = self.store.begin_write().await?;
        let tx = self
            .credit_in(&mut unit, account_id, amount, kind, reference_id, description)
            .await?;
        unit.commit().await?;

        info!(account_id, amount, kind = %kind, balance = tx.balance_after, "Credited");
        Ok(tx)
    }

    /// Remove `amount` (> 0) from the account and log it. Fails without effect
    /// if the balance is short.
    pub async fn debit(
        &self,
        account_id: AccountId,
        amount: i64,
        kind: TransactionKind,
        reference_id: Option<BetId>,
        description: Option<&str>,
    ) -> LedgerResult<Transaction> {
        let mut unit = self.store.begin_write().await?;
        let tx = self
            .debit_in(&mut unit, account_id, amount, kind, reference_id, description)
            .await?;
        unit.commit().await?;

        info!(account_id, amount, kind = %kind, balance = tx.balance_after, "Debited");
        Ok(tx)
    }

    /// Credit inside a caller-owned atomic unit.
    pub async fn credit_in(
        &self,
        unit: &mut WriteUnit<'_>,
        account_id: AccountId,
        amount: i64,
        kind: TransactionKind,
        reference_id: Option<BetId>,
        description: Option<&str>,
    ) -> LedgerResult<Transaction> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let entry = Entry { account_id, amount, kind, reference_id, description };
        apply(unit.conn(), entry, self.now()).await
    }

    /// Debit inside a caller-owned atomic unit.
    pub async fn debit_in(
        &self,
        unit: &mut WriteUnit<'_>,
        account_id: AccountId,
        amount: i64,
        kind: TransactionKind,
        reference_id: Option<BetId>,
        description: Option<&str>,
    ) -> LedgerResult<Transaction> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let entry = Entry { account_id, amount: -amount, kind, reference_id, description };
        apply(unit.conn(), entry, self.now()).await
    }

    /// Administrative override of a balance. The difference is logged as an
    /// `admin_adjustment` with the true before/after snapshot.
    pub async fn set_balance(
        &self,
        account_id: AccountId,
        new_balance: i64,
        admin_actor: AccountId,
    ) -> LedgerResult<Transaction> {
        if new_balance < 0 {
            return Err(LedgerError::InvalidAmount(new_balance));
        }

        let mut unit = self.store.begin_write().await?;
        let account = require_account(unit.conn(), account_id).await?;
        let description = format!("Balance set to {new_balance} by admin {admin_actor}");
        let tx = apply(
            unit.conn(),
            Entry {
                account_id,
                amount: new_balance - account.balance,
                kind: TransactionKind::AdminAdjustment,
                reference_id: None,
                description: Some(&description),
            },
            self.now(),
        )
        .await?;
        unit.commit().await?;

        info!(
            account_id,
            admin_actor,
            old_balance = tx.balance_before,
            new_balance = tx.balance_after,
            "Balance set by admin"
        );
        Ok(tx)
    }

    // -- Claims ------------------------------------------------------------

    /// Grant the daily bonus if the cooldown has passed since the last claim.
    pub async fn claim_daily_bonus(&self, account_id: AccountId) -> LedgerResult<ClaimOutcome> {
        self.claim(account_id, ClaimKind::Daily).await
    }

    /// Grant an emergency bailout to a zero-balance account, once per cooldown.
    pub async fn claim_bailout(&self, account_id: AccountId) -> LedgerResult<ClaimOutcome> {
        self.claim(account_id, ClaimKind::Bailout).await
    }

    /// Eligibility check, timestamp update, and credit share one unit, so two
    /// concurrent claims cannot both pass the check.
    async fn claim(&self, account_id: AccountId, kind: ClaimKind) -> LedgerResult<ClaimOutcome> {
        let now = self.now();
        let cooldown = Duration::hours(self.economy.claim_cooldown_hours);
        let mut unit = self.store.begin_write().await?;
        let account = require_account(unit.conn(), account_id).await?;

        let (last_claim, amount, tx_kind, column, description) = match kind {
            ClaimKind::Daily => (
                account.last_daily_claim,
                self.economy.daily_bonus,
                TransactionKind::DailyBonus,
                "last_daily_claim",
                "Daily bonus claimed",
            ),
            ClaimKind::Bailout => (
                account.last_bailout_claim,
                self.economy.bailout_amount,
                TransactionKind::Bailout,
                "last_bailout_claim",
                "Emergency bailout claimed",
            ),
        };

        if kind == ClaimKind::Bailout && account.balance > 0 {
            debug!(account_id, balance = account.balance, "Bailout refused: balance not zero");
            return Ok(ClaimOutcome::denied(ClaimDenial::BalanceNotZero {
                balance: account.balance,
            }));
        }

        if let Some(last) = last_claim {
            let next_eligible_at = last + cooldown;
            if now < next_eligible_at {
                debug!(account_id, ?kind, %next_eligible_at, "Claim refused: cooldown");
                return Ok(ClaimOutcome::denied(ClaimDenial::Cooldown { next_eligible_at }));
            }
        }

        sqlx::query(&format!("UPDATE accounts SET {column} = ? WHERE account_id = ?"))
            .bind(now)
            .bind(account_id)
            .execute(unit.conn())
            .await?;

        if amount > 0 {
            self.credit_in(&mut unit, account_id, amount, tx_kind, None, Some(description))
                .await?;
        }
        unit.commit().await?;

        info!(account_id, amount, ?kind, "Claim granted");
        Ok(ClaimOutcome::granted(amount))
    }

    // -- Stats and audit ---------------------------------------------------

    /// Recompute the cached betting counters from wagers and the audit log.
    ///
    /// `amount_lost` sums every `wager_placed` stake, refunded or not.
    pub async fn recompute_stats(&self, account_id: AccountId) -> LedgerResult<AccountStats> {
        let mut unit = self.store.begin_write().await?;
        require_account(unit.conn(), account_id).await?;
        let stats = compute_stats(unit.conn(), account_id).await?;

        sqlx::query(
            "UPDATE accounts
             SET bets_placed = ?, bets_won = ?, amount_won = ?, amount_lost = ?
             WHERE account_id = ?",
        )
        .bind(stats.bets_placed)
        .bind(stats.bets_won)
        .bind(stats.amount_won)
        .bind(stats.amount_lost)
        .bind(account_id)
        .execute(unit.conn())
        .await?;
        unit.commit().await?;

        debug!(
            account_id,
            bets_placed = stats.bets_placed,
            bets_won = stats.bets_won,
            amount_won = stats.amount_won,
            amount_lost = stats.amount_lost,
            "Stats recomputed"
        );
        Ok(stats)
    }

    /// Recompute stats for every account. Returns the number refreshed.
    pub async fn refresh_all_stats(&self) -> LedgerResult<usize> {
        let ids: Vec<AccountId> = sqlx::query_scalar("SELECT account_id FROM accounts")
            .fetch_all(self.store.pool())
            .await?;
        for id in &ids {
            self.recompute_stats(*id).await?;
        }
        info!(count = ids.len(), "Refreshed stats for all accounts");
        Ok(ids.len())
    }

    /// Compare the stored balance with a replay of the account's audit log.
    pub async fn audit_balance(&self, account_id: AccountId) -> LedgerResult<BalanceAudit> {
        let account = self.get_account(account_id).await?;
        let replayed: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM transactions WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_one(self.store.pool())
        .await?;

        Ok(BalanceAudit { account_id, stored: account.balance, replayed })
    }

    /// Audit every account; returns only the ones that drifted.
    pub async fn audit_all(&self) -> LedgerResult<Vec<BalanceAudit>> {
        let rows: Vec<(AccountId, i64, i64)> = sqlx::query_as(
            "SELECT a.account_id, a.balance, COALESCE(SUM(t.amount), 0)
             FROM accounts a LEFT JOIN transactions t ON t.account_id = a.account_id
             GROUP BY a.account_id, a.balance",
        )
        .fetch_all(self.store.pool())
        .await?;

        let drifted: Vec<BalanceAudit> = rows
            .into_iter()
            .map(|(account_id, stored, replayed)| BalanceAudit { account_id, stored, replayed })
            .filter(|a| !a.is_consistent())
            .collect();

        for audit in &drifted {
            warn!(
                account_id = audit.account_id,
                stored = audit.stored,
                replayed = audit.replayed,
                "Balance drift detected"
            );
        }
        Ok(drifted)
    }

    // -- Queries -----------------------------------------------------------

    /// Top accounts by balance. `limit` is clamped to 1..=20.
    pub async fn leaderboard(&self, limit: i64) -> LedgerResult<Vec<Account>> {
        let limit = if limit < 1 { DEFAULT_LEADERBOARD } else { limit.min(MAX_LEADERBOARD) };
        let accounts = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts ORDER BY balance DESC, account_id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.store.pool())
        .await?;
        Ok(accounts)
    }

    /// Most recent audit entries for an account, newest first.
    pub async fn transactions(
        &self,
        account_id: AccountId,
        limit: i64,
    ) -> LedgerResult<Vec<Transaction>> {
        let txs = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE account_id = ?
             ORDER BY transaction_id DESC LIMIT ?",
        )
        .bind(account_id)
        .bind(limit.max(1))
        .fetch_all(self.store.pool())
        .await?;
        Ok(txs)
    }
}

// ---------------------------------------------------------------------------
// Unit-level primitives
// ---------------------------------------------------------------------------

pub(crate) async fn fetch_account(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> LedgerResult<Option<Account>> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE account_id = ?")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(account)
}

pub(crate) async fn require_account(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> LedgerResult<Account> {
    fetch_account(conn, account_id)
        .await?
        .ok_or(LedgerError::AccountNotFound(account_id))
}

/// Apply a signed entry: update the balance and append the audit record.
///
/// A negative result from a debit is insufficient funds; from anything else
/// it is a bug and is reported as an invariant violation.
async fn apply(
    conn: &mut SqliteConnection,
    entry: Entry<'_>,
    now: DateTime<Utc>,
) -> LedgerResult<Transaction> {
    let account = require_account(conn, entry.account_id).await?;
    let balance_before = account.balance;
    let balance_after = balance_before
        .checked_add(entry.amount)
        .ok_or_else(|| LedgerError::InvariantViolation("balance overflow".into()))?;

    if balance_after < 0 {
        if entry.amount < 0 && entry.kind != TransactionKind::AdminAdjustment {
            return Err(LedgerError::InsufficientFunds {
                needed: -entry.amount,
                available: balance_before,
            });
        }
        return Err(LedgerError::InvariantViolation(format!(
            "{} of {} would leave account {} at {balance_after}",
            entry.kind, entry.amount, entry.account_id
        )));
    }

    sqlx::query("UPDATE accounts SET balance = ? WHERE account_id = ?")
        .bind(balance_after)
        .bind(entry.account_id)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query(
        "INSERT INTO transactions
            (account_id, amount, kind, reference_id, balance_before, balance_after, description, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.account_id)
    .bind(entry.amount)
    .bind(entry.kind)
    .bind(entry.reference_id)
    .bind(balance_before)
    .bind(balance_after)
    .bind(entry.description)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(Transaction {
        transaction_id: result.last_insert_rowid(),
        account_id: entry.account_id,
        amount: entry.amount,
        kind: entry.kind,
        reference_id: entry.reference_id,
        balance_before,
        balance_after,
        description: entry.description.map(str::to_string),
        created_at: now,
    })
}

async fn compute_stats(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> LedgerResult<AccountStats> {
    let (bets_placed, bets_won): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'won' THEN 1 ELSE 0 END), 0)
         FROM wagers WHERE account_id = ?",
    )
    .bind(account_id)
    .fetch_one(&mut *conn)
    .await?;

    let (amount_won, amount_lost): (i64, i64) = sqlx::query_as(
        "SELECT
            COALESCE(SUM(CASE WHEN kind = 'wager_won' THEN amount ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN kind = 'wager_placed' THEN ABS(amount) ELSE 0 END), 0)
         FROM transactions WHERE account_id = ?",
    )
    .bind(account_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(AccountStats { bets_placed, bets_won, amount_won, amount_lost })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
