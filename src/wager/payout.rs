//! Pari-mutuel settlement.
//!
//! Winners keep their stake and split the losing pool in proportion to it:
//! `payout = stake + floor(losing_total * stake / winning_total)`.
//! When nobody bet against the winning option every winner is refunded
//! instead. Floor division can leave a remainder of fewer points than there
//! are winners; it is not distributed.

use crate::types::{normalize_option, AccountId, TransactionKind, Wager, WagerStatus};

/// What happens to one wager at resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledWager {
    pub wager_id: i64,
    pub account_id: AccountId,
    pub stake: i64,
    /// Amount to credit back (0 for a lost wager).
    pub payout: i64,
    pub status: WagerStatus,
}

impl SettledWager {
    /// Ledger category for the credit, if any.
    pub fn credit_kind(&self) -> Option<TransactionKind> {
        match self.status {
            WagerStatus::Won => Some(TransactionKind::WagerWon),
            WagerStatus::Refunded => Some(TransactionKind::WagerRefunded),
            WagerStatus::Pending | WagerStatus::Lost => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settlement {
    pub settled: Vec<SettledWager>,
    pub winning_total: i64,
    pub losing_total: i64,
    pub rounding_loss: i64,
}

impl Settlement {
    pub fn winner_count(&self) -> usize {
        self.settled
            .iter()
            .filter(|s| matches!(s.status, WagerStatus::Won | WagerStatus::Refunded))
            .count()
    }

    pub fn loser_count(&self) -> usize {
        self.settled.iter().filter(|s| s.status == WagerStatus::Lost).count()
    }

    pub fn total_paid(&self) -> i64 {
        self.settled.iter().map(|s| s.payout).sum()
    }
}

/// Settle pending wagers against `winning_option` (case-insensitive).
pub fn settle(wagers: &[Wager], winning_option: &str) -> Settlement {
    let winning = normalize_option(winning_option);
    let (winners, losers): (Vec<&Wager>, Vec<&Wager>) = wagers
        .iter()
        .filter(|w| w.status == WagerStatus::Pending)
        .partition(|w| normalize_option(&w.option_chosen) == winning);

    let winning_total: i64 = winners.iter().map(|w| w.amount).sum();
    let losing_total: i64 = losers.iter().map(|w| w.amount).sum();

    let mut settled = Vec::with_capacity(winners.len() + losers.len());
    let mut distributed = 0i64;

    for w in &winners {
        if losing_total > 0 {
            let share = proportional_share(losing_total, w.amount, winning_total);
            distributed += share;
            settled.push(SettledWager {
                wager_id: w.wager_id,
                account_id: w.account_id,
                stake: w.amount,
                payout: w.amount + share,
                status: WagerStatus::Won,
            });
        } else {
            settled.push(SettledWager {
                wager_id: w.wager_id,
                account_id: w.account_id,
                stake: w.amount,
                payout: w.amount,
                status: WagerStatus::Refunded,
            });
        }
    }

    for w in &losers {
        settled.push(SettledWager {
            wager_id: w.wager_id,
            account_id: w.account_id,
            stake: w.amount,
            payout: 0,
            status: WagerStatus::Lost,
        });
    }

    let rounding_loss = if winners.is_empty() { 0 } else { losing_total - distributed };

    Settlement { settled, winning_total, losing_total, rounding_loss }
}

/// `floor(pool * stake / total)` without intermediate overflow.
fn proportional_share(pool: i64, stake: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    ((pool as i128 * stake as i128) / total as i128) as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
