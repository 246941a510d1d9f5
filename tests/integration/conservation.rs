//! Points are neither created nor destroyed except where the rules say so.

use chrono::Duration;

use wagerbook::activity::aligned_period;
use wagerbook::types::TransactionKind;

use crate::harness::{opts, system, t0};

#[tokio::test]
async fn test_resolution_loses_only_rounding() {
    let sys = system().await;
    sys.register(&[1, 2, 3, 4]).await;
    let bet = sys.wagers.create_bet(1, "Split", &opts(&["A", "B"]), None).await.unwrap();
    sys.wagers.place_wager(1, bet.bet_id, "A", 100).await.unwrap();
    sys.wagers.place_wager(2, bet.bet_id, "A", 200).await.unwrap();
    sys.wagers.place_wager(3, bet.bet_id, "B", 100).await.unwrap();
    sys.wagers.place_wager(4, bet.bet_id, "B", 1).await.unwrap();
    let before = sys.total_points().await + 401;

    let report = sys.wagers.resolve_bet(bet.bet_id, "A").await.unwrap();
    let paid: i64 = report.payouts.iter().map(|p| p.payout).sum();

    assert_eq!(report.total_pool, 401);
    assert_eq!(paid + report.rounding_loss, report.total_pool);
    assert!(report.rounding_loss < report.winner_count as i64);
    assert_eq!(report.rounding_loss, 1);
    assert_eq!(sys.balance(1).await, 900 + 133);
    assert_eq!(sys.balance(2).await, 800 + 267);
    assert_eq!(sys.total_points().await, before - report.rounding_loss);
}

#[tokio::test]
async fn test_no_opposition_is_net_zero() {
    let sys = system().await;
    sys.register(&[1, 2, 3]).await;
    let before = sys.total_points().await;

    let bet = sys.wagers.create_bet(1, "Sure thing", &opts(&["Yes", "No"]), None).await.unwrap();
    for (id, amount) in [(1, 10), (2, 333), (3, 999)] {
        sys.wagers.place_wager(id, bet.bet_id, "yes", amount).await.unwrap();
    }
    let report = sys.wagers.resolve_bet(bet.bet_id, "Yes").await.unwrap();

    assert!(report.payouts.iter().all(|p| p.kind == TransactionKind::WagerRefunded));
    assert_eq!(report.rounding_loss, 0);
    assert_eq!(sys.total_points().await, before);
}

#[tokio::test]
async fn test_no_winners_keeps_the_pool() {
    let sys = system().await;
    sys.register(&[1, 2]).await;
    let before = sys.total_points().await;

    let bet = sys.wagers.create_bet(1, "Three way", &opts(&["A", "B", "C"]), None).await.unwrap();
    sys.wagers.place_wager(1, bet.bet_id, "A", 70).await.unwrap();
    sys.wagers.place_wager(2, bet.bet_id, "B", 30).await.unwrap();
    let report = sys.wagers.resolve_bet(bet.bet_id, "C").await.unwrap();

    assert_eq!(report.winner_count, 0);
    assert!(report.payouts.is_empty());
    assert_eq!(sys.total_points().await, before - 100);
}

#[tokio::test]
async fn test_balances_replay_from_audit_log() {
    let sys = system().await;
    sys.register(&[1, 2, 3]).await;

    let bet = sys.wagers.create_bet(1, "Mixed", &opts(&["A", "B"]), None).await.unwrap();
    sys.wagers.place_wager(1, bet.bet_id, "A", 300).await.unwrap();
    sys.wagers.place_wager(2, bet.bet_id, "B", 120).await.unwrap();
    sys.wagers.resolve_bet(bet.bet_id, "B").await.unwrap();

    let cancelled = sys.wagers.create_bet(2, "Void", &opts(&["A", "B"]), None).await.unwrap();
    sys.wagers.place_wager(3, cancelled.bet_id, "A", 500).await.unwrap();
    sys.wagers.cancel_bet(cancelled.bet_id).await.unwrap();

    sys.ledger.claim_daily_bonus(1).await.unwrap();
    sys.ledger.set_balance(3, 0, 99).await.unwrap();
    sys.ledger.claim_bailout(3).await.unwrap();

    for i in 0..4 {
        sys.activity.record_message(2, 5, 1, 10, t0() + Duration::seconds(20 * i)).await.unwrap();
    }
    let (start, end) = aligned_period(t0(), Duration::days(1));
    sys.activity.process_rewards(start, end, None).await.unwrap();

    assert!(sys.ledger.audit_all().await.unwrap().is_empty());
    for id in [1, 2, 3] {
        let audit = sys.ledger.audit_balance(id).await.unwrap();
        assert!(audit.is_consistent(), "account {id} drifted: {audit:?}");
    }
    assert_eq!(sys.balance(3).await, 50);
}

#[tokio::test]
async fn test_refresh_all_stats_matches_history() {
    let sys = system().await;
    sys.register(&[1, 2]).await;
    let bet = sys.wagers.create_bet(1, "t", &opts(&["A", "B"]), None).await.unwrap();
    sys.wagers.place_wager(1, bet.bet_id, "A", 40).await.unwrap();
    sys.wagers.place_wager(2, bet.bet_id, "B", 60).await.unwrap();
    sys.wagers.resolve_bet(bet.bet_id, "A").await.unwrap();

    assert_eq!(sys.ledger.refresh_all_stats().await.unwrap(), 2);

    let a = sys.ledger.get_account(1).await.unwrap().stats();
    assert_eq!((a.bets_placed, a.bets_won, a.amount_won, a.amount_lost), (1, 1, 100, 40));
    let b = sys.ledger.get_account(2).await.unwrap().stats();
    assert_eq!((b.bets_placed, b.bets_won, b.amount_won, b.amount_lost), (1, 0, 0, 60));
    assert_eq!(b.net_profit(), -60);

    let board = sys.ledger.leaderboard(10).await.unwrap();
    assert_eq!(board[0].account_id, 1);
}
