//! End-to-end flows through the public API.

use chrono::Duration;

use wagerbook::notify::LedgerEvent;
use wagerbook::types::{BetStatus, ClaimDenial, LedgerError, TransactionKind, WagerStatus};

use crate::harness::{opts, system, system_with_sink, t0, RecordingSink};

#[tokio::test]
async fn test_two_player_bet() {
    let sys = system().await;
    sys.register(&[1, 2]).await;
    let bet = sys.wagers.create_bet(1, "Will it rain?", &opts(&["Yes", "No"]), None).await.unwrap();

    sys.wagers.place_wager(1, bet.bet_id, "Yes", 100).await.unwrap();
    sys.wagers.place_wager(2, bet.bet_id, "No", 100).await.unwrap();

    let report = sys.wagers.resolve_bet(bet.bet_id, "Yes").await.unwrap();
    assert_eq!(report.payouts.len(), 1);
    assert_eq!(report.payouts[0].account_id, 1);
    assert_eq!(report.payouts[0].payout, 200);
    assert_eq!(report.payouts[0].profit(), 100);

    assert_eq!(sys.balance(1).await, 1100);
    assert_eq!(sys.balance(2).await, 900);

    let bet = sys.wagers.get_bet(bet.bet_id).await.unwrap();
    assert_eq!(bet.status, BetStatus::Resolved);
    assert_eq!(bet.total_pool, 200);

    let wagers = sys.wagers.wagers_for_bet(bet.bet_id).await.unwrap();
    let b = wagers.iter().find(|w| w.account_id == 2).unwrap();
    assert_eq!(b.status, WagerStatus::Lost);

    let again = sys.wagers.resolve_bet(bet.bet_id, "Yes").await;
    assert!(matches!(again, Err(LedgerError::BetNotResolvable { .. })));

    assert_eq!(sys.sink.names(), vec!["bet_created", "bet_resolved"]);
}

#[tokio::test]
async fn test_audit_trail_of_a_bet() {
    let sys = system().await;
    sys.register(&[1, 2]).await;
    let bet = sys.wagers.create_bet(1, "Match", &opts(&["Home", "Away"]), None).await.unwrap();
    sys.wagers.place_wager(1, bet.bet_id, "Home", 250).await.unwrap();
    sys.wagers.place_wager(2, bet.bet_id, "Away", 50).await.unwrap();
    sys.wagers.resolve_bet(bet.bet_id, "Home").await.unwrap();

    let txs = sys.ledger.transactions(1, 10).await.unwrap();
    let kinds: Vec<TransactionKind> = txs.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TransactionKind::WagerWon,
            TransactionKind::WagerPlaced,
            TransactionKind::AdminAdjustment,
        ]
    );
    assert!(txs.iter().all(|t| t.balance_after == t.balance_before + t.amount));
    assert_eq!(txs[0].reference_id, Some(bet.bet_id));
    assert_eq!(txs[0].amount, 300);

    let stats = sys.ledger.recompute_stats(1).await.unwrap();
    assert_eq!(stats.bets_won, 1);
    assert_eq!(stats.win_rate(), 100.0);
    assert_eq!(stats.net_profit(), 50);
}

#[tokio::test]
async fn test_lock_then_cancel_refunds() {
    let sys = system().await;
    sys.register(&[1, 2, 3]).await;
    let bet = sys
        .wagers
        .create_bet(3, "Release date", &opts(&["Q1", "Q2", "Q3"]), Some("Best guess"))
        .await
        .unwrap();
    sys.wagers.place_wager(1, bet.bet_id, "q1", 400).await.unwrap();
    sys.wagers.place_wager(2, bet.bet_id, "Q3", 10).await.unwrap();

    let open = sys.wagers.open_wagers_for(1).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].option_chosen, "Q1");

    sys.wagers.lock_bet(bet.bet_id).await.unwrap();
    let late = sys.wagers.place_wager(3, bet.bet_id, "Q2", 10).await;
    assert!(matches!(late, Err(LedgerError::BetNotOpen { status: BetStatus::Locked, .. })));

    let report = sys.wagers.cancel_bet(bet.bet_id).await.unwrap();
    assert_eq!(report.refunded_count, 2);
    assert_eq!(sys.balance(1).await, 1000);
    assert_eq!(sys.balance(2).await, 1000);
    assert!(sys.wagers.open_wagers_for(1).await.unwrap().is_empty());

    assert_eq!(
        sys.sink.names(),
        vec!["bet_created", "bet_status_changed", "bet_cancelled"]
    );
}

#[tokio::test]
async fn test_claims_follow_the_clock() {
    let sys = system().await;
    sys.register(&[1]).await;

    assert!(sys.ledger.claim_daily_bonus(1).await.unwrap().granted);
    let denied = sys.ledger.claim_daily_bonus(1).await.unwrap();
    assert!(!denied.granted);
    assert!(matches!(denied.denial, Some(ClaimDenial::Cooldown { .. })));

    sys.clock.advance(Duration::hours(24));
    assert_eq!(sys.ledger.claim_daily_bonus(1).await.unwrap().amount, 100);
    assert_eq!(sys.balance(1).await, 1200);

    // Bailout needs an empty balance
    let refused = sys.ledger.claim_bailout(1).await.unwrap();
    assert!(matches!(refused.denial, Some(ClaimDenial::BalanceNotZero { balance: 1200 })));

    let bet = sys.wagers.create_bet(2, "All in", &opts(&["A", "B"]), None).await.unwrap();
    sys.wagers.place_wager(1, bet.bet_id, "A", 1200).await.unwrap();
    let bailout = sys.ledger.claim_bailout(1).await.unwrap();
    assert!(bailout.granted);
    assert_eq!(sys.balance(1).await, 50);
}

#[tokio::test]
async fn test_activity_to_points() {
    let sys = system().await;
    sys.register(&[1]).await;

    for i in 0..5 {
        let at = t0() + Duration::seconds(15 * i);
        assert!(sys.activity.record_message(1, 77, 3, 40, at).await.unwrap().is_counted());
    }

    let (start, end) = wagerbook::activity::aligned_period(t0(), Duration::days(1));
    let report = sys.activity.process_rewards(start, end, Some(77)).await.unwrap();
    assert_eq!(report.total_points_awarded, 10);
    assert_eq!(sys.balance(1).await, 1010);

    let txs = sys.ledger.transactions(1, 1).await.unwrap();
    assert_eq!(txs[0].kind, TransactionKind::ActivityReward);

    let events = sys.sink.events();
    assert!(matches!(
        events.last(),
        Some(LedgerEvent::RewardsProcessed { report }) if report.total_points_awarded == 10
    ));
}

#[tokio::test]
async fn test_sink_failure_keeps_ledger_change() {
    let sys = system_with_sink(RecordingSink::failing()).await;
    sys.register(&[1, 2]).await;
    let bet = sys.wagers.create_bet(1, "t", &opts(&["A", "B"]), None).await.unwrap();
    sys.wagers.place_wager(1, bet.bet_id, "A", 10).await.unwrap();
    sys.wagers.place_wager(2, bet.bet_id, "B", 30).await.unwrap();

    sys.wagers.resolve_bet(bet.bet_id, "A").await.unwrap();
    assert_eq!(sys.balance(1).await, 1030);
    assert_eq!(sys.sink.names(), vec!["bet_created", "bet_resolved"]);
}
