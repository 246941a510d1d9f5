//! Re-running an operation never pays twice.

use chrono::Duration;

use wagerbook::activity::{aligned_period, completed_period};
use wagerbook::types::LedgerError;

use crate::harness::{opts, system, t0};

#[tokio::test]
async fn test_reward_batch_twice_pays_once() {
    let sys = system().await;
    sys.register(&[1, 2]).await;
    for i in 0..6 {
        let at = t0() + Duration::seconds(30 * i);
        sys.activity.record_message(1, 5, 1, 10, at).await.unwrap();
        sys.activity.record_message(2, 5, 1, 10, at).await.unwrap();
    }
    let (start, end) = aligned_period(t0(), Duration::days(1));

    let first = sys.activity.process_rewards(start, end, None).await.unwrap();
    assert_eq!(first.accounts_processed, 2);
    assert_eq!(first.total_points_awarded, 24);
    let total = sys.total_points().await;

    let second = sys.activity.process_rewards(start, end, None).await.unwrap();
    assert_eq!(second.total_points_awarded, 0);
    assert_eq!(second.accounts_processed, 0);
    assert_eq!(sys.total_points().await, total);
}

#[tokio::test]
async fn test_late_messages_paid_on_next_run() {
    let sys = system().await;
    sys.register(&[1]).await;
    let (start, end) = aligned_period(t0(), Duration::days(1));

    sys.activity.record_message(1, 5, 1, 10, t0()).await.unwrap();
    sys.activity.process_rewards(start, end, None).await.unwrap();
    assert_eq!(sys.balance(1).await, 1002);

    sys.activity.record_message(1, 5, 1, 10, t0() + Duration::hours(3)).await.unwrap();
    sys.activity.record_message(1, 5, 1, 10, t0() + Duration::hours(4)).await.unwrap();
    let rerun = sys.activity.process_rewards(start, end, None).await.unwrap();
    assert_eq!(rerun.total_points_awarded, 4);
    assert_eq!(sys.balance(1).await, 1006);
}

#[tokio::test]
async fn test_scheduler_period_is_stable() {
    let sys = system().await;
    sys.register(&[1]).await;
    sys.activity.record_message(1, 5, 1, 10, t0()).await.unwrap();

    // Two scheduler ticks on the following day land on the same period
    let next_day = t0() + Duration::days(1);
    let a = completed_period(next_day, Duration::days(1));
    let b = completed_period(next_day + Duration::hours(5), Duration::days(1));
    assert_eq!(a, b);

    let first = sys.activity.process_rewards(a.0, a.1, None).await.unwrap();
    let second = sys.activity.process_rewards(b.0, b.1, None).await.unwrap();
    assert_eq!(first.total_points_awarded, 2);
    assert_eq!(second.total_points_awarded, 0);
}

#[tokio::test]
async fn test_overlapping_periods_pay_once() {
    let sys = system().await;
    sys.register(&[1]).await;
    for i in 0..5 {
        sys.activity.record_message(1, 5, 1, 10, t0() + Duration::seconds(30 * i)).await.unwrap();
    }

    let (day_start, day_end) = aligned_period(t0(), Duration::days(1));
    let (hour_start, hour_end) = aligned_period(t0(), Duration::hours(1));
    let rolling_end = t0() + Duration::minutes(45);

    let daily = sys.activity.process_rewards(day_start, day_end, None).await.unwrap();
    let hourly = sys.activity.process_rewards(hour_start, hour_end, None).await.unwrap();
    let rolling = sys
        .activity
        .process_rewards(rolling_end - Duration::hours(24), rolling_end, None)
        .await
        .unwrap();

    assert_eq!(daily.total_points_awarded, 10);
    assert_eq!(hourly.total_points_awarded + rolling.total_points_awarded, 0);
    assert_eq!(sys.balance(1).await, 1010);
}

#[tokio::test]
async fn test_settlement_retries_are_rejected() {
    let sys = system().await;
    sys.register(&[1, 2]).await;
    let bet = sys.wagers.create_bet(1, "t", &opts(&["A", "B"]), None).await.unwrap();
    sys.wagers.place_wager(1, bet.bet_id, "A", 100).await.unwrap();
    sys.wagers.place_wager(2, bet.bet_id, "B", 100).await.unwrap();
    sys.wagers.cancel_bet(bet.bet_id).await.unwrap();

    assert!(matches!(
        sys.wagers.cancel_bet(bet.bet_id).await,
        Err(LedgerError::BetNotResolvable { .. })
    ));
    assert!(matches!(
        sys.wagers.resolve_bet(bet.bet_id, "A").await,
        Err(LedgerError::BetNotResolvable { .. })
    ));
    assert_eq!(sys.balance(1).await, 1000);
    assert_eq!(sys.balance(2).await, 1000);
}

#[tokio::test]
async fn test_registration_grants_once() {
    let sys = system().await;
    let (_, created) = sys.ledger.get_or_create(1, "first").await.unwrap();
    assert!(created);
    let (account, created) = sys.ledger.get_or_create(1, "renamed").await.unwrap();
    assert!(!created);
    assert_eq!(account.display_name, "renamed");
    assert_eq!(account.balance, 1000);
    assert_eq!(sys.ledger.transactions(1, 10).await.unwrap().len(), 1);
}
