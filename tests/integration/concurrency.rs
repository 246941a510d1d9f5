//! Many callers against one file-backed store.

use chrono::Duration;
use futures::future::join_all;

use wagerbook::activity::aligned_period;
use wagerbook::types::{BetStatus, IngestOutcome};

use crate::harness::{cleanup, file_system, opts, t0};

#[tokio::test]
async fn test_parallel_wagers_never_overdraw() {
    let (sys, path) = file_system().await;
    sys.register(&[1]).await;

    let mut bet_ids = Vec::new();
    for i in 0..10 {
        let bet = sys.wagers.create_bet(2, &format!("bet {i}"), &opts(&["A", "B"]), None).await.unwrap();
        bet_ids.push(bet.bet_id);
    }

    let tasks = bet_ids.into_iter().map(|bet_id| {
        let wagers = sys.wagers.clone();
        tokio::spawn(async move { wagers.place_wager(1, bet_id, "A", 150).await })
    });
    let results = join_all(tasks).await;
    let placed = results.into_iter().filter(|r| matches!(r, Ok(Ok(_)))).count();

    assert_eq!(placed, 6);
    assert_eq!(sys.balance(1).await, 100);
    assert!(sys.ledger.audit_balance(1).await.unwrap().is_consistent());
    cleanup(path);
}

#[tokio::test]
async fn test_parallel_ingestion_loses_nothing() {
    let (sys, path) = file_system().await;

    let mut tasks = Vec::new();
    for account in 1..=20 {
        let activity = sys.activity.clone();
        tasks.push(tokio::spawn(async move {
            activity.record_message(account, 8, 1, 15, t0()).await
        }));
    }
    // A burst from one account inside its cooldown
    for _ in 0..5 {
        let activity = sys.activity.clone();
        tasks.push(tokio::spawn(async move {
            activity.record_message(100, 8, 1, 15, t0()).await
        }));
    }
    let outcomes: Vec<IngestOutcome> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let counted = outcomes.iter().filter(|o| o.is_counted()).count();
    assert_eq!(counted, 21);
    assert_eq!(outcomes.iter().filter(|o| **o == IngestOutcome::Cooldown).count(), 4);

    let stored: i64 = sqlx::query_scalar("SELECT SUM(message_count) FROM activity_windows")
        .fetch_one(sys.ledger.store().pool())
        .await
        .unwrap();
    assert_eq!(stored, 21);
    cleanup(path);
}

#[tokio::test]
async fn test_resolve_races_cancel() {
    let (sys, path) = file_system().await;
    sys.register(&[1, 2]).await;
    let bet = sys.wagers.create_bet(1, "Race", &opts(&["A", "B"]), None).await.unwrap();
    sys.wagers.place_wager(1, bet.bet_id, "A", 100).await.unwrap();
    sys.wagers.place_wager(2, bet.bet_id, "B", 100).await.unwrap();

    let resolver = {
        let wagers = sys.wagers.clone();
        tokio::spawn(async move { wagers.resolve_bet(bet.bet_id, "A").await.is_ok() })
    };
    let canceller = {
        let wagers = sys.wagers.clone();
        tokio::spawn(async move { wagers.cancel_bet(bet.bet_id).await.is_ok() })
    };
    let resolved = resolver.await.unwrap();
    let cancelled = canceller.await.unwrap();
    assert!(resolved ^ cancelled);

    let status = sys.wagers.get_bet(bet.bet_id).await.unwrap().status;
    if resolved {
        assert_eq!(status, BetStatus::Resolved);
        assert_eq!(sys.balance(1).await + sys.balance(2).await, 2000);
        assert_eq!(sys.balance(1).await, 1100);
    } else {
        assert_eq!(status, BetStatus::Cancelled);
        assert_eq!(sys.balance(1).await, 1000);
        assert_eq!(sys.balance(2).await, 1000);
    }
    cleanup(path);
}

#[tokio::test]
async fn test_overlapping_reward_runs_pay_once() {
    let (sys, path) = file_system().await;
    sys.register(&[1, 2, 3]).await;
    for account in 1..=3 {
        for i in 0..3 {
            let at = t0() + Duration::seconds(20 * i);
            sys.activity.record_message(account, 4, 1, 15, at).await.unwrap();
        }
    }
    let (start, end) = aligned_period(t0(), Duration::days(1));

    let runs = (0..4).map(|_| {
        let activity = sys.activity.clone();
        tokio::spawn(async move { activity.process_rewards(start, end, None).await })
    });
    let awarded: i64 = join_all(runs)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().total_points_awarded)
        .sum();

    assert_eq!(awarded, 18);
    assert_eq!(sys.total_points().await, 3000 + 18);
    cleanup(path);
}
