//! Shared setup for integration tests.
//!
//! Builds the ledger, wager engine and activity accrual over a fresh store,
//! with a manual clock and a sink that records every event in memory.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use wagerbook::activity::ActivityAccrual;
use wagerbook::clock::ManualClock;
use wagerbook::config::{ActivitySettings, EconomyConfig};
use wagerbook::ledger::AccountLedger;
use wagerbook::notify::{EventSink, LedgerEvent};
use wagerbook::storage::Store;
use wagerbook::types::AccountId;
use wagerbook::wager::WagerEngine;

/// Event sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LedgerEvent>>,
    /// If set, every publish fails after recording.
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self { events: Mutex::new(Vec::new()), fail: true }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(LedgerEvent::name).collect()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: &LedgerEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            return Err(anyhow!("sink unavailable"));
        }
        Ok(())
    }
}

pub struct System {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<AccountLedger>,
    pub wagers: Arc<WagerEngine>,
    pub activity: Arc<ActivityAccrual>,
    pub sink: Arc<RecordingSink>,
}

impl System {
    pub async fn balance(&self, account_id: AccountId) -> i64 {
        self.ledger.get_account(account_id).await.unwrap().balance
    }

    /// Sum of every account balance.
    pub async fn total_points(&self) -> i64 {
        sqlx::query_scalar("SELECT COALESCE(SUM(balance), 0) FROM accounts")
            .fetch_one(self.ledger.store().pool())
            .await
            .unwrap()
    }

    pub async fn register(&self, ids: &[AccountId]) {
        for id in ids {
            self.ledger.get_or_create(*id, &format!("user-{id}")).await.unwrap();
        }
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

pub fn activity_settings() -> ActivitySettings {
    ActivitySettings {
        points_per_message: 2,
        message_cooldown_secs: 10,
        max_messages_per_hour: 20,
        min_message_length: 3,
        ..ActivitySettings::default()
    }
}

fn assemble(store: Store, sink: Arc<RecordingSink>) -> System {
    let clock = Arc::new(ManualClock::new(t0()));
    let ledger = Arc::new(AccountLedger::new(store, clock.clone(), EconomyConfig::default()));
    System {
        wagers: Arc::new(WagerEngine::new(ledger.clone(), sink.clone())),
        activity: Arc::new(ActivityAccrual::new(ledger.clone(), sink.clone(), activity_settings())),
        ledger,
        clock,
        sink,
    }
}

/// In-memory system with a recording sink.
pub async fn system() -> System {
    system_with_sink(RecordingSink::default()).await
}

pub async fn system_with_sink(sink: RecordingSink) -> System {
    let store = Store::in_memory().await.unwrap();
    assemble(store, Arc::new(sink))
}

/// File-backed system with a multi-connection pool, for concurrency tests.
pub async fn file_system() -> (System, PathBuf) {
    let path = std::env::temp_dir().join(format!("wagerbook-it-{}.db", Uuid::new_v4()));
    let store = Store::open(&format!("sqlite://{}", path.display()), 4).await.unwrap();
    (assemble(store, Arc::new(RecordingSink::default())), path)
}

pub fn cleanup(path: PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
}

pub fn opts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
