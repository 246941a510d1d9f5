//! Notification sinks.
//!
//! The engines publish an event only after the ledger change it describes
//! has been committed. A sink failure is logged and never rolls anything
//! back, so sinks are free to do network I/O.

pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::types::{Bet, BetId, BetStatus, CancellationReport, ResolutionReport, RewardRunReport};

pub use webhook::WebhookSink;

/// Something observers of the ledger may want to announce.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    BetCreated { bet: Bet },
    BetStatusChanged { bet_id: BetId, from: BetStatus, to: BetStatus },
    BetResolved { title: String, report: ResolutionReport },
    BetCancelled { title: String, report: CancellationReport },
    RewardsProcessed { report: RewardRunReport },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::BetCreated { .. } => "bet_created",
            LedgerEvent::BetStatusChanged { .. } => "bet_status_changed",
            LedgerEvent::BetResolved { .. } => "bet_resolved",
            LedgerEvent::BetCancelled { .. } => "bet_cancelled",
            LedgerEvent::RewardsProcessed { .. } => "rewards_processed",
        }
    }
}

/// Destination for committed-change notifications.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &LedgerEvent) -> Result<()>;
}

/// Publish and swallow failures.
pub async fn notify(sink: &Arc<dyn EventSink>, event: LedgerEvent) {
    if let Err(e) = sink.publish(&event).await {
        warn!(event = event.name(), error = %e, "Notification failed; ledger change stands");
    }
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn publish(&self, event: &LedgerEvent) -> Result<()> {
        match event {
            LedgerEvent::BetCreated { bet } => {
                info!(bet_id = bet.bet_id, title = %bet.title, options = ?bet.options, "Bet created")
            }
            LedgerEvent::BetStatusChanged { bet_id, from, to } => {
                info!(bet_id, %from, %to, "Bet status changed")
            }
            LedgerEvent::BetResolved { title, report } => info!(
                bet_id = report.bet_id,
                title = %title,
                winning_option = %report.winning_option,
                winners = report.winner_count,
                losers = report.loser_count,
                pool = report.total_pool,
                "Bet resolved"
            ),
            LedgerEvent::BetCancelled { title, report } => info!(
                bet_id = report.bet_id,
                title = %title,
                refunded = report.refunded_count,
                total_refunded = report.total_refunded,
                "Bet cancelled"
            ),
            LedgerEvent::RewardsProcessed { report } => info!(
                accounts = report.accounts_processed,
                points = report.total_points_awarded,
                "Activity rewards processed"
            ),
        }
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn publish(&self, _event: &LedgerEvent) -> Result<()> {
        Ok(())
    }
}
