//! Activity accrual: rate-limited message counting and batch rewards.
//!
//! Ingestion increments a per (account, community, hour) window, subject to
//! the community's cooldown and hourly cap. The batch job converts counted
//! messages into points for a reward period. Each hour window keeps a count
//! of messages already paid for, so any run over any period, overlapping or
//! repeated, only pays for messages no earlier run has paid for.

pub mod cooldown;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ActivitySettings;
use crate::ledger::{fetch_account, AccountLedger};
use crate::notify::{notify, EventSink, LedgerEvent};
use crate::types::{
    AccountId, ActivityRewardRecord, ActivityStats, ActivityWindow, ChannelId, CommunityId,
    IngestOutcome, LedgerError, LedgerResult, RewardRunReport, TransactionKind,
};
use cooldown::CooldownCache;

const SECS_PER_HOUR: i64 = 3600;
const MAX_STATS_DAYS: i64 = 365;

/// Start of the hour containing `at`, as unix seconds.
pub fn hour_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(SECS_PER_HOUR) * SECS_PER_HOUR
}

/// The fixed reward period of length `period` containing `at`.
///
/// Periods are aligned to the unix epoch so every run over the same stretch
/// of time uses the same period bounds.
pub fn aligned_period(at: DateTime<Utc>, period: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    let len = period.num_seconds().max(SECS_PER_HOUR);
    let start = at.timestamp().div_euclid(len) * len;
    let start = Utc.timestamp_opt(start, 0).single().unwrap_or(at);
    (start, start + Duration::seconds(len))
}

/// The most recent period of length `period` that has fully elapsed at `at`.
pub fn completed_period(at: DateTime<Utc>, period: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    let (current_start, _) = aligned_period(at, period);
    aligned_period(current_start - Duration::seconds(1), period)
}

pub struct ActivityAccrual {
    ledger: Arc<AccountLedger>,
    sink: Arc<dyn EventSink>,
    defaults: ActivitySettings,
    cache: CooldownCache,
}

impl ActivityAccrual {
    pub fn new(
        ledger: Arc<AccountLedger>,
        sink: Arc<dyn EventSink>,
        defaults: ActivitySettings,
    ) -> Self {
        Self { ledger, sink, defaults, cache: CooldownCache::default() }
    }

    // -- Settings ----------------------------------------------------------

    /// The community's settings, or the configured defaults if it has none.
    pub async fn settings(&self, community_id: CommunityId) -> LedgerResult<ActivitySettings> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT settings FROM activity_settings WHERE community_id = ?")
                .bind(community_id)
                .fetch_optional(self.ledger.store().pool())
                .await?;

        match stored {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(self.defaults.clone()),
        }
    }

    pub async fn update_settings(
        &self,
        community_id: CommunityId,
        settings: &ActivitySettings,
    ) -> LedgerResult<()> {
        settings.validate()?;
        let json = serde_json::to_string(settings)?;

        let mut unit = self.ledger.store().begin_write().await?;
        sqlx::query(
            "INSERT INTO activity_settings (community_id, settings, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (community_id) DO UPDATE
             SET settings = excluded.settings, updated_at = excluded.updated_at",
        )
        .bind(community_id)
        .bind(json)
        .bind(self.ledger.now())
        .execute(unit.conn())
        .await?;
        unit.commit().await?;

        info!(
            community_id,
            enabled = settings.enabled,
            points_per_message = settings.points_per_message,
            cooldown_secs = settings.message_cooldown_secs,
            max_per_hour = settings.max_messages_per_hour,
            bonus = %settings.bonus_multiplier,
            "Activity settings updated"
        );
        Ok(())
    }

    /// Apply a plain key/value record on top of the community's current
    /// settings and store the result.
    pub async fn configure(
        &self,
        community_id: CommunityId,
        record: &HashMap<String, String>,
    ) -> LedgerResult<ActivitySettings> {
        let current = self.settings(community_id).await?;
        let updated = ActivitySettings::from_record(&current, record)?;
        self.update_settings(community_id, &updated).await?;
        Ok(updated)
    }

    // -- Ingestion ---------------------------------------------------------

    /// Count one message toward the account's hourly window, unless the
    /// community's rules say otherwise. Rejections change nothing.
    pub async fn record_message(
        &self,
        account_id: AccountId,
        community_id: CommunityId,
        channel_id: ChannelId,
        message_length: usize,
        now: DateTime<Utc>,
    ) -> LedgerResult<IngestOutcome> {
        let settings = self.settings(community_id).await?;
        if !settings.enabled {
            return Ok(IngestOutcome::Disabled);
        }
        if message_length < settings.min_message_length {
            return Ok(IngestOutcome::TooShort);
        }
        if settings.excluded_channels.contains(&channel_id) {
            return Ok(IngestOutcome::ExcludedChannel);
        }

        let key = (account_id, community_id);
        let bucket = hour_bucket(now);
        if self.cache.in_cooldown(key, bucket, now, settings.message_cooldown_secs) {
            return Ok(IngestOutcome::Cooldown);
        }

        let mut unit = self.ledger.store().begin_write().await?;
        let window = sqlx::query_as::<_, ActivityWindow>(
            "SELECT * FROM activity_windows
             WHERE account_id = ? AND community_id = ? AND hour_bucket = ?",
        )
        .bind(account_id)
        .bind(community_id)
        .bind(bucket)
        .fetch_optional(unit.conn())
        .await?;

        let hour_count = match window {
            Some(w) => {
                if now - w.last_message_at < Duration::seconds(settings.message_cooldown_secs) {
                    return Ok(IngestOutcome::Cooldown);
                }
                if w.message_count >= settings.max_messages_per_hour {
                    return Ok(IngestOutcome::HourlyCapReached);
                }
                sqlx::query(
                    "UPDATE activity_windows
                     SET message_count = message_count + 1, last_message_at = ?, channel_id = ?
                     WHERE account_id = ? AND community_id = ? AND hour_bucket = ?",
                )
                .bind(now)
                .bind(channel_id)
                .bind(account_id)
                .bind(community_id)
                .bind(bucket)
                .execute(unit.conn())
                .await?;
                w.message_count + 1
            }
            None => {
                sqlx::query(
                    "INSERT INTO activity_windows
                        (account_id, community_id, channel_id, hour_bucket, message_count, last_message_at)
                     VALUES (?, ?, ?, ?, 1, ?)",
                )
                .bind(account_id)
                .bind(community_id)
                .bind(channel_id)
                .bind(bucket)
                .bind(now)
                .execute(unit.conn())
                .await?;
                1
            }
        };
        unit.commit().await?;
        self.cache.record(key, bucket, now);

        debug!(account_id, community_id, channel_id, hour_count, "Message counted");
        Ok(IngestOutcome::Counted { hour_count })
    }

    // -- Batch rewards -----------------------------------------------------

    /// Pay for messages counted in hour windows starting within
    /// `[period_start, period_end)` that no earlier run has paid for. Safe to
    /// re-run, and safe to run over periods that overlap earlier ones.
    pub async fn process_rewards(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        community: Option<CommunityId>,
    ) -> LedgerResult<RewardRunReport> {
        if period_end <= period_start {
            return Err(LedgerError::InvalidSetting(format!(
                "reward period end {period_end} is not after start {period_start}"
            )));
        }

        let active: Vec<(AccountId, CommunityId)> = sqlx::query_as(
            "SELECT account_id, community_id
             FROM activity_windows
             WHERE hour_bucket >= ? AND hour_bucket < ? AND (? IS NULL OR community_id = ?)
             GROUP BY account_id, community_id
             ORDER BY community_id, account_id",
        )
        .bind(period_start.timestamp())
        .bind(period_end.timestamp())
        .bind(community)
        .bind(community)
        .fetch_all(self.ledger.store().pool())
        .await?;

        let mut settings_by_community: HashMap<CommunityId, ActivitySettings> = HashMap::new();
        let mut communities = BTreeSet::new();
        let mut report = RewardRunReport::default();

        for (account_id, community_id) in active {
            communities.insert(community_id);
            let settings = match settings_by_community.get(&community_id) {
                Some(s) => s.clone(),
                None => {
                    let s = self.settings(community_id).await?;
                    settings_by_community.insert(community_id, s.clone());
                    s
                }
            };

            let awarded = self
                .reward_one(account_id, community_id, &settings, (period_start, period_end))
                .await?;
            if awarded > 0 {
                report.accounts_processed += 1;
                report.total_points_awarded += awarded;
            }
        }
        report.communities_processed = communities.len();

        info!(
            period_start = %period_start,
            period_end = %period_end,
            community = ?community,
            accounts = report.accounts_processed,
            communities = report.communities_processed,
            points = report.total_points_awarded,
            "Activity rewards processed"
        );
        if report.total_points_awarded > 0 {
            notify(&self.sink, LedgerEvent::RewardsProcessed { report }).await;
        }
        Ok(report)
    }

    /// Credit one (account, community) for the unpaid messages in its hour
    /// windows within the period. Returns the points awarded.
    async fn reward_one(
        &self,
        account_id: AccountId,
        community_id: CommunityId,
        settings: &ActivitySettings,
        (period_start, period_end): (DateTime<Utc>, DateTime<Utc>),
    ) -> LedgerResult<i64> {
        let mut unit = self.ledger.store().begin_write().await?;

        let windows: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT hour_bucket, message_count, messages_rewarded
             FROM activity_windows
             WHERE account_id = ? AND community_id = ? AND hour_bucket >= ? AND hour_bucket < ?
             ORDER BY hour_bucket",
        )
        .bind(account_id)
        .bind(community_id)
        .bind(period_start.timestamp())
        .bind(period_end.timestamp())
        .fetch_all(unit.conn())
        .await?;

        let unpaid: Vec<(i64, i64)> = windows
            .into_iter()
            .map(|(bucket, count, rewarded)| {
                let payable = count.min(settings.max_messages_per_hour);
                (bucket, (payable - rewarded).max(0))
            })
            .filter(|(_, n)| *n > 0)
            .collect();

        let new_messages: i64 = unpaid.iter().map(|(_, n)| n).sum();
        if new_messages == 0 {
            return Ok(0);
        }
        let points = settings.points_for(new_messages);
        if points <= 0 {
            return Ok(0);
        }

        if fetch_account(unit.conn(), account_id).await?.is_none() {
            warn!(
                account_id,
                community_id,
                points,
                "Skipping activity reward for unregistered account"
            );
            return Ok(0);
        }

        let description = format!("Activity reward: {new_messages} messages");
        self.ledger
            .credit_in(
                &mut unit,
                account_id,
                points,
                TransactionKind::ActivityReward,
                None,
                Some(description.as_str()),
            )
            .await?;

        for &(bucket, paid) in &unpaid {
            sqlx::query(
                "UPDATE activity_windows SET messages_rewarded = messages_rewarded + ?
                 WHERE account_id = ? AND community_id = ? AND hour_bucket = ?",
            )
            .bind(paid)
            .bind(account_id)
            .bind(community_id)
            .bind(bucket)
            .execute(unit.conn())
            .await?;
        }

        sqlx::query(
            "INSERT INTO activity_rewards
                (account_id, community_id, period_start, period_end, messages_counted,
                 points_awarded, bonus_multiplier, processed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (account_id, community_id, period_start, period_end) DO UPDATE
             SET messages_counted = messages_counted + excluded.messages_counted,
                 points_awarded = points_awarded + excluded.points_awarded,
                 bonus_multiplier = excluded.bonus_multiplier,
                 processed_at = excluded.processed_at",
        )
        .bind(account_id)
        .bind(community_id)
        .bind(period_start)
        .bind(period_end)
        .bind(new_messages)
        .bind(points)
        .bind(settings.bonus_multiplier.to_string())
        .bind(self.ledger.now())
        .execute(unit.conn())
        .await?;
        unit.commit().await?;

        debug!(account_id, community_id, new_messages, points, "Activity reward credited");
        Ok(points)
    }

    // -- Queries -----------------------------------------------------------

    /// Reward totals over the trailing `days` (clamped to 1..=365).
    pub async fn activity_stats(
        &self,
        account_id: AccountId,
        community_id: CommunityId,
        days: i64,
    ) -> LedgerResult<ActivityStats> {
        let days = days.clamp(1, MAX_STATS_DAYS);
        let since = self.ledger.now() - Duration::days(days);

        let (points, messages, periods): (i64, i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(points_awarded), 0), COALESCE(SUM(messages_counted), 0), COUNT(*)
             FROM activity_rewards
             WHERE account_id = ? AND community_id = ? AND processed_at >= ?",
        )
        .bind(account_id)
        .bind(community_id)
        .bind(since)
        .fetch_one(self.ledger.store().pool())
        .await?;

        Ok(ActivityStats {
            days,
            total_points_earned: points,
            total_messages: messages,
            reward_periods: periods,
            average_points_per_day: points as f64 / days as f64,
            average_messages_per_day: messages as f64 / days as f64,
        })
    }

    /// Reward records for the account in one community, newest period first.
    pub async fn reward_history(
        &self,
        account_id: AccountId,
        community_id: CommunityId,
        limit: i64,
    ) -> LedgerResult<Vec<ActivityRewardRecord>> {
        type Row = (
            AccountId,
            CommunityId,
            DateTime<Utc>,
            DateTime<Utc>,
            i64,
            i64,
            String,
            DateTime<Utc>,
        );
        let rows: Vec<Row> = sqlx::query_as(
            "SELECT account_id, community_id, period_start, period_end, messages_counted,
                    points_awarded, bonus_multiplier, processed_at
             FROM activity_rewards
             WHERE account_id = ? AND community_id = ?
             ORDER BY period_start DESC LIMIT ?",
        )
        .bind(account_id)
        .bind(community_id)
        .bind(limit.max(1))
        .fetch_all(self.ledger.store().pool())
        .await?;

        rows.into_iter()
            .map(|(account_id, community_id, start, end, messages, points, bonus, processed_at)| {
                let bonus_multiplier = Decimal::from_str(&bonus).map_err(|e| {
                    LedgerError::Serialization(format!("bonus_multiplier '{bonus}': {e}"))
                })?;
                Ok(ActivityRewardRecord {
                    account_id,
                    community_id,
                    period_start: start,
                    period_end: end,
                    messages_counted: messages,
                    points_awarded: points,
                    bonus_multiplier,
                    processed_at,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
