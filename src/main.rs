//! WAGERBOOK: points ledger, pari-mutuel wagering and activity rewards
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the ledger store, serves the HTTP API, and runs the periodic activity
//! reward job with graceful shutdown.

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use wagerbook::activity::{completed_period, ActivityAccrual};
use wagerbook::api::{self, ApiState};
use wagerbook::clock::{Clock, SystemClock};
use wagerbook::config;
use wagerbook::ledger::AccountLedger;
use wagerbook::notify::{EventSink, TracingSink, WebhookSink};
use wagerbook::storage::Store;
use wagerbook::wager::WagerEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("WAGERBOOK_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    info!(
        database = %cfg.database.url,
        starting_balance = cfg.economy.starting_balance,
        daily_bonus = cfg.economy.daily_bonus,
        reward_period_secs = cfg.scheduler.reward_period_secs,
        "WAGERBOOK starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = Store::open(&cfg.database.url, cfg.database.max_connections).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sink = build_sink(&cfg)?;

    let ledger = Arc::new(AccountLedger::new(store.clone(), clock.clone(), cfg.economy.clone()));
    let wagers = Arc::new(WagerEngine::new(ledger.clone(), sink.clone()));
    let activity = Arc::new(ActivityAccrual::new(ledger.clone(), sink, cfg.activity.clone()));

    // Surface any drift left behind by a previous run
    let drifted = ledger.audit_all().await?;
    if !drifted.is_empty() {
        warn!(accounts = drifted.len(), "Balances disagree with the audit log");
    }

    let server = if cfg.server.enabled {
        let state = Arc::new(ApiState {
            ledger: ledger.clone(),
            wagers: wagers.clone(),
            activity: activity.clone(),
        });
        Some(api::spawn_server(state, cfg.server.port).await?)
    } else {
        None
    };

    // -- Scheduler loop --------------------------------------------------

    let period = ChronoDuration::seconds(cfg.scheduler.reward_period_secs as i64);
    let tick = Duration::from_secs(cfg.scheduler.reward_period_secs.max(60));
    let mut interval = tokio::time::interval(tick);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        scheduler = cfg.scheduler.enabled,
        interval_secs = cfg.scheduler.reward_period_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick(), if cfg.scheduler.enabled => {
                let (start, end) = completed_period(clock.now(), period);
                match activity.process_rewards(start, end, None).await {
                    Ok(report) => info!(
                        period_start = %start,
                        period_end = %end,
                        accounts = report.accounts_processed,
                        points = report.total_points_awarded,
                        "Reward run complete"
                    ),
                    Err(e) => {
                        error!(
                            error = %e,
                            retryable = e.is_retryable(),
                            "Reward run failed; retrying next tick"
                        );
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    if let Some(handle) = server {
        handle.abort();
    }
    store.close().await;
    info!("WAGERBOOK shut down cleanly.");

    Ok(())
}

/// Webhook sink when its env var is configured and set, log sink otherwise.
fn build_sink(cfg: &config::AppConfig) -> Result<Arc<dyn EventSink>> {
    let Some(env_name) = cfg.notifications.webhook_url_env.as_deref() else {
        return Ok(Arc::new(TracingSink));
    };

    match config::AppConfig::resolve_env(env_name) {
        Ok(url) => {
            info!(env = env_name, "Publishing ledger events to webhook");
            let sink = WebhookSink::new(SecretString::new(url))
                .context("Failed to set up webhook sink")?;
            Ok(Arc::new(sink))
        }
        Err(e) => {
            warn!(error = %e, "Webhook not configured; events go to the log only");
            Ok(Arc::new(TracingSink))
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wagerbook=info"));

    let json_logging = std::env::var("WAGERBOOK_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
