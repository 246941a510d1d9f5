//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the notification webhook URL) are referenced by env-var name in
//! the config and resolved at runtime via `std::env::var`.
//!
//! Per-community activity settings live here too: one fully-enumerated
//! struct whose defaults are stated once in its `Default` impl.

use anyhow::{Context, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::str::FromStr;

use crate::types::{ChannelId, LedgerError, LedgerResult};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub activity: ActivitySettings,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://wagerbook.db`.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Fixed amounts for the point economy.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EconomyConfig {
    pub starting_balance: i64,
    pub daily_bonus: i64,
    pub bailout_amount: i64,
    pub claim_cooldown_hours: i64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            starting_balance: 1000,
            daily_bonus: 100,
            bailout_amount: 50,
            claim_cooldown_hours: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Length of one reward period; runs fire once per period.
    pub reward_period_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reward_period_secs: 86_400,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotificationsConfig {
    /// Env var holding the webhook URL; notifications only go to the log when unset.
    pub webhook_url_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config
            .activity
            .validate()
            .context("Invalid [activity] defaults")?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

// ---------------------------------------------------------------------------
// Activity settings
// ---------------------------------------------------------------------------

/// Activity-reward settings for one community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitySettings {
    pub enabled: bool,
    pub points_per_message: i64,
    pub message_cooldown_secs: i64,
    pub max_messages_per_hour: i64,
    pub min_message_length: usize,
    pub bonus_multiplier: Decimal,
    pub excluded_channels: BTreeSet<ChannelId>,
    /// Enforced by the caller, which holds the member's roles.
    pub excluded_roles: BTreeSet<i64>,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            points_per_message: 2,
            message_cooldown_secs: 60,
            max_messages_per_hour: 50,
            min_message_length: 3,
            bonus_multiplier: dec!(1.0),
            excluded_channels: BTreeSet::new(),
            excluded_roles: BTreeSet::new(),
        }
    }
}

impl ActivitySettings {
    /// Build settings from a plain key/value record, starting from `base`
    /// for every key the record leaves out.
    pub fn from_record(base: &Self, record: &HashMap<String, String>) -> LedgerResult<Self> {
        let mut settings = base.clone();
        for (key, value) in record {
            let value = value.trim();
            match key.to_lowercase().as_str() {
                "enabled" => settings.enabled = parse_bool(key, value)?,
                "points" | "points_per_message" => {
                    settings.points_per_message = parse_num(key, value)?
                }
                "cooldown" | "message_cooldown" | "message_cooldown_secs" => {
                    settings.message_cooldown_secs = parse_num(key, value)?
                }
                "max_messages" | "max_messages_per_hour" => {
                    settings.max_messages_per_hour = parse_num(key, value)?
                }
                "min_length" | "min_message_length" => {
                    settings.min_message_length = parse_num(key, value)?
                }
                "bonus" | "bonus_multiplier" => settings.bonus_multiplier = parse_num(key, value)?,
                "excluded_channels" => settings.excluded_channels = parse_id_set(key, value)?,
                "excluded_roles" => settings.excluded_roles = parse_id_set(key, value)?,
                _ => return Err(LedgerError::InvalidSetting(format!("unknown setting '{key}'"))),
            }
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Range checks for admin-supplied values.
    pub fn validate(&self) -> LedgerResult<()> {
        check_range("points_per_message", self.points_per_message, 1, 10)?;
        check_range("message_cooldown_secs", self.message_cooldown_secs, 10, 300)?;
        check_range("max_messages_per_hour", self.max_messages_per_hour, 10, 100)?;
        check_range("min_message_length", self.min_message_length, 1, 20)?;
        check_range("bonus_multiplier", self.bonus_multiplier, dec!(0.5), dec!(3.0))?;
        Ok(())
    }

    /// Points for `messages` newly counted messages, floored.
    pub fn points_for(&self, messages: i64) -> i64 {
        let raw = Decimal::from(messages) * Decimal::from(self.points_per_message)
            * self.bonus_multiplier;
        raw.floor().to_i64().unwrap_or(0)
    }
}

fn check_range<T: PartialOrd + std::fmt::Display>(name: &str, value: T, min: T, max: T) -> LedgerResult<()> {
    if value < min || value > max {
        return Err(LedgerError::InvalidSetting(format!(
            "{name} must be between {min} and {max} (got {value})"
        )));
    }
    Ok(())
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> LedgerResult<T> {
    value
        .parse()
        .map_err(|_| LedgerError::InvalidSetting(format!("{key}: not a number: '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> LedgerResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(LedgerError::InvalidSetting(format!("{key}: not a boolean: '{value}'"))),
    }
}

/// Accepts a JSON array (`[1, 2]`) or a comma-separated list (`1,2`).
fn parse_id_set(key: &str, value: &str) -> LedgerResult<BTreeSet<i64>> {
    if value.starts_with('[') {
        return serde_json::from_str(value)
            .map_err(|e| LedgerError::InvalidSetting(format!("{key}: {e}")));
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_num(key, s))
        .collect()
}
