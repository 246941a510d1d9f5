//! Table definitions, applied idempotently at startup.

pub const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        account_id          INTEGER PRIMARY KEY,
        display_name        TEXT NOT NULL,
        balance             INTEGER NOT NULL CHECK (balance >= 0),
        bets_placed         INTEGER NOT NULL DEFAULT 0,
        bets_won            INTEGER NOT NULL DEFAULT 0,
        amount_won          INTEGER NOT NULL DEFAULT 0,
        amount_lost         INTEGER NOT NULL DEFAULT 0,
        last_daily_claim    TEXT NULL,
        last_bailout_claim  TEXT NULL,
        registered_at       TEXT NOT NULL,
        last_active_at      TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        transaction_id  INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id      INTEGER NOT NULL REFERENCES accounts (account_id),
        amount          INTEGER NOT NULL,
        kind            TEXT NOT NULL CHECK (kind IN (
                            'wager_placed', 'wager_won', 'wager_lost', 'wager_refunded',
                            'daily_bonus', 'bailout', 'admin_adjustment', 'activity_reward')),
        reference_id    INTEGER NULL,
        balance_before  INTEGER NOT NULL,
        balance_after   INTEGER NOT NULL CHECK (balance_after = balance_before + amount),
        description     TEXT NULL,
        created_at      TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS bets (
        bet_id          INTEGER PRIMARY KEY AUTOINCREMENT,
        creator_id      INTEGER NOT NULL,
        title           TEXT NOT NULL,
        description     TEXT NULL,
        options         TEXT NOT NULL,
        total_pool      INTEGER NOT NULL DEFAULT 0,
        status          TEXT NOT NULL DEFAULT 'open'
                            CHECK (status IN ('open', 'locked', 'resolved', 'cancelled')),
        created_at      TEXT NOT NULL,
        resolved_at     TEXT NULL,
        winning_option  TEXT NULL
    )",
    "CREATE TABLE IF NOT EXISTS wagers (
        wager_id        INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id      INTEGER NOT NULL REFERENCES accounts (account_id),
        bet_id          INTEGER NOT NULL REFERENCES bets (bet_id),
        option_chosen   TEXT NOT NULL,
        amount          INTEGER NOT NULL CHECK (amount > 0),
        payout          INTEGER NOT NULL DEFAULT 0,
        status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'won', 'lost', 'refunded')),
        created_at      TEXT NOT NULL,
        UNIQUE (account_id, bet_id)
    )",
    "CREATE TABLE IF NOT EXISTS activity_windows (
        account_id       INTEGER NOT NULL,
        community_id     INTEGER NOT NULL,
        channel_id       INTEGER NOT NULL,
        hour_bucket      INTEGER NOT NULL,
        message_count      INTEGER NOT NULL DEFAULT 1,
        messages_rewarded  INTEGER NOT NULL DEFAULT 0,
        last_message_at    TEXT NOT NULL,
        UNIQUE (account_id, community_id, hour_bucket)
    )",
    "CREATE TABLE IF NOT EXISTS activity_rewards (
        account_id        INTEGER NOT NULL,
        community_id      INTEGER NOT NULL,
        period_start      TEXT NOT NULL,
        period_end        TEXT NOT NULL,
        messages_counted  INTEGER NOT NULL,
        points_awarded    INTEGER NOT NULL,
        bonus_multiplier  TEXT NOT NULL,
        processed_at      TEXT NOT NULL,
        UNIQUE (account_id, community_id, period_start, period_end)
    )",
    "CREATE TABLE IF NOT EXISTS activity_settings (
        community_id  INTEGER PRIMARY KEY,
        settings      TEXT NOT NULL,
        updated_at    TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions (account_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_kind ON transactions (kind)",
    "CREATE INDEX IF NOT EXISTS idx_bets_status ON bets (status)",
    "CREATE INDEX IF NOT EXISTS idx_wagers_bet ON wagers (bet_id)",
    "CREATE INDEX IF NOT EXISTS idx_activity_windows_bucket ON activity_windows (hour_bucket)",
    "CREATE INDEX IF NOT EXISTS idx_activity_rewards_account
        ON activity_rewards (account_id, community_id)",
];
