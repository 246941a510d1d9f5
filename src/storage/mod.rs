//! Persistence layer.
//!
//! The ledger store is a single SQLite database accessed through a `sqlx`
//! pool. Reads go straight to the pool. Every read-then-write operation runs
//! as one SQL transaction opened through [`Store::begin_write`], which also
//! holds the in-process writer gate: SQLite admits one writer at a time, and
//! taking the gate first means a deferred transaction never has to upgrade
//! its lock while another writer holds it.

pub mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::types::LedgerResult;

/// Shared handle to the ledger database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl Store {
    /// Open (creating if missing) a file-backed database and apply the schema.
    pub async fn open(url: &str, max_connections: u32) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        info!(url, "Ledger store opened");
        Ok(store)
    }

    /// A private in-memory database. Uses a single connection that is never
    /// recycled, since each SQLite memory connection is its own database.
    pub async fn in_memory() -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        }
    }

    async fn migrate(&self) -> LedgerResult<()> {
        let mut conn = self.pool.acquire().await?;
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&mut *conn).await?;
        }
        debug!(statements = schema::STATEMENTS.len(), "Schema applied");
        Ok(())
    }

    /// Pool for read-only queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start an atomic unit. Nothing is visible to other callers until
    /// [`WriteUnit::commit`]; dropping the unit rolls it back.
    pub async fn begin_write(&self) -> LedgerResult<WriteUnit<'_>> {
        let gate = self.writer.lock().await;
        let tx = self.pool.begin().await?;
        Ok(WriteUnit { tx, _gate: gate })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// An open write transaction holding the writer gate.
///
/// Field order matters: the transaction is dropped (rolled back) before the
/// gate is released.
pub struct WriteUnit<'a> {
    tx: sqlx::Transaction<'static, Sqlite>,
    _gate: MutexGuard<'a, ()>,
}

impl WriteUnit<'_> {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> LedgerResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
