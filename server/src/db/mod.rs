use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sql_query;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{EngineError, EngineResult};

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Connection customizer applied to every pooled connection.
///
/// The ledger relies on CHECK constraints and partial unique indexes for
/// its balance and single-pending-contract invariants, so foreign keys and
/// a generous busy timeout are non-negotiable here.
#[derive(Debug, Clone, Copy)]
struct LedgerConnectionCustomizer;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for LedgerConnectionCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        // Enforce FK constraints between escrows, milestones and transactions
        sql_query("PRAGMA foreign_keys = ON;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        // WAL lets the expiry watchdog read while settlements write
        sql_query("PRAGMA journal_mode = WAL;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        // Wait up to 5 seconds for locks instead of failing immediately
        sql_query("PRAGMA busy_timeout = 5000;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA synchronous = NORMAL;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        // Use RAM for temporary tables/indexes
        sql_query("PRAGMA temp_store = MEMORY;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        Ok(())
    }
}

/// Create a database connection pool.
///
/// # Arguments
/// * `database_url` - Path to the SQLite database file
pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);

    let pool = r2d2::Pool::builder()
        .max_size(16)
        .connection_timeout(std::time::Duration::from_secs(30))
        .connection_customizer(Box::new(LedgerConnectionCustomizer))
        .build(manager)
        .context("Failed to create database connection pool")?;

    Ok(pool)
}

/// Run embedded migrations against the pool. Called once on startup and by
/// test fixtures against temp databases.
pub fn run_migrations(pool: &DbPool) -> Result<()> {
    let mut conn = pool.get().context("Failed to get DB connection")?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    Ok(())
}

/// Run a blocking diesel closure on the tokio blocking pool.
///
/// All ledger mutations go through here so the async handlers never hold a
/// pooled connection across an await point.
pub async fn with_conn<F, T>(pool: &DbPool, f: F) -> EngineResult<T>
where
    F: FnOnce(&mut SqliteConnection) -> EngineResult<T> + Send + 'static,
    T: Send + 'static,
{
    let mut conn = pool
        .get()
        .context("Failed to get DB connection")
        .map_err(EngineError::Internal)?;
    tokio::task::spawn_blocking(move || f(&mut conn))
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("blocking task panicked: {}", e)))?
}

/// Like [`with_conn`] but wraps the closure in a single SQLite transaction.
///
/// Guarded updates inside the closure report [`EngineError::ConcurrentModification`]
/// when a compare-and-set loses; callers surface that as a retryable 503.
pub async fn with_transaction<F, T>(pool: &DbPool, f: F) -> EngineResult<T>
where
    F: FnOnce(&mut SqliteConnection) -> EngineResult<T> + Send + 'static,
    T: Send + 'static,
{
    with_conn(pool, move |conn| {
        conn.transaction(|conn| f(conn).map_err(EngineTxError))
            .map_err(|EngineTxError(e)| e)
    })
    .await
}

/// Like [`with_transaction`] but retries lock contention a bounded number of
/// times with a short backoff.
///
/// Only [`EngineError::ConcurrentModification`] is retried; domain errors
/// surface immediately. Intended for writes that must land because an
/// external side effect already happened, such as recording a confirmed
/// payout.
pub async fn with_transaction_retry<F, T>(pool: &DbPool, attempts: u32, f: F) -> EngineResult<T>
where
    F: Fn(&mut SqliteConnection) -> EngineResult<T> + Clone + Send + 'static,
    T: Send + 'static,
{
    let mut attempt = 1;
    loop {
        match with_transaction(pool, f.clone()).await {
            Err(EngineError::ConcurrentModification) if attempt < attempts => {
                tracing::warn!(attempt = attempt, "write lost a lock race, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(50 * u64::from(attempt)))
                    .await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Newtype so EngineError can flow through diesel's transaction error plumbing.
struct EngineTxError(EngineError);

impl From<diesel::result::Error> for EngineTxError {
    fn from(e: diesel::result::Error) -> Self {
        EngineTxError(map_diesel_error(e))
    }
}

/// Map diesel errors onto the engine taxonomy.
///
/// CHECK constraint violations come from the wallets table balance guards,
/// so a raw constraint failure on a debit path means insufficient funds was
/// detected by the database rather than the preflight read.
pub fn map_diesel_error(e: diesel::result::Error) -> EngineError {
    use diesel::result::{DatabaseErrorKind, Error};
    match e {
        Error::NotFound => EngineError::NotFound("record".to_string()),
        Error::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
            EngineError::ConcurrentModification
        }
        Error::DatabaseError(_, ref info) if info.message().contains("database is locked") => {
            EngineError::ConcurrentModification
        }
        other => EngineError::Internal(anyhow::anyhow!("database error: {}", other)),
    }
}
