use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPoolOptions};
use sqlx::{PgPool, Postgres};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use tracing::{debug, warn};

use super::StoreError;
use crate::config::{DatabaseConfig, PoolConfig};

pub type DbPool = PgPool;

/// Build a pool that opens connections on first use; no I/O happens here
#[inline]
pub fn connect_lazy(database: &DatabaseConfig, pool: PoolConfig) -> Result<DbPool, StoreError> {
    let statement_timeout_ms = database.command_timeout().as_millis().to_string();
    let options = PgConnectOptions::from_str(&database.url)?
        .application_name("rag-store")
        .options([("statement_timeout", statement_timeout_ms)]);

    debug!(
        "Creating lazy pool for {} (min {}, max {})",
        database.redacted_url(),
        pool.min_connections,
        pool.max_connections
    );

    Ok(PgPoolOptions::new()
        .min_connections(pool.min_connections)
        .max_connections(pool.max_connections)
        .acquire_timeout(database.acquire_timeout())
        .test_before_acquire(true)
        .connect_lazy_with(options))
}

/// A pooled connection that is closed instead of returned to the pool unless
/// it has been marked clean.
///
/// Dropping the guard mid-transaction (error, timeout, cancelled future)
/// therefore never hands a connection with unknown transaction state to the
/// next caller.
pub struct GuardedConnection {
    conn: PoolConnection<Postgres>,
    clean: bool,
}

impl GuardedConnection {
    #[inline]
    pub async fn acquire(pool: &DbPool) -> Result<Self, sqlx::Error> {
        let conn = pool.acquire().await?;
        Ok(Self { conn, clean: false })
    }

    /// The connection's transaction state is known; it may go back to the pool
    #[inline]
    pub fn mark_clean(&mut self) {
        self.clean = true;
    }
}

impl Deref for GuardedConnection {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &self.conn
    }
}

impl DerefMut for GuardedConnection {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

impl Drop for GuardedConnection {
    fn drop(&mut self) {
        if !self.clean {
            warn!("Discarding pooled connection with uncertain transaction state");
            self.conn.close_on_drop();
        }
    }
}
