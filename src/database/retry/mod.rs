//! Bounded exponential-backoff retry for database round-trips.
//!
//! A [`RetryPolicy`] is composed explicitly at each call site: wrap the
//! operation in a closure and hand it to [`RetryPolicy::run`] (retry every
//! error) or [`RetryPolicy::run_if`] (retry only what the predicate accepts).
//! The `execute` / `fetch_all` / `fetch_scalar` helpers apply the policy to the
//! three sqlx query primitives, retrying transient failures only.


use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use sqlx::query::{Query, QueryScalar};
use sqlx::{FromRow, PgPool, Postgres};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    #[inline]
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_factor: backoff_factor.max(1.0),
        }
    }

    #[inline]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.backoff_factor,
        )
    }

    /// Store initialization at startup: three attempts, five seconds apart
    #[inline]
    pub fn startup() -> Self {
        Self::new(3, Duration::from_secs(5), 1.0)
    }

    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after the failed attempt with 0-based index `attempt`: `D * B^attempt`
    #[inline]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff_factor.powi(exponent);
        let secs = self.base_delay.as_secs_f64() * factor;
        if secs.is_finite() {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        }
    }

    /// Run `op` until it succeeds or the attempts are exhausted; the last error is returned
    #[inline]
    pub async fn run<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(operation, |_| true, op).await
    }

    /// Like [`run`](Self::run) but errors rejected by `should_retry` are returned immediately
    #[inline]
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        operation: &str,
        should_retry: P,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded on attempt {}", operation, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let last_attempt = attempt + 1 >= self.max_attempts;
                    if last_attempt || !should_retry(&err) {
                        if last_attempt && self.max_attempts > 1 {
                            error!(
                                "{} failed after {} attempts: {}",
                                operation, self.max_attempts, err
                            );
                        }
                        return Err(err);
                    }

                    let wait = self.delay_for(attempt);
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}",
                        operation,
                        attempt + 1,
                        self.max_attempts,
                        err,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Execute a statement against the pool
    #[inline]
    pub async fn execute<'q, F>(
        &self,
        pool: &PgPool,
        operation: &str,
        build: F,
    ) -> Result<PgQueryResult, sqlx::Error>
    where
        F: Fn() -> Query<'q, Postgres, PgArguments>,
    {
        self.run_if(operation, is_transient, || build().execute(pool))
            .await
    }

    /// Fetch every row of a query
    #[inline]
    pub async fn fetch_all<'q, F>(
        &self,
        pool: &PgPool,
        operation: &str,
        build: F,
    ) -> Result<Vec<PgRow>, sqlx::Error>
    where
        F: Fn() -> Query<'q, Postgres, PgArguments>,
    {
        self.run_if(operation, is_transient, || build().fetch_all(pool))
            .await
    }

    /// Fetch the single scalar a query produces
    #[inline]
    pub async fn fetch_scalar<'q, O, F>(
        &self,
        pool: &PgPool,
        operation: &str,
        build: F,
    ) -> Result<O, sqlx::Error>
    where
        O: Send + Unpin,
        (O,): Send + Unpin + for<'r> FromRow<'r, PgRow>,
        F: Fn() -> QueryScalar<'q, Postgres, O, PgArguments>,
    {
        self.run_if(operation, is_transient, || build().fetch_one(pool))
            .await
    }
}

/// Connection-level trouble worth another attempt, as opposed to a bad statement
#[inline]
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    }
}

/// Connection exceptions (class 08), serialization failure, deadlock,
/// too many connections and server shutdown / startup
#[inline]
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "53300" | "57P01" | "57P02" | "57P03")
}

/// SQLSTATE 23505
#[inline]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
