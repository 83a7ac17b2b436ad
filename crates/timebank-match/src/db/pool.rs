// db/pool.rs
// Async connection pool using deadpool-sqlite
//
// Database access runs on the blocking thread pool via `interact()`; the
// async runtime is never blocked on SQLite. Use `run()` at facade
// boundaries for automatic MatchError conversion, `interact()` internally
// where anyhow::Result is more convenient, and `try_interact()` for
// best-effort operations that must not propagate failures.

use crate::error::MatchError;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
///
/// SQLITE_BUSY occurs with file-based databases under write contention.
/// SQLITE_LOCKED occurs with shared-cache in-memory databases when another
/// connection holds a write lock on the same table.
fn is_rusqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Check if a MatchError wraps a SQLite contention error.
fn is_match_contention(err: &MatchError) -> bool {
    match err {
        MatchError::Db(rusqlite_err) => is_rusqlite_contention(rusqlite_err),
        _ => false,
    }
}

/// Retry delays for SQLite contention backoff (100ms, 500ms, 2s).
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

/// Generic retry-with-backoff for async operations that may encounter
/// SQLite contention.
async fn retry_with_backoff<F, Fut, R, E>(
    mut op: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<R, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
    E: std::fmt::Display,
{
    for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
        match op().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if is_retryable(&e) {
                    tracing::warn!(
                        "SQLite contention on attempt {}/{}, retrying in {:?}",
                        attempt + 1,
                        RETRY_DELAYS.len(),
                        delay
                    );
                    tokio::time::sleep(*delay).await;
                } else {
                    return Err(e);
                }
            }
        }
    }

    // Final attempt (no retry after this)
    op().await
}

/// Connection pool for the matching engine's own tables.
///
/// Schema migrations run once at open time; from then on the engine assumes
/// its five tables exist and fails loudly if they do not.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (used to share state in tests)
    memory_uri: Option<String>,
}

impl DatabasePool {
    /// Open a pooled database at the given path, creating parent
    /// directories and running migrations as needed.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn_str = path.to_string_lossy().into_owned();
        Self::open_internal(conn_str, Some(path.to_path_buf()), None).await
    }

    /// Open a pooled in-memory database.
    ///
    /// Uses a shared-cache URI so all pooled connections see the same
    /// in-memory database. Without shared cache each connection would get
    /// its own empty database.
    pub async fn open_in_memory() -> Result<Self> {
        let uri = format!("file:matchdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        Self::open_internal(uri.clone(), None, Some(uri)).await
    }

    async fn open_internal(
        conn_str: String,
        path: Option<PathBuf>,
        memory_uri: Option<String>,
    ) -> Result<Self> {
        let file_based = path.is_some();
        let hook = Hook::async_fn(move |conn, _metrics| {
            Box::pin(async move {
                conn.interact(move |conn| setup_connection(conn, file_based))
                    .await
                    .map_err(|e| {
                        deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
                    })?
                    .map_err(|e| {
                        deadpool_sqlite::HookError::Message(
                            format!("connection setup failed: {e}").into(),
                        )
                    })
            })
        });

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path,
            memory_uri,
        };

        db_pool
            .interact(|conn| super::schema::run_migrations(conn))
            .await?;

        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests)
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a connection from the pool.
    ///
    /// The closure runs on a blocking thread pool, so it won't block the
    /// async runtime.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure on a pooled connection, logging errors at debug but
    /// not propagating. Use for best-effort operations (analytics writes,
    /// notification bookkeeping).
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(move |conn| f(conn)).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("{}: {}", label, e);
                None
            }
        }
    }

    /// Run a closure and convert errors to MatchError.
    ///
    /// This is the preferred method at facade boundaries.
    pub async fn run<F, R, E>(&self, f: F) -> Result<R, MatchError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<MatchError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| MatchError::Other(format!("Failed to get connection: {}", e)))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| MatchError::Other(format!("Database error: {}", e)))?
    }

    /// Like [`run`](Self::run) but with retry on SQLite contention errors.
    ///
    /// Uses backoff (100ms, 500ms, 2000ms) for up to 3 retries. Use for
    /// writes that must not be lost (interaction recording, conversions).
    /// The closure must be `Clone` to support retries.
    pub async fn run_with_retry<F, R, E>(&self, f: F) -> Result<R, MatchError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<MatchError> + Send + 'static,
    {
        retry_with_backoff(
            || {
                let f_clone = f.clone();
                self.run(f_clone)
            },
            is_match_contention,
        )
        .await
    }

    /// Get pool status for monitoring.
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

/// Pool status for monitoring.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

/// Configure a connection after it's created.
///
/// WAL only applies to file-based databases; in-memory connections get
/// foreign keys and a busy timeout.
fn setup_connection(conn: &Connection, file_based: bool) -> rusqlite::Result<()> {
    if file_based {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; \
             PRAGMA foreign_keys=ON; \
             PRAGMA busy_timeout=5000; \
             PRAGMA synchronous=NORMAL;",
        )?;
    } else {
        conn.execute_batch(
            "PRAGMA foreign_keys=ON; \
             PRAGMA busy_timeout=5000;",
        )?;
    }
    Ok(())
}
