//! Serial execution gate
//!
//! Every storage operation runs on exactly one dedicated thread (the DB
//! thread). The SQLite connection is created inside that thread and never
//! crosses it; callers submit named jobs and await a materialized result.
//! SQLite connections are not safe for concurrent use, and funneling all
//! work through one thread also keeps transactions single-threaded:
//! BEGIN/INSERT/COMMIT always see the same connection state.
//!
//! The gate is not reentrant. A job must never call back into `Store`
//! methods (which would submit to the gate and deadlock waiting on the
//! thread that is running the job).

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection, SqliteConnection};

use super::types::{StoreError, CURRENT_SCHEMA_VERSION};

/// Storage operations exceeding this log a warning. The DB thread is not
/// preempted; the deadline is observability only.
const SOFT_DEADLINE: Duration = Duration::from_secs(5);

type GateJob = Box<dyn FnOnce(&mut DbWorker) + Send + 'static>;

/// State owned exclusively by the DB thread.
///
/// No field of this struct (in particular `conn`) may ever be moved or
/// borrowed across the thread boundary; job results must be owned values.
pub(crate) struct DbWorker {
    rt: tokio::runtime::Runtime,
    db_path: PathBuf,
    conn: Option<SqliteConnection>,
    invalidated: bool,
}

impl DbWorker {
    fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Runtime(format!("DB thread runtime: {e}")))?;
        Ok(Self {
            rt,
            db_path,
            conn: None,
            invalidated: false,
        })
    }

    /// Open the connection and run schema setup. Idempotent. After a
    /// fatal write error this is the reconnect path: the tainted
    /// connection is dropped and a fresh one opened.
    pub(crate) fn open(&mut self) -> Result<(), StoreError> {
        if self.invalidated {
            self.close()?;
        }
        if self.conn.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = match self.try_open() {
            Ok(c) => c,
            Err(e) => {
                // A corrupt write-ahead log makes the open fail before any
                // query runs. Back the log up to a sibling path and retry
                // once with a fresh one.
                let wal = append_suffix(&self.db_path, "-wal");
                if wal.exists() {
                    let backup = append_suffix(&wal, ".corrupt");
                    tracing::warn!(
                        error = %e,
                        backup = %backup.display(),
                        "Open failed with WAL present; backing up log and retrying"
                    );
                    std::fs::rename(&wal, &backup)?;
                    let shm = append_suffix(&self.db_path, "-shm");
                    if shm.exists() {
                        let _ = std::fs::remove_file(&shm);
                    }
                    self.try_open()?
                } else {
                    return Err(e);
                }
            }
        };

        self.conn = Some(conn);
        self.invalidated = false;
        if let Err(e) = self.init_schema() {
            // A half-initialized connection must not linger
            if let Err(close_err) = self.close() {
                tracing::debug!(error = %close_err, "Close after failed schema init");
            }
            return Err(e);
        }

        // Restrictive permissions: the database holds a copy of every
        // indexed chunk (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let restrictive = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&self.db_path, restrictive.clone());
            let _ = std::fs::set_permissions(append_suffix(&self.db_path, "-wal"), restrictive);
        }

        tracing::info!(path = %self.db_path.display(), "Database connected");
        Ok(())
    }

    fn try_open(&self) -> Result<SqliteConnection, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(&self.db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(5000))
            .foreign_keys(true);

        let conn = self.rt.block_on(opts.connect())?;
        Ok(conn)
    }

    fn init_schema(&mut self) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        rt.block_on(async {
            let schema = include_str!("schema.sql");
            for statement in schema.split(';') {
                let stmt: String = statement
                    .lines()
                    .filter(|line| !line.trim().starts_with("--"))
                    .collect::<Vec<_>>()
                    .join("\n");
                let stmt = stmt.trim();
                if stmt.is_empty() {
                    continue;
                }
                sqlx::query(stmt).execute(&mut *conn).await?;
            }

            let row: Option<(String,)> =
                sqlx::query_as("SELECT value FROM metadata WHERE key = 'schema_version'")
                    .fetch_optional(&mut *conn)
                    .await?;
            match row.and_then(|(s,)| s.parse::<i32>().ok()) {
                Some(v) if v > CURRENT_SCHEMA_VERSION => {
                    return Err(StoreError::SchemaNewerThanBinary(v))
                }
                Some(v) if v < CURRENT_SCHEMA_VERSION => {
                    // No migrations exist yet at v1; refuse rather than guess
                    return Err(StoreError::SchemaMismatch(v, CURRENT_SCHEMA_VERSION));
                }
                Some(_) => {}
                None => {
                    let now = chrono::Utc::now().to_rfc3339();
                    sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)")
                        .bind(CURRENT_SCHEMA_VERSION.to_string())
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES ('created_at', ?1)")
                        .bind(&now)
                        .execute(&mut *conn)
                        .await?;
                    tracing::info!(schema_version = CURRENT_SCHEMA_VERSION, "Schema initialized");
                }
            }
            Ok(())
        })
    }

    /// Borrow the runtime handle and connection together for an executor.
    ///
    /// Connects lazily on first use. Fails fast when the store has been
    /// invalidated by an earlier fatal write error.
    pub(crate) fn parts(
        &mut self,
    ) -> Result<(&tokio::runtime::Runtime, &mut SqliteConnection), StoreError> {
        if self.invalidated {
            return Err(StoreError::Invalidated);
        }
        if self.conn.is_none() {
            self.open()?;
        }
        match self.conn.as_mut() {
            Some(conn) => Ok((&self.rt, conn)),
            None => Err(StoreError::Invalidated),
        }
    }

    /// Record a fatal write error; all further jobs fail with
    /// `Invalidated` until `open()` succeeds again after `close()`.
    fn observe_error(&mut self, e: &StoreError) {
        if e.is_fatal_write() {
            tracing::error!(error = %e, "Fatal storage error; invalidating database until reconnect");
            self.invalidated = true;
        }
    }

    /// Checkpoint the WAL and close the connection. Idempotent.
    pub(crate) fn close(&mut self) -> Result<(), StoreError> {
        if let Some(mut conn) = self.conn.take() {
            self.rt.block_on(async {
                if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                    .execute(&mut conn)
                    .await
                {
                    tracing::debug!(error = %e, "WAL checkpoint on close failed (non-fatal)");
                }
                conn.close().await
            })?;
            tracing::debug!("Database connection closed");
        }
        self.invalidated = false;
        Ok(())
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Handle through which all storage jobs are funneled onto the DB thread.
pub(crate) struct SerialGate {
    tx: Mutex<Option<crossbeam_channel::Sender<GateJob>>>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl SerialGate {
    /// Spawn the DB thread. The connection itself is opened lazily by the
    /// first submitted job.
    pub(crate) fn spawn(db_path: PathBuf) -> Result<Self, StoreError> {
        let (tx, rx) = crossbeam_channel::unbounded::<GateJob>();

        let handle = std::thread::Builder::new()
            .name("chunkhound-db".into())
            .spawn(move || {
                let mut worker = match DbWorker::new(db_path) {
                    Ok(w) => w,
                    Err(e) => {
                        tracing::error!(error = %e, "DB thread failed to start");
                        return;
                    }
                };
                while let Ok(job) = rx.recv() {
                    job(&mut worker);
                }
                if let Err(e) = worker.close() {
                    tracing::warn!(error = %e, "Closing database on shutdown failed");
                }
            })
            .map_err(|e| StoreError::Runtime(format!("spawn DB thread: {e}")))?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Run a named job on the DB thread and await its result.
    ///
    /// The job's return value is materialized and sent back; nothing
    /// borrowed from the connection crosses the thread boundary.
    pub(crate) async fn submit<R, F>(&self, op: &'static str, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut DbWorker) -> Result<R, StoreError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        let start = Instant::now();

        {
            let guard = self
                .tx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let Some(tx) = guard.as_ref() else {
                return Err(StoreError::GateClosed);
            };
            tx.send(Box::new(move |worker: &mut DbWorker| {
                let result = f(worker);
                if let Err(e) = &result {
                    worker.observe_error(e);
                }
                // Receiver dropped means the caller went away; the work
                // is already done either way.
                let _ = reply_tx.send(result);
            }))
            .map_err(|_| StoreError::GateClosed)?;
        }

        let result = reply_rx.await.map_err(|_| StoreError::GateClosed)?;

        let elapsed = start.elapsed();
        if elapsed > SOFT_DEADLINE {
            tracing::warn!(
                op,
                elapsed_ms = elapsed.as_millis() as u64,
                "Storage operation exceeded soft deadline"
            );
        }

        result
    }

    /// Stop accepting jobs, drain the queue, close the connection, and
    /// join the thread.
    pub(crate) fn shutdown(&self) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(tx);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("DB thread panicked during shutdown");
            }
        }
    }
}

impl Drop for SerialGate {
    fn drop(&mut self) {
        self.shutdown();
    }
}
