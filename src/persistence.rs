//! Durable persistence strategies for the priority queue's periodic
//! snapshots. Grounded in the Arceon workspace's declared `sqlx` dependency
//! for the database variant; the file variant follows the same
//! replace-not-append contract using a temp-file-then-rename swap so either
//! the prior or the new image is always readable.

use std::fs;
use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::PersistenceError;
use crate::task::SerializableTask;

/// Abstract save/load/cleanup of a serialized queue image.
///
/// - `save` replaces any prior image (not append).
/// - `load` returns the persisted order, or empty if no image exists.
/// - `cleanup` removes the image and is idempotent.
pub trait PersistenceStrategy: Send + Sync {
    fn save(&self, tasks: &[SerializableTask]) -> Result<(), PersistenceError>;
    fn load(&self) -> Result<Vec<SerializableTask>, PersistenceError>;
    fn cleanup(&self) -> Result<(), PersistenceError>;
}

/// `save`/`cleanup` are no-ops; `load` always returns empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpPersistence;

impl PersistenceStrategy for NoOpPersistence {
    fn save(&self, _tasks: &[SerializableTask]) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn load(&self) -> Result<Vec<SerializableTask>, PersistenceError> {
        Ok(Vec::new())
    }

    fn cleanup(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// A single opaque binary file holding the ordered sequence of
/// [`SerializableTask`]s, encoded as JSON for readability in development.
///
/// The parent directory is created on demand. Saves are written to a
/// sibling `.tmp` file and atomically renamed over the target, so a crash
/// mid-write leaves either the previous image or the complete new one.
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FilePersistence {
    /// Aggregates the directory-create/serialize/write/rename steps behind
    /// one `anyhow::Context`-annotated chain, the way `arceon-performance`'s
    /// subsystem glue functions do for multi-step fallible work, before the
    /// public `save` maps any failure down to a single `PersistenceError`.
    fn write_atomic(&self, tasks: &[SerializableTask]) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| format!("creating parent directory for {}", self.path.display()))?;
            }
        }

        let bytes = serde_json::to_vec(tasks).context("serializing queue image")?;
        let tmp_path = tmp_sibling(&self.path);
        fs::write(&tmp_path, bytes).with_context(|| format!("writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).with_context(|| format!("renaming {} to {}", tmp_path.display(), self.path.display()))?;
        Ok(())
    }
}

impl PersistenceStrategy for FilePersistence {
    fn save(&self, tasks: &[SerializableTask]) -> Result<(), PersistenceError> {
        self.write_atomic(tasks).map_err(|e| PersistenceError::Other(format!("{e:#}")))
    }

    fn load(&self) -> Result<Vec<SerializableTask>, PersistenceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn cleanup(&self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// `persistent_tasks(task_id TEXT, submit_time BIGINT, priority INT, serialized_task BLOB)`
/// in a SQLite database, replaced transactionally on every save.
///
/// `save`/`load`/`cleanup` are synchronous per the persistence strategy
/// contract (they are only ever called from the queue's snapshotter thread
/// or from pool shutdown, never from a worker or submitter), so this bridges
/// `sqlx`'s async API with a small dedicated current-thread Tokio runtime.
pub struct DatabasePersistence {
    pool: SqlitePool,
    runtime: tokio::runtime::Runtime,
}

impl DatabasePersistence {
    pub fn new(database_path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PersistenceError::Other(format!("failed to start db runtime: {e}")))?;

        let options = SqliteConnectOptions::new()
            .filename(database_path.as_ref())
            .create_if_missing(true);

        let pool = runtime.block_on(async {
            let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS persistent_tasks (
                    task_id TEXT PRIMARY KEY,
                    submit_time BIGINT NOT NULL,
                    priority INT NOT NULL,
                    serialized_task BLOB NOT NULL
                )",
            )
            .execute(&pool)
            .await?;
            Ok::<_, sqlx::Error>(pool)
        })?;

        Ok(Self { pool, runtime })
    }
}

impl PersistenceStrategy for DatabasePersistence {
    fn save(&self, tasks: &[SerializableTask]) -> Result<(), PersistenceError> {
        self.runtime.block_on(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM persistent_tasks").execute(&mut *tx).await?;

            for task in tasks {
                sqlx::query(
                    "INSERT INTO persistent_tasks (task_id, submit_time, priority, serialized_task) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&task.task_id)
                .bind(task.submit_time_ms)
                .bind(task.priority)
                .bind(&task.blob)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok::<_, sqlx::Error>(())
        })?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<SerializableTask>, PersistenceError> {
        let rows = self.runtime.block_on(async {
            sqlx::query(
                "SELECT task_id, submit_time, priority, serialized_task FROM persistent_tasks \
                 ORDER BY priority, submit_time",
            )
            .fetch_all(&self.pool)
            .await
        })?;

        Ok(rows
            .into_iter()
            .map(|row| SerializableTask {
                task_id: row.get("task_id"),
                submit_time_ms: row.get("submit_time"),
                priority: row.get("priority"),
                blob: row.get("serialized_task"),
            })
            .collect())
    }

    fn cleanup(&self) -> Result<(), PersistenceError> {
        self.runtime
            .block_on(async { sqlx::query("DELETE FROM persistent_tasks").execute(&self.pool).await })?;
        Ok(())
    }
}
