use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, LoadExtensionGuard, OpenFlags, params};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::NotegrepResult;
use crate::util::ensure_directory;

pub const DB_SCHEMA_VERSION: &str = "1.0.0";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle on the on-disk index.
///
/// Every operation opens its own connection in WAL mode, so a reader always
/// sees the last committed snapshot while a writer holds an open transaction.
/// Writers are serialized through `write_gate`.
#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    extension_path: Option<PathBuf>,
    write_gate: Mutex<()>,
}

impl Database {
    pub fn open(path: &Path, extension_path: Option<&Path>) -> NotegrepResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            ensure_directory(parent)?;
        }

        let connection = open_connection(path)?;
        let extension_path = match extension_path {
            Some(candidate) => match load_vector_extension(&connection, candidate) {
                Ok(()) => {
                    info!(path = %candidate.display(), "loaded vector extension");
                    Some(candidate.to_path_buf())
                }
                Err(err) => {
                    warn!(
                        path = %candidate.display(),
                        error = %err,
                        "failed to load vector extension"
                    );
                    None
                }
            },
            None => None,
        };

        ensure_schema(&connection)?;

        Ok(Self {
            path: path.to_path_buf(),
            extension_path,
            write_gate: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a fresh connection with the same pragmas and extensions as the pool.
    pub fn connect(&self) -> NotegrepResult<Connection> {
        connect_configured(&self.path, self.extension_path.as_deref())
    }

    pub async fn read<T, F>(&self, op: F) -> NotegrepResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> NotegrepResult<T> + Send + 'static,
    {
        let path = self.path.clone();
        let extension_path = self.extension_path.clone();
        tokio::task::spawn_blocking(move || {
            let connection = connect_configured(&path, extension_path.as_deref())?;
            op(&connection)
        })
        .await?
    }

    /// Runs `op` as the single active writer. Readers are not blocked.
    pub async fn write<T, F>(&self, op: F) -> NotegrepResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> NotegrepResult<T> + Send + 'static,
    {
        let _gate = self.write_gate.lock().await;
        let path = self.path.clone();
        let extension_path = self.extension_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = connect_configured(&path, extension_path.as_deref())?;
            op(&mut connection)
        })
        .await?
    }
}

fn connect_configured(path: &Path, extension_path: Option<&Path>) -> NotegrepResult<Connection> {
    let connection = open_connection(path)?;
    if let Some(extension_path) = extension_path {
        load_vector_extension(&connection, extension_path)?;
    }
    Ok(connection)
}

fn open_connection(path: &Path) -> NotegrepResult<Connection> {
    let connection = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    configure_connection(&connection)?;
    Ok(connection)
}

fn configure_connection(connection: &Connection) -> NotegrepResult<()> {
    connection.pragma_update(None, "journal_mode", "WAL")?;
    connection.pragma_update(None, "synchronous", "NORMAL")?;
    connection.pragma_update(None, "foreign_keys", "ON")?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

fn load_vector_extension(connection: &Connection, path: &Path) -> NotegrepResult<()> {
    // SAFETY: the path comes from operator configuration and is only loaded
    // while the guard keeps extension loading enabled.
    unsafe {
        let _guard = LoadExtensionGuard::new(connection)?;
        connection.load_extension(path, None::<&str>)?;
    }
    Ok(())
}

fn ensure_schema(connection: &Connection) -> NotegrepResult<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS indexed_item (
          item_id TEXT PRIMARY KEY,
          item_type TEXT NOT NULL,
          title TEXT NOT NULL,
          content_hash TEXT NOT NULL,
          chunk_count INTEGER NOT NULL,
          indexed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunk (
          id TEXT PRIMARY KEY,
          item_id TEXT NOT NULL,
          ordinal INTEGER NOT NULL,
          heading TEXT NOT NULL DEFAULT '',
          text TEXT NOT NULL,
          token_estimate INTEGER NOT NULL,
          UNIQUE (item_id, ordinal)
        );

        CREATE INDEX IF NOT EXISTS idx_chunk_item ON chunk(item_id, ordinal);
        ",
    )?;

    upsert_metadata(connection, "db_schema_version", DB_SCHEMA_VERSION)?;
    Ok(())
}

pub fn upsert_metadata(connection: &Connection, key: &str, value: &str) -> NotegrepResult<()> {
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES(?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn read_metadata(connection: &Connection, key: &str) -> NotegrepResult<Option<String>> {
    use rusqlite::OptionalExtension;

    Ok(connection
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}

pub fn touch_updated_at(connection: &Connection) -> NotegrepResult<()> {
    upsert_metadata(connection, "db_updated_at", &Utc::now().to_rfc3339())
}

pub fn table_exists(connection: &Connection, table_name: &str) -> NotegrepResult<bool> {
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        [table_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
