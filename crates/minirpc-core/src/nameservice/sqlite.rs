//! SQLite-backed name service.
//!
//! URI forms:
//!
//! - `sqlite:/var/lib/app/nameservice.db` (or `sqlite:///...`): file database,
//!   shared by every process that opens it; the path is percent-decoded;
//! - `sqlite::memory:`: private in-memory database;
//! - `sqlite:`: the per-user default database (see
//!   [`default_name_service_db`](crate::platform::default_name_service_db)).
//!
//! The schema is created on connect if missing, so repeated starts against
//! the same file are harmless. WAL mode keeps concurrent processes from
//! blocking each other's reads.

use super::{check_scheme, select_address, NameService, RandomSelection, SelectionStrategy};
use crate::config::NameServiceConfig;
use crate::{Result, RpcError};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};
use url::Url;

/// Name service persisted in SQLite.
pub struct SqliteNameService {
    conn: Arc<Mutex<Option<Connection>>>,
    strategy: Arc<dyn SelectionStrategy>,
}

enum Location {
    Memory,
    File(PathBuf),
}

impl SqliteNameService {
    pub fn new() -> Self {
        Self::with_strategy(Arc::new(RandomSelection))
    }

    pub fn with_strategy(strategy: Arc<dyn SelectionStrategy>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(None)),
            strategy,
        }
    }

    fn location(uri: &Url) -> Result<Location> {
        let path = urlencoding::decode(uri.path()).map_err(|e| RpcError::InvalidAddress {
            address: uri.to_string(),
            message: format!("database path is not valid UTF-8: {}", e),
        })?;
        let path = path.as_ref();
        if path == NameServiceConfig::IN_MEMORY_PATH {
            Ok(Location::Memory)
        } else if path.is_empty() {
            Ok(Location::File(crate::platform::default_name_service_db()?))
        } else {
            Ok(Location::File(PathBuf::from(path)))
        }
    }

    fn open(location: &Location) -> Result<Connection> {
        let conn = match location {
            Location::Memory => Connection::open_in_memory()?,
            Location::File(path) => {
                Self::ensure_parent_dir(path)?;
                Connection::open(path)?
            }
        };
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;
        Ok(conn)
    }

    fn ensure_parent_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| RpcError::Io {
                    message: format!(
                        "Failed to create name service directory: {}",
                        parent.display()
                    ),
                    source: Some(e),
                })?;
            }
        }
        Ok(())
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={};\n\
             PRAGMA synchronous=NORMAL;",
            NameServiceConfig::BUSY_TIMEOUT_MS,
        ))?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                service_name TEXT NOT NULL,
                uri TEXT NOT NULL,
                registered_at TEXT NOT NULL,
                PRIMARY KEY (service_name, uri)
            );",
            table = NameServiceConfig::TABLE_NAME,
        ))?;
        Ok(())
    }

    /// Run `f` against the open connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| RpcError::Database {
                message: "Failed to acquire name service connection lock".to_string(),
                source: None,
            })?;
            let conn = guard.as_ref().ok_or(RpcError::NotConnected)?;
            f(conn)
        })
        .await
        .map_err(|e| RpcError::other(format!("Name service task failed: {}", e)))?
    }

    fn parse_address(raw: &str) -> Result<Url> {
        Url::parse(raw).map_err(|e| RpcError::InvalidAddress {
            address: raw.to_string(),
            message: e.to_string(),
        })
    }
}

impl Default for SqliteNameService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NameService for SqliteNameService {
    fn supported_schemes(&self) -> &[&'static str] {
        &[NameServiceConfig::SQLITE_SCHEME]
    }

    async fn connect(&self, uri: &Url) -> Result<()> {
        check_scheme(self, uri)?;
        let location = Self::location(uri)?;

        info!("Connecting to name service database: {}", uri);
        let conn = tokio::task::spawn_blocking(move || Self::open(&location))
            .await
            .map_err(|e| RpcError::other(format!("Name service task failed: {}", e)))??;

        let previous = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(conn);
        if previous.is_some() {
            debug!("Replaced previous name service connection");
        }
        info!("Name service database connected");
        Ok(())
    }

    async fn register_service(&self, name: &str, address: &Url) -> Result<()> {
        let name = name.to_string();
        let address = address.to_string();
        let inserted = self
            .with_conn(move |conn| {
                let changed = conn.execute(
                    &format!(
                        "INSERT INTO {} (service_name, uri, registered_at)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(service_name, uri) DO NOTHING",
                        NameServiceConfig::TABLE_NAME
                    ),
                    params![name, address, Utc::now().to_rfc3339()],
                )?;
                Ok(changed > 0)
            })
            .await?;

        if !inserted {
            debug!("Service registration already present");
        }
        Ok(())
    }

    async fn lookup_all(&self, name: &str) -> Result<Vec<Url>> {
        let name = name.to_string();
        let raw: Vec<String> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT uri FROM {} WHERE service_name = ?1 ORDER BY registered_at, uri",
                    NameServiceConfig::TABLE_NAME
                ))?;
                let rows = stmt.query_map(params![name], |row| row.get::<_, String>(0))?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .await?;

        raw.iter().map(|uri| Self::parse_address(uri)).collect()
    }

    async fn lookup_service(&self, name: &str) -> Result<Url> {
        let candidates = self.lookup_all(name).await?;
        select_address(self.strategy.as_ref(), name, &candidates)
    }

    async fn unregister_service(&self, name: &str, address: &Url) -> Result<bool> {
        let name = name.to_string();
        let address = address.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                &format!(
                    "DELETE FROM {} WHERE service_name = ?1 AND uri = ?2",
                    NameServiceConfig::TABLE_NAME
                ),
                params![name, address],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn close(&self) {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            if let Err((_, e)) = conn.close() {
                debug!("Error closing name service database: {}", e);
            }
            debug!("Name service database closed");
        }
    }
}
