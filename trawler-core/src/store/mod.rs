//! SQLite persistence for scraper configurations, scraped items, accounts
//! and the engine-settings singleton. Connections are opened per call and
//! configured with the shared pragmas.

mod accounts;
mod configs;
mod items;
mod settings;

pub use accounts::Account;
pub use configs::NewConfig;
pub use items::{ItemPage, ItemQuery, ScrapedItem, UpsertOutcome};

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

use crate::sqlite::configure_connection;
use crate::vault::VaultError;

const ENGINE_SCHEMA: &str = include_str!("../../../sql/engine.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open engine database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on engine database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("store path not configured")]
    MissingStore,
    #[error("record not found: {0}")]
    NotFound(i64),
    #[error("configuration name already exists: {0}")]
    DuplicateName(String),
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("failed to encode document: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Vault(#[from] VaultError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct EngineStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for EngineStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl EngineStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<EngineStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(EngineStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct EngineStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl EngineStore {
    pub fn builder() -> EngineStoreBuilder {
        EngineStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        EngineStoreBuilder::new().path(path).build()
    }

    pub(crate) fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(ENGINE_SCHEMA)?;
        Ok(())
    }
}

pub(crate) fn parse_timestamp(
    value: Option<NaiveDateTime>,
) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    Ok(value.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)))
}
