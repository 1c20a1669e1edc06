use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::vault::SecretVault;

use super::{parse_timestamp, EngineStore, StoreError, StoreResult};

/// A stored login account. The secret never leaves the database in listings;
/// use [`EngineStore::account_secret`] to decrypt it for a login flow.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: i64,
    pub platform: String,
    pub username: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl Account {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            platform: row.get("platform")?,
            username: row.get("username")?,
            created_at: parse_timestamp(row.get::<_, Option<NaiveDateTime>>("created_at")?)?,
        })
    }
}

impl EngineStore {
    pub fn add_account(
        &self,
        vault: &SecretVault,
        platform: &str,
        username: &str,
        password: &str,
    ) -> StoreResult<Account> {
        let mut problems = Vec::new();
        for (field, value) in [("platform", platform), ("username", username)] {
            if value.trim().is_empty() {
                problems.push(format!("{field} must not be empty"));
            }
        }
        if password.is_empty() {
            problems.push("password must not be empty".to_string());
        }
        if !problems.is_empty() {
            return Err(StoreError::Validation(problems));
        }

        let sealed = vault.seal(password)?;
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO accounts (platform, username, secret) VALUES (?1, ?2, ?3)",
            params![platform, username, sealed],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT id, platform, username, created_at FROM accounts WHERE id = ?1",
            [id],
            Account::from_row,
        )
        .map_err(StoreError::from)
    }

    pub fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT id, platform, username, created_at FROM accounts ORDER BY id")?;
        let mut rows = stmt.query([])?;
        let mut accounts = Vec::new();
        while let Some(row) = rows.next()? {
            accounts.push(Account::from_row(row)?);
        }
        Ok(accounts)
    }

    pub fn get_account(&self, id: i64) -> StoreResult<Option<Account>> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT id, platform, username, created_at FROM accounts WHERE id = ?1",
            [id],
            Account::from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Decrypts the account password for a login flow.
    pub fn account_secret(&self, vault: &SecretVault, id: i64) -> StoreResult<String> {
        let conn = self.open()?;
        let sealed: Option<String> = conn
            .query_row("SELECT secret FROM accounts WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let sealed = sealed.ok_or(StoreError::NotFound(id))?;
        Ok(vault.open(&sealed)?)
    }
}
