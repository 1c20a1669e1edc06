use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};

use crate::model::{ScraperConfigDoc, StoredConfig};
use crate::schedule;

use super::{parse_timestamp, EngineStore, StoreError, StoreResult};

/// Payload for creating or replacing a scraper configuration.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewConfig {
    pub name: String,
    #[serde(flatten)]
    pub doc: ScraperConfigDoc,
    #[serde(default)]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub cron_enabled: bool,
}

impl NewConfig {
    fn validate(&self) -> StoreResult<()> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        problems.extend(self.doc.validation_errors());
        if let Some(expr) = &self.cron_schedule {
            if let Err(err) = schedule::validate_expression(expr) {
                problems.push(format!("cron_schedule: {err}"));
            }
        } else if self.cron_enabled {
            problems.push("cron_enabled requires a cron_schedule".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(problems))
        }
    }
}

impl EngineStore {
    pub fn create_config(&self, config: &NewConfig) -> StoreResult<StoredConfig> {
        config.validate()?;
        let conn = self.open()?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scraper_configs WHERE name = ?1",
            [&config.name],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Err(StoreError::DuplicateName(config.name.clone()));
        }
        let doc = serde_json::to_string(&config.doc)?;
        conn.execute(
            "INSERT INTO scraper_configs (name, doc, cron_schedule, cron_enabled)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &config.name,
                &doc,
                &config.cron_schedule,
                config.cron_enabled
            ],
        )?;
        let id = conn.last_insert_rowid();
        self.fetch_config(&conn, id)?.ok_or(StoreError::NotFound(id))
    }

    pub fn update_config(&self, id: i64, config: &NewConfig) -> StoreResult<StoredConfig> {
        config.validate()?;
        let conn = self.open()?;
        let clash: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scraper_configs WHERE name = ?1 AND id != ?2",
            params![&config.name, id],
            |row| row.get(0),
        )?;
        if clash > 0 {
            return Err(StoreError::DuplicateName(config.name.clone()));
        }
        let doc = serde_json::to_string(&config.doc)?;
        let affected = conn.execute(
            "UPDATE scraper_configs
             SET name = ?1, doc = ?2, cron_schedule = ?3, cron_enabled = ?4,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?5",
            params![
                &config.name,
                &doc,
                &config.cron_schedule,
                config.cron_enabled,
                id
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.fetch_config(&conn, id)?.ok_or(StoreError::NotFound(id))
    }

    pub fn get_config(&self, id: i64) -> StoreResult<Option<StoredConfig>> {
        let conn = self.open()?;
        self.fetch_config(&conn, id)
    }

    pub fn get_config_by_name(&self, name: &str) -> StoreResult<Option<StoredConfig>> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT * FROM scraper_configs WHERE name = ?1",
            [name],
            config_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_configs(&self) -> StoreResult<Vec<StoredConfig>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM scraper_configs ORDER BY name")?;
        let mut rows = stmt.query([])?;
        let mut configs = Vec::new();
        while let Some(row) = rows.next()? {
            configs.push(config_from_row(row)?);
        }
        Ok(configs)
    }

    /// Configurations eligible for cron scheduling.
    pub fn list_scheduled_configs(&self) -> StoreResult<Vec<StoredConfig>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM scraper_configs
             WHERE cron_enabled = 1 AND cron_schedule IS NOT NULL
             ORDER BY id",
        )?;
        let mut rows = stmt.query([])?;
        let mut configs = Vec::new();
        while let Some(row) = rows.next()? {
            configs.push(config_from_row(row)?);
        }
        Ok(configs)
    }

    pub fn delete_config(&self, id: i64) -> StoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM scraped_items WHERE config_id = ?1", [id])?;
        let affected = tx.execute("DELETE FROM scraper_configs WHERE id = ?1", [id])?;
        tx.commit()?;
        if affected == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn fetch_config(
        &self,
        conn: &rusqlite::Connection,
        id: i64,
    ) -> StoreResult<Option<StoredConfig>> {
        conn.query_row(
            "SELECT * FROM scraper_configs WHERE id = ?1",
            [id],
            config_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }
}

fn config_from_row(row: &Row<'_>) -> rusqlite::Result<StoredConfig> {
    let doc_json: String = row.get("doc")?;
    let doc: ScraperConfigDoc = serde_json::from_str(&doc_json).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })?;
    let created_at = parse_timestamp(row.get::<_, Option<NaiveDateTime>>("created_at")?)?
        .unwrap_or_else(chrono::Utc::now);
    let updated_at = parse_timestamp(row.get::<_, Option<NaiveDateTime>>("updated_at")?)?
        .unwrap_or_else(chrono::Utc::now);
    Ok(StoredConfig {
        id: row.get("id")?,
        name: row.get("name")?,
        doc,
        cron_schedule: row.get("cron_schedule")?,
        cron_enabled: row.get("cron_enabled")?,
        created_at,
        updated_at,
    })
}
