use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use tracing::warn;

use super::{parse_timestamp, EngineStore, StoreError, StoreResult};

const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ScrapedItem {
    pub id: i64,
    pub config_id: i64,
    pub url: String,
    pub data: serde_json::Value,
    pub scraped_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ScrapedItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let data_json: String = row.get("data")?;
        let data = serde_json::from_str(&data_json).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
        })?;
        Ok(Self {
            id: row.get("id")?,
            config_id: row.get("config_id")?,
            url: row.get("url")?,
            data,
            scraped_at: parse_timestamp(row.get::<_, Option<NaiveDateTime>>("scraped_at")?)?,
            created_at: parse_timestamp(row.get::<_, Option<NaiveDateTime>>("created_at")?)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ItemQuery {
    pub config_id: Option<i64>,
    pub page: usize,
    pub limit: usize,
    pub newest_first: bool,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            config_id: None,
            page: 1,
            limit: 25,
            newest_first: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemPage {
    pub items: Vec<ScrapedItem>,
    pub total_items: usize,
    pub total_pages: usize,
    pub page: usize,
    pub limit: usize,
}

/// Per-batch save tally: rows that made it in versus rows that were
/// dropped on the floor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub written: usize,
    pub failed: usize,
}

impl EngineStore {
    /// Saves extracted records, updating `data` and `scraped_at` when the
    /// `(config_id, url)` pair already exists. A record that fails to
    /// serialize or to execute is counted and skipped; it never rolls back
    /// the rest of the batch.
    pub fn upsert_items(
        &self,
        config_id: i64,
        records: &[(String, serde_json::Value)],
    ) -> StoreResult<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO scraped_items (config_id, url, data)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(config_id, url)
                 DO UPDATE SET data = excluded.data, scraped_at = CURRENT_TIMESTAMP",
            )?;
            for (url, data) in records {
                let data_json = match serde_json::to_string(data) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(url, error = %err, "item payload failed to serialize, skipping");
                        outcome.failed += 1;
                        continue;
                    }
                };
                match stmt.execute(params![config_id, url, data_json]) {
                    Ok(count) => outcome.written += count,
                    Err(err) => {
                        warn!(url, error = %err, "item failed to save, skipping");
                        outcome.failed += 1;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    pub fn list_items(&self, query: &ItemQuery) -> StoreResult<ItemPage> {
        let mut problems = Vec::new();
        if query.page == 0 {
            problems.push("page must be at least 1".to_string());
        }
        if query.limit == 0 || query.limit > MAX_PAGE_SIZE {
            problems.push(format!("limit must be between 1 and {MAX_PAGE_SIZE}"));
        }
        if !problems.is_empty() {
            return Err(StoreError::Validation(problems));
        }

        let conn = self.open()?;
        let (total_items, items) = match query.config_id {
            Some(config_id) => {
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM scraped_items WHERE config_id = ?1",
                    [config_id],
                    |row| row.get(0),
                )?;
                let sql = format!(
                    "SELECT * FROM scraped_items WHERE config_id = ?1
                     ORDER BY scraped_at {}, id {} LIMIT ?2 OFFSET ?3",
                    order(query.newest_first),
                    order(query.newest_first),
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params![
                    config_id,
                    query.limit as i64,
                    ((query.page - 1) * query.limit) as i64
                ])?;
                let mut items = Vec::new();
                while let Some(row) = rows.next()? {
                    items.push(ScrapedItem::from_row(row)?);
                }
                (total as usize, items)
            }
            None => {
                let total: i64 =
                    conn.query_row("SELECT COUNT(*) FROM scraped_items", [], |row| row.get(0))?;
                let sql = format!(
                    "SELECT * FROM scraped_items
                     ORDER BY scraped_at {}, id {} LIMIT ?1 OFFSET ?2",
                    order(query.newest_first),
                    order(query.newest_first),
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params![
                    query.limit as i64,
                    ((query.page - 1) * query.limit) as i64
                ])?;
                let mut items = Vec::new();
                while let Some(row) = rows.next()? {
                    items.push(ScrapedItem::from_row(row)?);
                }
                (total as usize, items)
            }
        };

        Ok(ItemPage {
            items,
            total_items,
            total_pages: total_items.div_ceil(query.limit),
            page: query.page,
            limit: query.limit,
        })
    }

    pub fn get_item(&self, id: i64) -> StoreResult<Option<ScrapedItem>> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT * FROM scraped_items WHERE id = ?1",
            [id],
            ScrapedItem::from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn count_items(&self, config_id: i64) -> StoreResult<usize> {
        let conn = self.open()?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scraped_items WHERE config_id = ?1",
            [config_id],
            |row| row.get(0),
        )?;
        Ok(total as usize)
    }
}

fn order(newest_first: bool) -> &'static str {
    if newest_first {
        "DESC"
    } else {
        "ASC"
    }
}
