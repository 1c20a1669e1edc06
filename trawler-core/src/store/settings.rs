use rusqlite::{params, OptionalExtension};

use crate::model::PoolSettings;

use super::{EngineStore, StoreError, StoreResult};

impl EngineStore {
    /// Reads the engine-settings singleton, falling back to defaults when no
    /// row has been written yet.
    pub fn load_pool_settings(&self) -> StoreResult<PoolSettings> {
        let conn = self.open()?;
        let settings = conn
            .query_row(
                "SELECT max_pool_size, min_pool_size, idle_timeout_ms, retry_limit
                 FROM engine_settings WHERE singleton = 1",
                [],
                |row| {
                    Ok(PoolSettings {
                        max_pool_size: row.get(0)?,
                        min_pool_size: row.get(1)?,
                        idle_timeout_ms: row.get::<_, i64>(2)? as u64,
                        retry_limit: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(settings.unwrap_or_default())
    }

    /// Validates and persists the engine-settings singleton. The running
    /// pool keeps using the snapshot it was initialized with; a restart
    /// picks the new values up.
    pub fn save_pool_settings(&self, settings: &PoolSettings) -> StoreResult<PoolSettings> {
        let problems = settings.validation_errors();
        if !problems.is_empty() {
            return Err(StoreError::Validation(problems));
        }
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO engine_settings (singleton, max_pool_size, min_pool_size, idle_timeout_ms, retry_limit)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(singleton) DO UPDATE SET
                 max_pool_size = excluded.max_pool_size,
                 min_pool_size = excluded.min_pool_size,
                 idle_timeout_ms = excluded.idle_timeout_ms,
                 retry_limit = excluded.retry_limit,
                 updated_at = CURRENT_TIMESTAMP",
            params![
                settings.max_pool_size,
                settings.min_pool_size,
                settings.idle_timeout_ms as i64,
                settings.retry_limit
            ],
        )?;
        Ok(*settings)
    }
}
