//! Cron registry: one background task per scheduled configuration.
//!
//! Expressions are the familiar five-field form; a seconds field is
//! prepended before parsing. At fire time the configuration is re-read from
//! the store so edits take effect without restarting, and a trigger whose
//! configuration disappeared or was disabled removes itself.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::model::StoredConfig;
use crate::store::{EngineStore, StoreError};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression {expression:?}: {source}")]
    Invalid {
        expression: String,
        source: cron::error::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Parses a five-field cron expression, returning the schedule on success.
pub fn validate_expression(expression: &str) -> ScheduleResult<Schedule> {
    let normalized = normalize(expression);
    Schedule::from_str(&normalized).map_err(|source| ScheduleError::Invalid {
        expression: expression.to_string(),
        source,
    })
}

fn normalize(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// The job runner handed to the registry; boxed so the registry does not
/// depend on the scrape engine directly.
pub type TriggerRunner = Arc<dyn Fn(StoredConfig) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
pub struct CronRegistry {
    jobs: tokio::sync::Mutex<HashMap<i64, JoinHandle<()>>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStatus {
    pub active_triggers: usize,
    pub config_ids: Vec<i64>,
}

impl CronRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers triggers for every scheduled configuration in the store.
    pub async fn sync_all(&self, store: &EngineStore, runner: TriggerRunner) -> ScheduleResult<()> {
        for config in store.list_scheduled_configs()? {
            self.sync(&config, store.clone(), runner.clone()).await?;
        }
        Ok(())
    }

    /// Adds, replaces or removes the trigger for one configuration to match
    /// its current cron columns.
    pub async fn sync(
        &self,
        config: &StoredConfig,
        store: EngineStore,
        runner: TriggerRunner,
    ) -> ScheduleResult<()> {
        self.remove(config.id).await;
        let expression = match (&config.cron_schedule, config.cron_enabled) {
            (Some(expr), true) => expr.clone(),
            _ => return Ok(()),
        };
        let schedule = validate_expression(&expression)?;
        let config_id = config.id;
        let name = config.name.clone();
        let handle = tokio::spawn(trigger_loop(config_id, name, schedule, store, runner));
        self.jobs.lock().await.insert(config_id, handle);
        Ok(())
    }

    pub async fn remove(&self, config_id: i64) {
        if let Some(handle) = self.jobs.lock().await.remove(&config_id) {
            handle.abort();
        }
    }

    pub async fn stop_all(&self) {
        let mut jobs = self.jobs.lock().await;
        for (config_id, handle) in jobs.drain() {
            tracing::debug!(config_id, "stopping cron trigger");
            handle.abort();
        }
    }

    pub async fn status(&self) -> RegistryStatus {
        let jobs = self.jobs.lock().await;
        let mut config_ids: Vec<i64> = jobs.keys().copied().collect();
        config_ids.sort_unstable();
        RegistryStatus {
            active_triggers: config_ids.len(),
            config_ids,
        }
    }
}

async fn trigger_loop(
    config_id: i64,
    name: String,
    schedule: Schedule,
    store: EngineStore,
    runner: TriggerRunner,
) {
    tracing::info!(config_id, config = %name, "cron trigger registered");
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            tracing::warn!(config_id, "cron schedule has no upcoming fire time");
            return;
        };
        let wait = (next - Utc::now()).num_milliseconds().max(0) as u64;
        tokio::time::sleep(Duration::from_millis(wait)).await;

        // Re-read so edits made since registration take effect.
        let current = match store.get_config(config_id) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(config_id, error = %err, "failed to re-read scheduled configuration");
                continue;
            }
        };
        let Some(current) = current else {
            tracing::info!(config_id, "scheduled configuration removed, dropping trigger");
            return;
        };
        if !current.cron_enabled {
            tracing::info!(config_id, "scheduled configuration disabled, dropping trigger");
            return;
        }
        tracing::info!(config_id, config = %current.name, "cron trigger firing");
        runner(current).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_five_field_expressions() {
        assert!(validate_expression("*/5 * * * *").is_ok());
        assert!(validate_expression("0 3 * * 1").is_ok());
    }

    #[test]
    fn accepts_six_field_expressions() {
        assert!(validate_expression("30 */5 * * * *").is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(validate_expression("every tuesday").is_err());
        assert!(validate_expression("* * *").is_err());
        assert!(validate_expression("99 * * * *").is_err());
    }

    #[tokio::test]
    async fn status_reflects_registered_triggers() {
        let registry = CronRegistry::new();
        let status = registry.status().await;
        assert_eq!(status.active_triggers, 0);
        assert!(status.config_ids.is_empty());
    }
}
