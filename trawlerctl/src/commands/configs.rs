use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;
use trawler_core::{NewConfig, StoredConfig};

use super::resolve_config;
use crate::{AppContext, Result, TextRender};

#[derive(Debug, Serialize)]
pub struct ConfigRow {
    pub id: i64,
    pub name: String,
    pub start_urls: usize,
    pub page_type: String,
    pub cron_schedule: Option<String>,
    pub cron_enabled: bool,
}

impl From<&StoredConfig> for ConfigRow {
    fn from(config: &StoredConfig) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            start_urls: config.doc.start_urls.len(),
            page_type: format!("{:?}", config.doc.page_type),
            cron_schedule: config.cron_schedule.clone(),
            cron_enabled: config.cron_enabled,
        }
    }
}

pub fn list(context: &AppContext) -> Result<Vec<ConfigRow>> {
    let configs = context.store.list_configs()?;
    Ok(configs.iter().map(ConfigRow::from).collect())
}

pub fn show(context: &AppContext, name_or_id: &str) -> Result<StoredConfig> {
    resolve_config(&context.store, name_or_id)
}

/// Creates the configuration, or replaces it when the name already exists.
pub fn import(context: &AppContext, file: &Path) -> Result<StoredConfig> {
    let payload = load_payload(file)?;
    let stored = match context.store.get_config_by_name(&payload.name)? {
        Some(existing) => context.store.update_config(existing.id, &payload)?,
        None => context.store.create_config(&payload)?,
    };
    Ok(stored)
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: i64,
    pub name: String,
}

pub fn delete(context: &AppContext, name_or_id: &str) -> Result<Deleted> {
    let existing = resolve_config(&context.store, name_or_id)?;
    context.store.delete_config(existing.id)?;
    Ok(Deleted {
        id: existing.id,
        name: existing.name,
    })
}

fn load_payload(file: &Path) -> Result<NewConfig> {
    let content = std::fs::read_to_string(file)?;
    Ok(serde_json::from_str(&content)?)
}

impl TextRender for Vec<ConfigRow> {
    fn text(&self) -> String {
        if self.is_empty() {
            return "no configurations stored".to_string();
        }
        let mut out = String::new();
        for row in self {
            let schedule = match (&row.cron_schedule, row.cron_enabled) {
                (Some(expr), true) => format!("cron {expr}"),
                (Some(expr), false) => format!("cron {expr} (disabled)"),
                _ => "no schedule".to_string(),
            };
            let _ = writeln!(
                out,
                "#{:<4} {:<24} {:<12} {} start url(s), {}",
                row.id, row.name, row.page_type, row.start_urls, schedule
            );
        }
        out.trim_end().to_string()
    }
}

impl TextRender for StoredConfig {
    fn text(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

impl TextRender for Deleted {
    fn text(&self) -> String {
        format!("deleted configuration #{} ({})", self.id, self.name)
    }
}
