use std::fmt::Write as _;

use serde::Serialize;
use trawler_core::PoolSettings;

use crate::{AppContext, Result, TextRender};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database_path: String,
    pub configurations: usize,
    pub scheduled: usize,
    pub accounts: usize,
    pub items_per_config: Vec<ConfigItemCount>,
    pub pool_settings: PoolSettings,
}

#[derive(Debug, Serialize)]
pub struct ConfigItemCount {
    pub id: i64,
    pub name: String,
    pub items: usize,
}

pub fn gather(context: &AppContext) -> Result<StatusReport> {
    let configs = context.store.list_configs()?;
    let scheduled = context.store.list_scheduled_configs()?.len();
    let accounts = context.store.list_accounts()?.len();
    let mut items_per_config = Vec::with_capacity(configs.len());
    for config in &configs {
        items_per_config.push(ConfigItemCount {
            id: config.id,
            name: config.name.clone(),
            items: context.store.count_items(config.id)?,
        });
    }
    Ok(StatusReport {
        database_path: context.config.database_path().display().to_string(),
        configurations: configs.len(),
        scheduled,
        accounts,
        items_per_config,
        pool_settings: context.store.load_pool_settings()?,
    })
}

impl TextRender for StatusReport {
    fn text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "database: {}", self.database_path);
        let _ = writeln!(
            out,
            "{} configuration(s), {} scheduled, {} account(s)",
            self.configurations, self.scheduled, self.accounts
        );
        let _ = writeln!(out, "{}", self.pool_settings.text());
        for entry in &self.items_per_config {
            let _ = writeln!(out, "  #{:<4} {:<24} {} item(s)", entry.id, entry.name, entry.items);
        }
        out.trim_end().to_string()
    }
}
