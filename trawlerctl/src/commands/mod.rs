pub mod accounts;
pub mod configs;
pub mod items;
pub mod jobs;
pub mod settings;
pub mod status;

use trawler_core::{EngineStore, StoredConfig};

use crate::{AppError, Result};

/// Looks a configuration up by numeric id or unique name.
pub(crate) fn resolve_config(store: &EngineStore, name_or_id: &str) -> Result<StoredConfig> {
    let found = match name_or_id.parse::<i64>() {
        Ok(id) => store.get_config(id)?,
        Err(_) => store.get_config_by_name(name_or_id)?,
    };
    found.ok_or_else(|| AppError::MissingResource(format!("configuration {name_or_id}")))
}
