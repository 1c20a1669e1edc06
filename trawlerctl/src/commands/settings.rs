use trawler_core::PoolSettings;

use crate::{AppContext, Result, SettingsSetArgs, TextRender};

pub fn show(context: &AppContext) -> Result<PoolSettings> {
    Ok(context.store.load_pool_settings()?)
}

pub fn set(context: &AppContext, args: &SettingsSetArgs) -> Result<PoolSettings> {
    let mut settings = context.store.load_pool_settings()?;
    if let Some(value) = args.max_pool_size {
        settings.max_pool_size = value;
    }
    if let Some(value) = args.min_pool_size {
        settings.min_pool_size = value;
    }
    if let Some(value) = args.idle_timeout_ms {
        settings.idle_timeout_ms = value;
    }
    if let Some(value) = args.retry_limit {
        settings.retry_limit = value;
    }
    Ok(context.store.save_pool_settings(&settings)?)
}

impl TextRender for PoolSettings {
    fn text(&self) -> String {
        format!(
            "pool: max {} / min {}, idle timeout {} ms, retry limit {}",
            self.max_pool_size, self.min_pool_size, self.idle_timeout_ms, self.retry_limit
        )
    }
}
