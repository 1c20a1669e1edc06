use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use trawler_core::model::RunSummary;
use trawler_core::{BrowserPool, ChromiumBackend, PoolOptions, ScrapeEngine};

use crate::{AppContext, Result, RunArgs, TextRender};

/// Boots a pool, runs the named configurations, and tears the pool down.
pub async fn run_now(context: &AppContext, args: &RunArgs) -> Result<BTreeMap<String, RunSummary>> {
    let settings = context.store.load_pool_settings()?;
    let options = PoolOptions::from_section(&context.config.pool).with_settings(&settings);
    let backend = ChromiumBackend::new(context.config.chromium.clone());
    let pool = Arc::new(BrowserPool::new(backend, options));
    pool.initialize().await?;

    let engine = ScrapeEngine::new(
        Arc::clone(&pool),
        context.store.clone(),
        context.vault.clone(),
        context.config.scraping.clone(),
        context.config.screenshots_dir(),
    );

    let mut configs = Vec::new();
    for name_or_id in &args.configs {
        configs.push(engine.resolve_config(name_or_id)?);
    }
    let summaries = engine.run_many(&configs).await;

    pool.shutdown().await?;
    Ok(summaries)
}

impl TextRender for BTreeMap<String, RunSummary> {
    fn text(&self) -> String {
        let mut out = String::new();
        for (name, summary) in self {
            let status = if summary.success { "ok" } else { "failed" };
            let _ = writeln!(
                out,
                "{name}: {status}, {} items, {}",
                summary.results_count, summary.message
            );
        }
        out.trim_end().to_string()
    }
}
