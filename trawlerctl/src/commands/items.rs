use std::fmt::Write as _;

use trawler_core::store::{ItemPage, ItemQuery, ScrapedItem};

use super::resolve_config;
use crate::{AppContext, AppError, ItemListArgs, Result, TextRender};

pub fn list(context: &AppContext, args: &ItemListArgs) -> Result<ItemPage> {
    let config_id = match &args.config {
        Some(name_or_id) => Some(resolve_config(&context.store, name_or_id)?.id),
        None => None,
    };
    let query = ItemQuery {
        config_id,
        page: args.page,
        limit: args.limit,
        newest_first: true,
    };
    Ok(context.store.list_items(&query)?)
}

pub fn show(context: &AppContext, id: i64) -> Result<ScrapedItem> {
    context
        .store
        .get_item(id)?
        .ok_or_else(|| AppError::MissingResource(format!("scraped item {id}")))
}

impl TextRender for ItemPage {
    fn text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "page {}/{} ({} items total)",
            self.page, self.total_pages, self.total_items
        );
        for item in &self.items {
            let _ = writeln!(out, "#{:<6} [config {}] {}", item.id, item.config_id, item.url);
        }
        out.trim_end().to_string()
    }
}

impl TextRender for ScrapedItem {
    fn text(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}
