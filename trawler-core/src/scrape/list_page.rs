//! One list-page start URL: lease, interact, extract, then bounded detail
//! fan-out. The list page is released before any detail fetch starts so
//! fan-out demand never holds two leases per task.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::error::{BrowserError, BrowserResult};
use crate::browser::page::{prepare_page, take_screenshot};
use crate::browser::{BrowserPool, ChromiumBackend};
use crate::config::ScrapingSection;
use crate::model::{ProcessingResult, ScraperConfigDoc};

use super::detail_page::DetailJob;
use super::extract::{extract_fields, find_detail_url};
use super::interact::{collect_items, CdpSurface, ResolvedInteraction};

pub(crate) struct ListJob<'a> {
    pub pool: &'a BrowserPool<ChromiumBackend>,
    pub doc: &'a ScraperConfigDoc,
    pub scraping: &'a ScrapingSection,
    pub screenshots_dir: &'a Path,
    pub config_name: &'a str,
    /// Job-wide set of detail URLs already dispatched.
    pub processed: &'a Mutex<HashSet<String>>,
    /// Job-wide count of detail fetches dispatched, bounded by the cap.
    pub detail_dispatched: &'a AtomicUsize,
    /// Fan-out limiter sized to the pool capacity.
    pub limiter: &'a Semaphore,
}

struct ListEntry {
    key: String,
    data: Value,
    detail_url: Option<String>,
}

impl ListJob<'_> {
    pub async fn run(&self, start_url: &str) -> BrowserResult<Vec<ProcessingResult>> {
        let base = Url::parse(start_url).map_err(|err| {
            BrowserError::Unexpected(format!("invalid start url {start_url}: {err}"))
        })?;

        let lease = self.pool.lease_page(Some(start_url)).await?;
        let collected = self.collect_on_page(&lease, start_url).await;
        self.pool.release_page(lease).await;
        let raw_items = collected?;

        info!(
            url = start_url,
            items = raw_items.len(),
            "list interaction finished"
        );

        let entries = self.build_entries(&raw_items, &base, start_url);
        if !self.doc.wants_detail_enrichment() {
            return Ok(entries
                .into_iter()
                .map(|entry| ProcessingResult {
                    url: entry.key,
                    data: merged_payload(entry.data, None),
                })
                .collect());
        }

        let merged = futures::future::join_all(
            entries
                .into_iter()
                .map(|entry| self.enrich_entry(entry)),
        )
        .await;
        Ok(merged)
    }

    async fn collect_on_page(
        &self,
        lease: &crate::browser::PageLease,
        start_url: &str,
    ) -> BrowserResult<Vec<String>> {
        let page = lease.page();
        prepare_page(page, &self.doc.wait, &self.doc.scrape_options.popup_selectors).await?;
        let surface = CdpSurface::new(page);
        let options = ResolvedInteraction::resolve(&self.doc.interaction, self.scraping);
        let items = collect_items(&surface, &self.doc.item_selector, &options).await?;
        if self.doc.screenshots.enabled {
            take_screenshot(
                page,
                self.screenshots_dir,
                self.config_name,
                "list",
                start_url,
            )
            .await;
        }
        Ok(items)
    }

    /// Extracts list fields per item and deduplicates by resolved detail
    /// URL, falling back to a synthetic per-index key.
    fn build_entries(&self, raw_items: &[String], base: &Url, start_url: &str) -> Vec<ListEntry> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for (index, html) in raw_items.iter().enumerate() {
            let data = extract_fields(html, base, &self.doc.field_mappings);
            let detail_url = find_detail_url(
                html,
                base,
                self.doc.scrape_options.detail_link_selector.as_deref(),
            );
            let key = detail_url
                .clone()
                .unwrap_or_else(|| format!("{start_url}#item-{index}"));
            if !seen.insert(key.clone()) {
                continue;
            }
            entries.push(ListEntry {
                key,
                data,
                detail_url,
            });
        }
        entries
    }

    async fn enrich_entry(&self, entry: ListEntry) -> ProcessingResult {
        let detail_data = match &entry.detail_url {
            Some(url) => self.fetch_detail(url).await,
            None => None,
        };
        ProcessingResult {
            url: entry.key,
            data: merged_payload(entry.data, detail_data),
        }
    }

    async fn fetch_detail(&self, url: &str) -> Option<Value> {
        let admitted = {
            let mut processed = self.processed.lock().await;
            if processed.contains(url) {
                debug!(url, "detail url already dispatched this run");
                false
            } else if self.detail_dispatched.load(Ordering::SeqCst)
                >= self.scraping.max_detail_pages_per_job
            {
                warn!(
                    url,
                    cap = self.scraping.max_detail_pages_per_job,
                    "detail page cap reached, skipping"
                );
                false
            } else {
                processed.insert(url.to_string());
                self.detail_dispatched.fetch_add(1, Ordering::SeqCst);
                true
            }
        };
        if !admitted {
            return None;
        }

        let Ok(_permit) = self.limiter.acquire().await else {
            return None;
        };
        let detail = DetailJob {
            pool: self.pool,
            doc: self.doc,
            screenshots_dir: self.screenshots_dir,
            config_name: self.config_name,
        };
        detail.fetch(url).await
    }
}

/// Final per-item payload: the list extraction under `list_data` next to
/// whatever the detail fetch produced under `detail_data`, an empty object
/// when there was none.
fn merged_payload(list_data: Value, detail_data: Option<Value>) -> Value {
    serde_json::json!({
        "list_data": list_data,
        "detail_data": detail_data.unwrap_or_else(|| Value::Object(Default::default())),
    })
}
