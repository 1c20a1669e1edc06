//! Single detail-page fetch: lease, prepare, extract once, release.
//!
//! "No data" is a valid outcome here, and hard failures are swallowed to
//! the same `None` (logged) so one bad detail page never fails a batch.

use std::path::Path;

use chromiumoxide::page::Page;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::browser::error::{BrowserError, BrowserResult};
use crate::browser::page::{js_string, prepare_page, take_screenshot};
use crate::browser::{BrowserPool, ChromiumBackend};
use crate::model::ScraperConfigDoc;

use super::extract::{extract_fields, strip_excluded};

pub(crate) struct DetailJob<'a> {
    pub pool: &'a BrowserPool<ChromiumBackend>,
    pub doc: &'a ScraperConfigDoc,
    pub screenshots_dir: &'a Path,
    pub config_name: &'a str,
}

impl DetailJob<'_> {
    /// Fetches and extracts one detail page, or `None` when the page
    /// yielded nothing or failed.
    pub async fn fetch(&self, url: &str) -> Option<Value> {
        match self.try_fetch(url).await {
            Ok(value) => value,
            Err(err) => {
                warn!(url, error = %err, "detail page fetch failed");
                None
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> BrowserResult<Option<Value>> {
        let lease = self.pool.lease_page(Some(url)).await?;
        let outcome = self.extract_on(lease.page(), url).await;
        self.pool.release_page(lease).await;
        outcome
    }

    async fn extract_on(&self, page: &Page, url: &str) -> BrowserResult<Option<Value>> {
        prepare_page(page, &self.doc.wait, &self.doc.scrape_options.popup_selectors).await?;

        let selector = self
            .doc
            .detail_item_selector
            .as_deref()
            .unwrap_or(&self.doc.item_selector);
        let script = format!(
            "((sel) => {{ const el = document.querySelector(sel); return el ? el.outerHTML : null; }})({})",
            js_string(selector)
        );
        let container: Option<String> = page
            .evaluate(script.as_str())
            .await?
            .into_value()
            .map_err(|err| {
                BrowserError::Unexpected(format!("unexpected evaluation result: {err}"))
            })?;

        let Some(html) = container else {
            debug!(url, selector, "detail selector matched nothing");
            if self.doc.screenshots.enabled {
                take_screenshot(
                    page,
                    self.screenshots_dir,
                    self.config_name,
                    "detail_no_data",
                    url,
                )
                .await;
            }
            return Ok(None);
        };

        if self.doc.screenshots.enabled {
            take_screenshot(page, self.screenshots_dir, self.config_name, "detail", url).await;
        }

        let base = Url::parse(url)
            .map_err(|err| BrowserError::Unexpected(format!("invalid detail url {url}: {err}")))?;
        let cleaned = strip_excluded(&html, &self.doc.scrape_options.exclude_selectors);
        let mappings = self
            .doc
            .detail_field_mappings
            .as_ref()
            .unwrap_or(&self.doc.field_mappings);
        let value = extract_fields(&cleaned, &base, mappings);

        let empty = value.as_object().map(|map| map.is_empty()).unwrap_or(true);
        if empty {
            debug!(url, "detail extraction produced no data");
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }
}
