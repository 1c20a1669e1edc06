use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored scraper configuration: the JSON document plus the row metadata
/// the store keeps alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConfig {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub doc: ScraperConfigDoc,
    pub cron_schedule: Option<String>,
    pub cron_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The declarative scraping document authored by users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfigDoc {
    pub start_urls: Vec<String>,
    pub item_selector: String,
    pub field_mappings: BTreeMap<String, FieldMapping>,
    #[serde(default)]
    pub page_type: PageType,
    #[serde(default)]
    pub interaction: InteractionConfig,
    #[serde(default)]
    pub wait: PageLoadWait,
    #[serde(default)]
    pub login: Option<LoginConfig>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub scrape_options: ScrapeOptions,
    #[serde(default)]
    pub screenshots: ScreenshotOptions,
    #[serde(default)]
    pub detail_item_selector: Option<String>,
    #[serde(default)]
    pub detail_field_mappings: Option<BTreeMap<String, FieldMapping>>,
}

impl ScraperConfigDoc {
    /// Whether list items should be enriched with a detail-page fetch.
    pub fn wants_detail_enrichment(&self) -> bool {
        self.detail_field_mappings.is_some() || self.detail_item_selector.is_some()
    }

    /// Collects every problem a write-time validation should reject.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.start_urls.is_empty() {
            problems.push("start_urls must not be empty".into());
        }
        for url in &self.start_urls {
            if url::Url::parse(url).is_err() {
                problems.push(format!("start url is not a valid URL: {url}"));
            }
        }
        if self.item_selector.trim().is_empty() {
            problems.push("item_selector must not be empty".into());
        }
        if self.field_mappings.is_empty() {
            problems.push("field_mappings must not be empty".into());
        }
        for (key, mapping) in &self.field_mappings {
            problems.extend(mapping.validation_errors(key));
        }
        if let Some(detail) = &self.detail_field_mappings {
            for (key, mapping) in detail {
                problems.extend(mapping.validation_errors(key));
            }
        }
        problems.extend(self.interaction.validation_errors());
        if let Some(login) = &self.login {
            problems.extend(login.validation_errors());
        }
        problems
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub selector: String,
    #[serde(default)]
    pub extract_from: ExtractFrom,
    #[serde(default)]
    pub attribute_name: Option<String>,
}

impl FieldMapping {
    fn validation_errors(&self, key: &str) -> Vec<String> {
        let mut problems = Vec::new();
        if self.selector.trim().is_empty() {
            problems.push(format!("mapping {key}: selector must not be empty"));
        }
        match self.extract_from {
            ExtractFrom::Attribute if self.attribute_name.is_none() => {
                problems.push(format!(
                    "mapping {key}: attribute_name is required when extract_from is attribute"
                ));
            }
            _ => {}
        }
        problems
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractFrom {
    #[default]
    Text,
    Attribute,
    Html,
}

/// How a start URL is treated: a list to interact with and harvest, or a
/// single detail page fetched once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    #[default]
    ListPage,
    DetailPage,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InteractionConfig {
    #[serde(default)]
    pub strategy: InteractionStrategy,
    #[serde(default)]
    pub scroll_delay_ms: Option<u64>,
    #[serde(default)]
    pub content_load_wait_ms: Option<u64>,
    #[serde(default)]
    pub max_empty_scrolls: Option<u32>,
    #[serde(default)]
    pub max_scrolls: Option<u32>,
    #[serde(default)]
    pub load_more_selector: Option<String>,
    #[serde(default)]
    pub max_clicks: Option<u32>,
    #[serde(default)]
    pub click_delay_ms: Option<u64>,
    #[serde(default)]
    pub stagnation_timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_items: Option<usize>,
}

impl InteractionConfig {
    fn validation_errors(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.strategy == InteractionStrategy::LoadMoreButton
            && self
                .load_more_selector
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            problems.push("interaction: load_more_selector is required for load_more_button".into());
        }
        if matches!(self.scroll_delay_ms, Some(0)) {
            problems.push("interaction: scroll_delay_ms must be positive".into());
        }
        if matches!(self.max_scrolls, Some(0)) {
            problems.push("interaction: max_scrolls must be positive".into());
        }
        problems
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStrategy {
    #[default]
    None,
    InfiniteScroll,
    FixedScrolls,
    LoadMoreButton,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PageLoadWait {
    #[serde(default)]
    pub strategy: WaitStrategy,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    #[default]
    None,
    Timeout,
    Selector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    pub login_url: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    #[serde(default)]
    pub post_login_selector: Option<String>,
    pub account_id: i64,
}

impl LoginConfig {
    fn validation_errors(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if url::Url::parse(&self.login_url).is_err() {
            problems.push(format!("login: login_url is not a valid URL: {}", self.login_url));
        }
        for (field, value) in [
            ("username_selector", &self.username_selector),
            ("password_selector", &self.password_selector),
            ("submit_selector", &self.submit_selector),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("login: {field} must not be empty"));
            }
        }
        problems
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScrapeOptions {
    #[serde(default)]
    pub exclude_selectors: Vec<String>,
    /// Overlays to dismiss after navigation (cookie banners, modals).
    #[serde(default)]
    pub popup_selectors: Vec<String>,
    /// Selector for the anchor leading to the detail page; when absent the
    /// first same-host link inside the item is used.
    #[serde(default)]
    pub detail_link_selector: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ScreenshotOptions {
    #[serde(default)]
    pub enabled: bool,
}

/// Pool options persisted as the engine-settings singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub idle_timeout_ms: u64,
    pub retry_limit: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_pool_size: 5,
            min_pool_size: 2,
            idle_timeout_ms: 60_000,
            retry_limit: 3,
        }
    }
}

impl PoolSettings {
    pub fn validation_errors(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_pool_size == 0 {
            problems.push("max_pool_size must be at least 1".into());
        }
        if self.min_pool_size > self.max_pool_size {
            problems.push("min_pool_size must not exceed max_pool_size".into());
        }
        if self.idle_timeout_ms < 10_000 {
            problems.push("idle_timeout_ms must be at least 10000".into());
        }
        problems
    }
}

/// One extracted record: the key it is persisted under plus the nested
/// field data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub url: String,
    pub data: serde_json::Value,
}

/// Per-configuration outcome of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub success: bool,
    pub results_count: usize,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_doc() -> ScraperConfigDoc {
        let mut mappings = BTreeMap::new();
        mappings.insert(
            "title".to_string(),
            FieldMapping {
                selector: "h2".into(),
                extract_from: ExtractFrom::Text,
                attribute_name: None,
            },
        );
        ScraperConfigDoc {
            start_urls: vec!["https://example.com/list".into()],
            item_selector: ".item".into(),
            field_mappings: mappings,
            page_type: PageType::ListPage,
            interaction: InteractionConfig::default(),
            wait: PageLoadWait::default(),
            login: None,
            keywords: Vec::new(),
            scrape_options: ScrapeOptions::default(),
            screenshots: ScreenshotOptions::default(),
            detail_item_selector: None,
            detail_field_mappings: None,
        }
    }

    #[test]
    fn minimal_doc_is_valid() {
        assert!(minimal_doc().validation_errors().is_empty());
    }

    #[test]
    fn attribute_mapping_requires_name() {
        let mut doc = minimal_doc();
        doc.field_mappings.insert(
            "link".into(),
            FieldMapping {
                selector: "a".into(),
                extract_from: ExtractFrom::Attribute,
                attribute_name: None,
            },
        );
        let problems = doc.validation_errors();
        assert!(problems.iter().any(|p| p.contains("attribute_name")));
    }

    #[test]
    fn load_more_requires_selector() {
        let mut doc = minimal_doc();
        doc.interaction.strategy = InteractionStrategy::LoadMoreButton;
        let problems = doc.validation_errors();
        assert!(problems.iter().any(|p| p.contains("load_more_selector")));
    }

    #[test]
    fn doc_round_trips_through_json() {
        let doc = minimal_doc();
        let json = serde_json::to_string(&doc).unwrap();
        let back: ScraperConfigDoc = serde_json::from_str(&json).unwrap();
        assert_eq!(back.item_selector, ".item");
        assert_eq!(back.field_mappings.len(), 1);
    }

    #[test]
    fn pool_settings_validation() {
        let mut settings = PoolSettings::default();
        assert!(settings.validation_errors().is_empty());
        settings.min_pool_size = 9;
        settings.idle_timeout_ms = 500;
        let problems = settings.validation_errors();
        assert_eq!(problems.len(), 2);
    }
}
