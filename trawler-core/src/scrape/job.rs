//! Job orchestrator: runs one configuration end to end.
//!
//! Login happens at most once per job, on a leased page that is released
//! before the pipelines start; cookies stay on that pooled browser. Start
//! URLs then run concurrently, and a failing start URL is isolated from
//! the rest of the run.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::page::Page;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::browser::error::BrowserError;
use crate::browser::page::{type_slowly, wait_for_selector};
use crate::browser::{BrowserPool, ChromiumBackend};
use crate::config::ScrapingSection;
use crate::model::{LoginConfig, PageType, ProcessingResult, RunSummary, StoredConfig};
use crate::store::{EngineStore, StoreError};
use crate::vault::SecretVault;

use super::detail_page::DetailJob;
use super::keyword::matches_keywords;
use super::list_page::ListJob;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("login failed: {0}")]
    Login(String),
    #[error("configuration not found: {0}")]
    UnknownConfig(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub config_id: i64,
    pub config_name: String,
    pub results_count: usize,
    pub saved_count: usize,
    pub save_failures: usize,
    pub filtered_out: usize,
    pub failed_start_urls: usize,
}

#[derive(Clone)]
pub struct ScrapeEngine {
    pool: Arc<BrowserPool<ChromiumBackend>>,
    store: EngineStore,
    vault: SecretVault,
    scraping: ScrapingSection,
    screenshots_dir: PathBuf,
}

impl ScrapeEngine {
    pub fn new(
        pool: Arc<BrowserPool<ChromiumBackend>>,
        store: EngineStore,
        vault: SecretVault,
        scraping: ScrapingSection,
        screenshots_dir: PathBuf,
    ) -> Self {
        Self {
            pool,
            store,
            vault,
            scraping,
            screenshots_dir,
        }
    }

    pub fn pool(&self) -> &Arc<BrowserPool<ChromiumBackend>> {
        &self.pool
    }

    pub fn store(&self) -> &EngineStore {
        &self.store
    }

    pub fn vault(&self) -> &SecretVault {
        &self.vault
    }

    /// Looks a configuration up by numeric id or unique name.
    pub fn resolve_config(&self, name_or_id: &str) -> JobResult<StoredConfig> {
        let found = match name_or_id.parse::<i64>() {
            Ok(id) => self.store.get_config(id)?,
            Err(_) => self.store.get_config_by_name(name_or_id)?,
        };
        found.ok_or_else(|| JobError::UnknownConfig(name_or_id.to_string()))
    }

    pub async fn run_config(&self, config: &StoredConfig) -> JobResult<JobOutcome> {
        info!(
            config_id = config.id,
            config = %config.name,
            start_urls = config.doc.start_urls.len(),
            "starting scrape job"
        );

        if let Some(login) = &config.doc.login {
            self.login(login).await?;
        }

        let processed = Mutex::new(HashSet::new());
        let detail_dispatched = AtomicUsize::new(0);
        let limiter = Semaphore::new(self.pool.options().max_pool_size);

        let pipelines = config.doc.start_urls.iter().map(|start_url| {
            let processed = &processed;
            let detail_dispatched = &detail_dispatched;
            let limiter = &limiter;
            async move {
                let outcome = match config.doc.page_type {
                    PageType::DetailPage => {
                        let detail = DetailJob {
                            pool: &self.pool,
                            doc: &config.doc,
                            screenshots_dir: &self.screenshots_dir,
                            config_name: &config.name,
                        };
                        let results = match detail.fetch(start_url).await {
                            Some(data) => vec![ProcessingResult {
                                url: start_url.clone(),
                                data,
                            }],
                            None => Vec::new(),
                        };
                        Ok(results)
                    }
                    PageType::ListPage => {
                        let list = ListJob {
                            pool: &self.pool,
                            doc: &config.doc,
                            scraping: &self.scraping,
                            screenshots_dir: &self.screenshots_dir,
                            config_name: &config.name,
                            processed,
                            detail_dispatched,
                            limiter,
                        };
                        list.run(start_url).await
                    }
                };
                (start_url.clone(), outcome)
            }
        });

        let mut results: Vec<ProcessingResult> = Vec::new();
        let mut failed_start_urls = 0;
        for (start_url, outcome) in futures::future::join_all(pipelines).await {
            match outcome {
                Ok(batch) => results.extend(batch),
                Err(err) => {
                    warn!(config = %config.name, url = %start_url, error = %err, "start url pipeline failed");
                    failed_start_urls += 1;
                }
            }
        }

        let before_filter = results.len();
        results.retain(|result| matches_keywords(&result.data, &config.doc.keywords));
        let filtered_out = before_filter - results.len();

        let records: Vec<(String, serde_json::Value)> = results
            .into_iter()
            .map(|result| (result.url, result.data))
            .collect();
        let saved = self.store.upsert_items(config.id, &records)?;

        let outcome = JobOutcome {
            config_id: config.id,
            config_name: config.name.clone(),
            results_count: before_filter,
            saved_count: saved.written,
            save_failures: saved.failed,
            filtered_out,
            failed_start_urls,
        };
        info!(
            config = %config.name,
            results = outcome.results_count,
            saved = outcome.saved_count,
            save_failures = outcome.save_failures,
            filtered_out = outcome.filtered_out,
            failed_start_urls = outcome.failed_start_urls,
            "scrape job finished"
        );
        Ok(outcome)
    }

    /// Runs several configurations concurrently, reporting one summary per
    /// configuration name.
    pub async fn run_many(&self, configs: &[StoredConfig]) -> BTreeMap<String, RunSummary> {
        let runs = configs.iter().map(|config| async move {
            let outcome = self.run_config(config).await;
            (config.name.clone(), outcome)
        });
        let mut summaries = BTreeMap::new();
        for (name, outcome) in futures::future::join_all(runs).await {
            let summary = match outcome {
                Ok(outcome) => RunSummary {
                    success: true,
                    results_count: outcome.saved_count,
                    message: format!(
                        "saved {} of {} extracted items",
                        outcome.saved_count, outcome.results_count
                    ),
                },
                Err(err) => RunSummary {
                    success: false,
                    results_count: 0,
                    message: err.to_string(),
                },
            };
            summaries.insert(name, summary);
        }
        summaries
    }

    async fn login(&self, login: &LoginConfig) -> JobResult<()> {
        let account = self
            .store
            .get_account(login.account_id)?
            .ok_or_else(|| JobError::Login(format!("account {} not found", login.account_id)))?;
        let password = self.store.account_secret(&self.vault, login.account_id)?;

        info!(platform = %account.platform, username = %account.username, "authenticating before job start");
        let lease = self.pool.lease_page(Some(&login.login_url)).await?;
        let attempt = self
            .perform_login(lease.page(), login, &account.username, &password)
            .await;
        self.pool.release_page(lease).await;
        attempt
    }

    async fn perform_login(
        &self,
        page: &Page,
        login: &LoginConfig,
        username: &str,
        password: &str,
    ) -> JobResult<()> {
        let as_login_err = |err: BrowserError| JobError::Login(err.to_string());
        let delay = Duration::from_millis(self.scraping.type_delay_ms);

        wait_for_selector(page, &login.username_selector, Duration::from_secs(10))
            .await
            .map_err(as_login_err)?;
        let field = page
            .find_element(login.username_selector.clone())
            .await
            .map_err(|err| JobError::Login(err.to_string()))?;
        type_slowly(&field, username, delay)
            .await
            .map_err(as_login_err)?;

        let field = page
            .find_element(login.password_selector.clone())
            .await
            .map_err(|err| JobError::Login(err.to_string()))?;
        type_slowly(&field, password, delay)
            .await
            .map_err(as_login_err)?;

        let submit = page
            .find_element(login.submit_selector.clone())
            .await
            .map_err(|err| JobError::Login(err.to_string()))?;
        submit
            .click()
            .await
            .map_err(|err| JobError::Login(err.to_string()))?;
        if let Err(err) = page.wait_for_navigation().await {
            debug!(error = %err, "no navigation after login submit");
        }

        if let Some(marker) = &login.post_login_selector {
            let timeout = Duration::from_millis(self.scraping.login_wait_timeout_ms);
            wait_for_selector(page, marker, timeout)
                .await
                .map_err(|err| JobError::Login(format!("post-login marker missing: {err}")))?;
        }
        Ok(())
    }
}
