pub mod browser;
pub mod config;
pub mod error;
pub mod model;
pub mod schedule;
pub mod scrape;
pub mod sqlite;
pub mod store;
pub mod vault;

pub use browser::{
    BrowserBackend, BrowserError, BrowserLease, BrowserPool, BrowserResult, ChromiumBackend,
    ChromiumHandle, PageLease, PoolOptions, PoolStats,
};
pub use config::{
    load_engine_config, ChromiumSection, EngineConfig, PathsSection, PoolSection, ScrapingSection,
    ServerSection, VaultSection,
};
pub use error::{ConfigError, Result};
pub use model::{
    ExtractFrom, FieldMapping, InteractionConfig, InteractionStrategy, LoginConfig, PageLoadWait,
    PageType, PoolSettings, ProcessingResult, RunSummary, ScrapeOptions, ScraperConfigDoc,
    ScreenshotOptions, StoredConfig, WaitStrategy,
};
pub use schedule::{
    validate_expression, CronRegistry, RegistryStatus, ScheduleError, ScheduleResult, TriggerRunner,
};
pub use scrape::{JobError, JobOutcome, JobResult, ScrapeEngine};
pub use store::{
    Account, EngineStore, EngineStoreBuilder, ItemPage, ItemQuery, NewConfig, ScrapedItem, UpsertOutcome,
    StoreError, StoreResult,
};
pub use vault::{SecretVault, VaultError, VaultResult};
