use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    pub server: ServerSection,
    pub pool: PoolSection,
    pub chromium: ChromiumSection,
    pub scraping: ScrapingSection,
    pub vault: VaultSection,
    pub paths: PathsSection,
}

impl EngineConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.database_path)
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.screenshots_dir)
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub bind_addr: String,
    pub port: u16,
    pub cors_permissive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolSection {
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub idle_timeout_ms: u64,
    pub retry_limit: u32,
    pub lease_poll_initial_ms: u64,
    pub lease_poll_interval_ms: u64,
}

impl PoolSection {
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::Invalid {
                field: "pool.max_pool_size".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(ConfigError::Invalid {
                field: "pool.min_pool_size".into(),
                reason: "must not exceed max_pool_size".into(),
            });
        }
        if self.idle_timeout_ms < 1000 {
            return Err(ConfigError::Invalid {
                field: "pool.idle_timeout_ms".into(),
                reason: "must be at least 1000".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: String,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapingSection {
    pub default_scroll_delay_ms: u64,
    pub default_content_load_wait_ms: u64,
    pub default_max_empty_scrolls: u32,
    pub default_stagnation_timeout_ms: u64,
    pub max_detail_pages_per_job: usize,
    pub login_wait_timeout_ms: u64,
    pub type_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultSection {
    pub key_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
    pub screenshots_dir: String,
    pub database_path: String,
}

pub fn load_engine_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    let config: EngineConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
