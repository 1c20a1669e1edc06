use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use trawler_core::{load_engine_config, EngineConfig, EngineStore, SecretVault};

pub mod commands;
pub mod server;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] trawler_core::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] trawler_core::StoreError),
    #[error("vault error: {0}")]
    Vault(#[from] trawler_core::VaultError),
    #[error("browser error: {0}")]
    Browser(#[from] trawler_core::BrowserError),
    #[error("job error: {0}")]
    Job(#[from] trawler_core::JobError),
    #[error("schedule error: {0}")]
    Schedule(#[from] trawler_core::ScheduleError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Browser fleet scraping engine control interface", long_about = None)]
pub struct Cli {
    /// Path to engine.toml
    #[arg(long, default_value = "configs/engine.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server
    Serve,
    /// Run scraper configurations immediately
    Run(RunArgs),
    /// Manage scraper configurations
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Manage login accounts
    #[command(subcommand)]
    Account(AccountCommands),
    /// Inspect or change the persisted pool settings
    #[command(subcommand)]
    Settings(SettingsCommands),
    /// Browse scraped items
    #[command(subcommand)]
    Items(ItemCommands),
    /// Summarize stored configurations and scraped data
    Status,
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration names or ids to run
    #[arg(required = true)]
    pub configs: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// List stored configurations
    List,
    /// Show one configuration in full
    Show(ConfigRefArgs),
    /// Create or replace a configuration from a JSON file
    Import(ConfigFileArgs),
    /// Delete a configuration and its scraped items
    Delete(ConfigRefArgs),
}

#[derive(Args, Debug)]
pub struct ConfigRefArgs {
    /// Configuration name or id
    pub config: String,
}

#[derive(Args, Debug)]
pub struct ConfigFileArgs {
    /// Path to a JSON payload
    pub file: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum AccountCommands {
    /// Store a login account with an encrypted password
    Add(AccountAddArgs),
    /// List stored accounts (passwords are never shown)
    List,
}

#[derive(Args, Debug)]
pub struct AccountAddArgs {
    /// Platform the account belongs to
    pub platform: String,
    /// Login username
    pub username: String,
    /// Password to encrypt at rest
    pub password: String,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Show the effective pool settings
    Show,
    /// Persist new pool settings
    Set(SettingsSetArgs),
}

#[derive(Args, Debug)]
pub struct SettingsSetArgs {
    #[arg(long)]
    pub max_pool_size: Option<u32>,
    #[arg(long)]
    pub min_pool_size: Option<u32>,
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,
    #[arg(long)]
    pub retry_limit: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum ItemCommands {
    /// List scraped items, newest first
    List(ItemListArgs),
    /// Show one scraped item
    Show(ItemShowArgs),
}

#[derive(Args, Debug)]
pub struct ItemListArgs {
    /// Restrict to one configuration (name or id)
    #[arg(long)]
    pub config: Option<String>,
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    #[arg(long, default_value_t = 25)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct ItemShowArgs {
    /// Item id
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        let name = command.get_name().to_string();
        clap_complete::generate(args.shell, &mut command, name, &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match cli.command {
        Commands::Serve => server::serve(context).await,
        Commands::Run(args) => {
            let summaries = commands::jobs::run_now(&context, &args).await?;
            render(&summaries, cli.format)
        }
        Commands::Config(ConfigCommands::List) => {
            let configs = commands::configs::list(&context)?;
            render(&configs, cli.format)
        }
        Commands::Config(ConfigCommands::Show(args)) => {
            let config = commands::configs::show(&context, &args.config)?;
            render(&config, cli.format)
        }
        Commands::Config(ConfigCommands::Import(args)) => {
            let config = commands::configs::import(&context, &args.file)?;
            render(&config, cli.format)
        }
        Commands::Config(ConfigCommands::Delete(args)) => {
            let deleted = commands::configs::delete(&context, &args.config)?;
            render(&deleted, cli.format)
        }
        Commands::Account(AccountCommands::Add(args)) => {
            let account = commands::accounts::add(&context, &args)?;
            render(&account, cli.format)
        }
        Commands::Account(AccountCommands::List) => {
            let accounts = commands::accounts::list(&context)?;
            render(&accounts, cli.format)
        }
        Commands::Settings(SettingsCommands::Show) => {
            let settings = commands::settings::show(&context)?;
            render(&settings, cli.format)
        }
        Commands::Settings(SettingsCommands::Set(args)) => {
            let settings = commands::settings::set(&context, &args)?;
            render(&settings, cli.format)
        }
        Commands::Items(ItemCommands::List(args)) => {
            let page = commands::items::list(&context, &args)?;
            render(&page, cli.format)
        }
        Commands::Items(ItemCommands::Show(args)) => {
            let item = commands::items::show(&context, args.id)?;
            render(&item, cli.format)
        }
        Commands::Status => {
            let report = commands::status::gather(&context)?;
            render(&report, cli.format)
        }
        Commands::Completions(_) => Ok(()),
    }
}

pub struct AppContext {
    pub config: EngineConfig,
    pub store: EngineStore,
    pub vault: SecretVault,
}

impl AppContext {
    pub fn new(cli: &Cli) -> Result<Self> {
        let config = load_engine_config(&cli.config)?;
        let database_path = config.database_path();
        if let Some(parent) = database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = EngineStore::builder()
            .path(&database_path)
            .create_if_missing(true)
            .build()?;
        store.initialize()?;
        let vault = SecretVault::from_base64_key(&config.vault.key_base64)?;
        Ok(Self {
            config,
            store,
            vault,
        })
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + TextRender,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.text());
            Ok(())
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(())
        }
    }
}

/// Human-readable rendering for `--format text`.
pub trait TextRender {
    fn text(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_multiple_configs() {
        let cli = Cli::parse_from(["trawlerctl", "run", "jobs", "news"]);
        match cli.command {
            Commands::Run(args) => assert_eq!(args.configs, vec!["jobs", "news"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_settings_set_flags() {
        let cli = Cli::parse_from([
            "trawlerctl",
            "settings",
            "set",
            "--max-pool-size",
            "8",
            "--idle-timeout-ms",
            "30000",
        ]);
        match cli.command {
            Commands::Settings(SettingsCommands::Set(args)) => {
                assert_eq!(args.max_pool_size, Some(8));
                assert_eq!(args.idle_timeout_ms, Some(30_000));
                assert_eq!(args.min_pool_size, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
