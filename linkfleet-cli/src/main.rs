use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use linkfleet_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use linkfleet_core::{AccountId, Config, SessionStore};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "linkfleet")]
#[command(author, version, about = "Administer linked-device session state", long_about = None)]
struct Args {
    /// Configuration file (TOML). Environment variables still apply on top.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect or edit persisted sessions
    #[command(subcommand)]
    Sessions(SessionsCommand),

    /// Inspect or create configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum SessionsCommand {
    /// List accounts on the active list
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Remove an account's credentials and drop it from the active list
    Forget { account: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        path: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the effective configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let mut log_config = LogConfig::from_config(&config.logging)?;
    if let Some(raw) = &args.log_level {
        log_config.level = raw.parse::<LogLevel>()?;
    }
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    init_logging_with_config(log_config)?;
    linkfleet_core::metrics::init_metrics();

    debug!(?config, "configuration loaded");

    match args.command {
        Command::Sessions(command) => {
            let store = SessionStore::from_config(&config.store);
            run_sessions(command, &store).await
        }
        Command::Config(command) => run_config(command, &config),
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let Some(raw) = path else {
        return Ok(Config::from_env()?);
    };

    let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
    let mut config = Config::from_file(&expanded)
        .with_context(|| format!("loading config from {}", expanded.display()))?;
    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

async fn run_sessions(command: SessionsCommand, store: &SessionStore) -> Result<()> {
    match command {
        SessionsCommand::List { json } => {
            let accounts = store.load_active().await?;
            info!(count = accounts.len(), "found active sessions");

            if json {
                let mut entries = Vec::with_capacity(accounts.len());
                for account in &accounts {
                    entries.push(serde_json::json!({
                        "account": account.as_str(),
                        "paired": store.has_credentials(account).await,
                        "dir": store.dir_for(account).display().to_string(),
                    }));
                }
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            if accounts.is_empty() {
                println!("no active senders");
                return Ok(());
            }
            for account in &accounts {
                let state = if store.has_credentials(account).await {
                    "paired"
                } else {
                    "no credentials"
                };
                println!("{}\t{}", account, state);
            }
            Ok(())
        }
        SessionsCommand::Forget { account } => {
            let account: AccountId = account.parse()?;
            let had_dir = store.dir_for(&account).exists();

            store.delete_credentials(&account).await?;
            let was_active = store.remove_active(&account).await?;

            if !had_dir && !was_active {
                bail!("no session found for {}", account);
            }
            info!(account = %account, "session forgotten");
            println!("forgot {}", account);
            Ok(())
        }
    }
}

fn run_config(command: ConfigCommand, config: &Config) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        ConfigCommand::Init { path, force } => {
            let path = PathBuf::from(shellexpand::tilde(&path).as_ref());
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save_to_file(&path)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        ConfigCommand::Check => {
            // Already validated while loading
            println!("configuration ok");
            Ok(())
        }
    }
}
