//! relogin CLI - Command-line interface
//!
//! Usage:
//!   relogin config check [file]
//!   relogin token generate [--config file]
//!   relogin schema

use anyhow::Context;
use clap::{Parser, Subcommand};
use relogin_core::codec::{self, TokenCodec};
use relogin_core::config::AppConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "relogin")]
#[command(about = "Persistent login administration CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Work with persistent login tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Print the SQL schema for PostgreSQL storage
    Schema,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate configuration, then print the effective login policy
    Check {
        /// TOML file; environment variables are applied on top
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Print a fresh composite token and the hash that would be stored
    Generate {
        /// TOML file providing hashing parameters
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(file: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match file {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn check_config(file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(file)?;
    let policy = config.validate().context("Invalid configuration")?;
    tracing::debug!(?policy, "Validated login policy");

    println!("Configuration OK");
    println!("  allow_multiple_login: {}", policy.allow_multiple_login);
    println!("  strong_sessions:      {}", policy.strong_sessions);
    println!("  tie_token_to_ip:      {}", policy.tie_token_to_ip);
    match policy.token_expiration {
        Some(expiration) => println!("  token_expiration:     {}s", expiration.num_seconds()),
        None => println!("  token_expiration:     never"),
    }
    println!("  cookie_max_age:       {}d", policy.cookie_max_age.num_days());
    println!(
        "  storage:              {}",
        if config.database.postgres_url.is_some() {
            "postgres"
        } else {
            "memory"
        }
    );

    Ok(())
}

fn generate_token(config: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let hasher = TokenCodec::new(&config.hashing)?;

    let token = codec::generate();
    let secret_hash = hasher.hash(&token.secret)?;

    let output = serde_json::json!({
        "composite": token.encode(),
        "sequence": token.sequence,
        "secret_hash": secret_hash,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relogin_core=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Check { file } => check_config(file)?,
        },
        Commands::Token { action } => match action {
            TokenAction::Generate { config } => generate_token(config)?,
        },
        Commands::Schema => print!("{}", relogin_api::repository::SCHEMA),
    }

    Ok(())
}
