//! sqlsession CLI
//!
//! Operator commands against a session table.
//!
//! Usage:
//! ```bash
//! # Count stored sessions (expired but unswept ones included)
//! sqlsession --database-url sqlite://sessions.db count
//!
//! # Show one session
//! DATABASE_URL=postgres://localhost/app sqlsession get 3f2a9c
//!
//! # Sweep expired sessions every five minutes until Ctrl-C
//! sqlsession --config sqlsession.yaml sweep --every 300
//! ```

mod config;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use config::CliConfig;
use sqlsession_core::config::expand_tilde;
use sqlsession_core::{SessionStore, SqlSessionStore};
use sqlsession_postgres::PostgresBackend;
use sqlsession_sqlite::SqliteBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// sqlsession - maintenance for SQL-backed session tables
#[derive(Parser)]
#[command(name = "sqlsession")]
#[command(about = "Inspect and maintain SQL-backed session tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (YAML or TOML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "SQLSESSION_CONFIG",
        global = true
    )]
    config: Option<String>,

    /// Database URL (sqlite:..., postgres://...); overrides the config file
    #[arg(long, value_name = "URL", env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Show the queries sqlx runs
    #[arg(long, global = true)]
    log_sql: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the number of stored sessions
    Count,
    /// Print a live session as JSON
    Get {
        /// Session ID
        key: String,
    },
    /// Delete a session
    Destroy {
        /// Session ID
        key: String,
    },
    /// Delete every session in the table
    Clear {
        /// Confirm deleting all sessions
        #[arg(long)]
        yes: bool,
    },
    /// Delete expired sessions
    Sweep {
        /// Keep sweeping every N seconds until interrupted
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendKind {
    Sqlite,
    Postgres,
}

impl BackendKind {
    fn from_url(url: &str) -> anyhow::Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => bail!(
                "Unsupported database URL '{}'. Use sqlite:, postgres:// or postgresql://",
                url
            ),
        }
    }
}

/// Expand `~` in the path of a `sqlite://~/...` URL
fn expand_sqlite_url(url: &str) -> anyhow::Result<String> {
    match url.strip_prefix("sqlite://") {
        Some(path) if path.starts_with('~') => {
            let path = expand_tilde(path).context("Failed to expand SQLite path")?;
            Ok(format!("sqlite://{}", path.display()))
        }
        _ => Ok(url.to_string()),
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn init_tracing(level: Level, log_sql: bool) -> anyhow::Result<()> {
    let mut filter = EnvFilter::new(format!("{}", level));

    // sqlx logs every statement at info; keep it quiet unless asked
    if !log_sql {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => tracing::warn!("Failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn open_store(url: &str, config: &CliConfig) -> anyhow::Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match BackendKind::from_url(url)? {
        BackendKind::Sqlite => {
            let url = expand_sqlite_url(url)?;
            let backend = SqliteBackend::connect_ready(&url, &config.store).await?;
            Arc::new(SqlSessionStore::with_config(backend, &config.store)?)
        }
        BackendKind::Postgres => {
            let backend =
                PostgresBackend::connect_ready_with(url, &config.store, &config.postgres).await?;
            Arc::new(SqlSessionStore::with_config(backend, &config.store)?)
        }
    };
    Ok(store)
}

/// Run `cleanup` on a fixed period until Ctrl-C
///
/// A failed sweep is logged and the next tick tries again.
async fn sweep_every(store: &dyn SessionStore, period: Duration) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Sweeping expired sessions every {:?}", period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.cleanup().await {
                    Ok(removed) => info!(removed, "Sweep finished"),
                    Err(e) => error!("Sweep failed: {}", e),
                }
            }
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Stopping sweeper");
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => CliConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => CliConfig::default(),
    };

    let level = parse_level(cli.log_level.as_deref().unwrap_or(&config.logging.level));
    init_tracing(level, cli.log_sql || config.logging.log_sql_queries)?;

    let Some(url) = cli.database_url.clone().or_else(|| config.database_url.clone()) else {
        bail!("No database URL. Pass --database-url, set DATABASE_URL or add database_url to the config file");
    };

    let store = open_store(&url, &config).await?;

    match cli.command {
        Commands::Count => match store.length().await? {
            Some(count) => println!("{}", count),
            None => bail!("The database returned no count"),
        },
        Commands::Get { key } => match store.get(&key).await? {
            Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
            None => bail!("No live session '{}'", key),
        },
        Commands::Destroy { key } => {
            store.destroy(&key).await?;
            info!("Destroyed session '{}'", key);
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("Refusing to delete every session without --yes");
            }
            store.clear().await?;
        }
        Commands::Sweep { every: None } => {
            let removed = store.cleanup().await?;
            println!("{}", removed);
        }
        Commands::Sweep { every: Some(0) } => bail!("--every must be at least 1 second"),
        Commands::Sweep { every: Some(secs) } => {
            sweep_every(store.as_ref(), Duration::from_secs(secs)).await?;
        }
    }

    Ok(())
}
