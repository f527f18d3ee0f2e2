//! CLI entry point for mockcodes-admin: quota and profile maintenance.

use clap::{Parser, Subcommand};
use mockcodes::metadata::sqlite::SqliteRecordStore;
use mockcodes::metadata::store::RecordStore;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mockcodes-admin", about = "MockCodes quota and profile tool")]
struct Cli {
    /// YAML configuration naming the SQLite database.
    #[arg(long, global = true, default_value = "mockcodes.example.yaml")]
    config: PathBuf,

    /// Database path; overrides the configuration file.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new quota period: set every profile's usage to zero
    ResetQuotas,
    /// Print a profile as JSON
    ShowProfile {
        #[arg(long)]
        user: String,
    },
    /// Change a profile's monthly generation limit
    SetQuota {
        #[arg(long)]
        user: String,
        #[arg(long)]
        limit: u32,
    },
}

fn resolve_db_path(cli: &Cli) -> anyhow::Result<String> {
    if let Some(db) = &cli.db {
        return Ok(db.clone());
    }
    let config = mockcodes::config::load_config(&cli.config)?;
    Ok(config.metadata.sqlite.path)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let rc = match run(&cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(rc);
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let db_path = resolve_db_path(cli)?;
    let store = SqliteRecordStore::new(&db_path)?;

    match &cli.command {
        Commands::ResetQuotas => {
            let reset = store.reset_quotas().await?;
            eprintln!("Reset quota usage for {reset} profile(s)");
        }
        Commands::ShowProfile { user } => {
            let profile = store
                .get_profile(user)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no profile for user {user}"))?;
            let mut value = serde_json::to_value(&profile)?;
            value["quota_remaining"] = profile.quota_remaining().into();
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::SetQuota { user, limit } => {
            if !store.set_quota_limit(user, *limit).await? {
                anyhow::bail!("no profile for user {user}");
            }
            eprintln!("Set quota limit for {user} to {limit}");
        }
    }
    Ok(())
}
