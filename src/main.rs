use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shop_ledger::config::LedgerConfig;
use shop_ledger::database::Database;
use shop_ledger::{LedgerData, NewLedgerEntry, TamperEvidentLedger};

#[derive(Parser)]
#[command(name = "shop-ledger", version, about = "Tamper-evident audit ledger for shop ERP entities")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the ledger table for the configured backend
    Migrate,
    /// Append an entry to an entity chain
    Append(AppendArgs),
    /// Print the chronological history of an entity
    History(EntityArgs),
    /// Check an entity chain; exits with status 1 when it is broken
    Verify(EntityArgs),
    /// Print every problem found in an entity chain
    Report {
        #[command(flatten)]
        entity: EntityArgs,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct EntityArgs {
    #[arg(long)]
    entity_type: String,
    #[arg(long)]
    entity_id: String,
}

#[derive(Args)]
struct AppendArgs {
    #[arg(long)]
    tenant: String,
    #[command(flatten)]
    entity: EntityArgs,
    #[arg(long)]
    action: String,
    /// JSON object describing the change
    #[arg(long)]
    data: String,
    /// Hash of the current tip; looked up when omitted
    #[arg(long)]
    prev_hash: Option<String>,
    /// Refuse to append unless --prev-hash is still the tip
    #[arg(long, requires = "prev_hash")]
    checked: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = LedgerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded (backend: {:?})", config.backend);

    let database = Database::connect(&config).await?;
    let outcome = run(cli.command, &database).await;
    database.close().await;

    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}

/// Returns `false` when a verification command found a broken chain.
async fn run(command: Command, database: &Database) -> Result<bool> {
    let ledger = database.ledger();

    match command {
        Command::Migrate => {
            database.run_migrations().await?;
            println!("✓ Ledger schema is up to date");
        }
        Command::Append(args) => {
            let data = parse_data(&args.data)?;
            let entry = match args.prev_hash {
                Some(prev_hash) => {
                    let entry = NewLedgerEntry::new(
                        args.tenant,
                        args.entity.entity_type,
                        args.entity.entity_id,
                        args.action,
                        data,
                        prev_hash,
                    );
                    if args.checked {
                        ledger.append_checked(entry).await?
                    } else {
                        ledger.append(entry).await?
                    }
                }
                None => {
                    ledger
                        .record(
                            &args.tenant,
                            &args.entity.entity_type,
                            &args.entity.entity_id,
                            &args.action,
                            data,
                        )
                        .await?
                }
            };
            info!("Appended {}", entry.summary());
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Command::History(entity) => {
            let entries = ledger
                .get_history(&entity.entity_type, &entity.entity_id)
                .await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Verify(entity) => {
            let valid = ledger.verify(&entity.entity_type, &entity.entity_id).await?;
            if valid {
                println!("✓ {}/{} chain is intact", entity.entity_type, entity.entity_id);
            } else {
                println!("✗ {}/{} chain is broken", entity.entity_type, entity.entity_id);
            }
            return Ok(valid);
        }
        Command::Report { entity, json } => {
            let report = ledger
                .verify_detailed(&entity.entity_type, &entity.entity_id)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
                println!("{}", report.detailed_status());
            }
            return Ok(report.is_valid());
        }
    }

    Ok(true)
}

fn parse_data(raw: &str) -> Result<LedgerData> {
    let value: serde_json::Value = serde_json::from_str(raw).context("--data is not valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(anyhow!("--data must be a JSON object, got {}", other)),
    }
}
