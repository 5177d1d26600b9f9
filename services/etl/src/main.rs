//! ETL CLI - refreshes the work order star schema from the wide workbook
//!
//! Subcommands:
//! - `refresh`: clear, transform, resolve dimensions and load facts
//! - `transform`: only write the long-format mirror files

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use etl::{run_refresh, transform, EtlConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warehouse::{MemoryWarehouse, PgWarehouse, RefreshGate, Warehouse};

#[derive(Parser, Debug)]
#[command(name = "etl", about = "Loads the wide work order sheet into the star schema")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clear the store and reload it from the wide source
    Refresh {
        #[command(flatten)]
        paths: PathArgs,

        /// Load into an in-memory store instead of Postgres
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },
    /// Convert the wide source and write the long-format files only
    Transform {
        #[command(flatten)]
        paths: PathArgs,
    },
}

#[derive(Args, Debug)]
struct PathArgs {
    /// Wide source workbook or CSV (overrides WIDE_FILE_PATH)
    #[arg(long)]
    source: Option<PathBuf>,

    /// Long-format CSV output (overrides LONG_CSV_PATH)
    #[arg(long)]
    csv_out: Option<PathBuf>,

    /// Long-format JSON output (overrides LONG_JSON_PATH)
    #[arg(long)]
    json_out: Option<PathBuf>,
}

impl PathArgs {
    fn apply(self, config: &mut EtlConfig) {
        if let Some(source) = self.source {
            config.wide_file_path = source;
        }
        if let Some(csv) = self.csv_out {
            config.export.csv = Some(csv);
        }
        if let Some(json) = self.json_out {
            config.export.json = Some(json);
        }
    }
}

async fn refresh_with<W: Warehouse + ?Sized>(warehouse: Arc<W>, config: &EtlConfig) -> Result<()> {
    let gate = RefreshGate::new(warehouse);
    let summary = run_refresh(&gate, config).await.context("Refresh failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("etl=info,warehouse=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = EtlConfig::from_env().context("Invalid ETL configuration")?;

    match cli.command {
        Command::Transform { paths } => {
            paths.apply(&mut config);
            info!(source = %config.wide_file_path.display(), "transform only");
            let (records, stats) = tokio::task::spawn_blocking(move || transform(&config))
                .await
                .context("Transform task panicked")??;
            println!("Converted {} long records ({} zeroed measures)", records.len(), stats.zeroed_measures);
        }
        Command::Refresh { paths, dry_run } => {
            paths.apply(&mut config);
            info!(
                source = %config.wide_file_path.display(),
                mode = if dry_run { "dry-run" } else { "live" },
                "starting refresh"
            );

            if dry_run {
                refresh_with(Arc::new(MemoryWarehouse::new()), &config).await?;
            } else {
                let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
                let warehouse = PgWarehouse::connect(&db_url, 5)
                    .await
                    .context("Failed to connect to database")?;
                warehouse.ensure_schema().await.context("Failed to create schema")?;
                refresh_with(Arc::new(warehouse), &config).await?;
            }
        }
    }

    Ok(())
}
