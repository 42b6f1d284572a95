//! Tabula Admin - administrative command line interface
//!
//! Primes a deployment, checks its state, inspects tables and clears rows
//! through the embedded cluster.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tabula_common::{Config, TableName};
use tabula_store::prime::INITIAL_TABLES;
use tabula_store::session::{RangeSelect, Statement};
use tabula_store::{Datastore, ScanBound, ScanRequest, ScanResults};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status reported when the stored data layout is not the expected one
const INVALID_DATA_LAYOUT: i32 = 64;

#[derive(Parser, Debug)]
#[command(name = "tabula-admin")]
#[command(about = "Tabula Admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "/etc/tabula/tabula.toml")]
    config: String,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Data directory of the embedded cluster
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Cluster hosts, comma separated
    #[arg(long, value_delimiter = ',')]
    hosts: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the keyspace and initial tables
    Prime {
        /// Replication factor of the keyspace
        #[arg(long, default_value_t = 1)]
        replication: u32,
    },
    /// Exit with status 1 unless the deployment is primed
    Check,
    /// Exit with status 64 unless the stored data layout version is current
    DataLayout,
    /// Table operations
    Table {
        #[command(subcommand)]
        action: TableCommands,
    },
    /// Print the first rows of a table in token order, as JSON
    View {
        /// Table name
        table: String,

        /// Columns to fetch, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,

        /// Maximum number of rows
        #[arg(long, default_value_t = 100)]
        limit: usize,

        /// Print keys only
        #[arg(long)]
        keys_only: bool,
    },
    /// Delete rows in token order, one page at a time
    DeleteAll {
        /// Table to clear; every initial table when omitted
        #[arg(long)]
        table: Option<String>,

        /// Only delete rows whose key starts with this prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Cells fetched per page
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },
}

#[derive(Subcommand, Debug)]
enum TableCommands {
    /// Create a table (no-op if it exists)
    Create {
        /// Table name
        name: String,
    },
    /// Drop a table (no-op if absent)
    Drop {
        /// Table name
        name: String,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(Path::new(&args.config))
        .with_context(|| format!("Failed to load config file {}", args.config))?;

    // CLI takes precedence over the config file
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(data_dir) = &args.data_dir {
        config.local.data_dir.clone_from(data_dir);
    }
    if !args.hosts.is_empty() {
        config.cluster.hosts.clone_from(&args.hosts);
    }
    Ok(config)
}

fn render(results: ScanResults) -> serde_json::Value {
    match results {
        ScanResults::Keys(keys) => keys.iter().map(hex::encode).collect(),
        ScanResults::Entities(entities) => entities
            .into_iter()
            .map(|entity| {
                let (key, row) = entity.into_parts();
                let columns: serde_json::Map<String, serde_json::Value> = row
                    .iter()
                    .map(|(column, value)| (column.to_string(), hex::encode(value).into()))
                    .collect();
                serde_json::json!({ "key": hex::encode(&key), "columns": columns })
            })
            .collect(),
    }
}

/// Delete the rows of `table` whose key starts with `prefix`
///
/// Pages through the table with an exclusive start at the last key seen, so
/// a row whose cells straddle a page boundary is deleted once. Returns the
/// number of rows deleted.
async fn delete_all(
    store: &Datastore,
    table: &str,
    prefix: &[u8],
    batch_size: usize,
) -> Result<usize> {
    anyhow::ensure!(batch_size > 0, "Batch size must be positive");
    let name = TableName::new(table)?;
    let mut start = ScanBound::MIN;
    let mut start_inclusive = true;
    let mut deleted = 0;

    loop {
        let statement = Statement::SelectRange(RangeSelect {
            table: name.clone(),
            columns: None,
            start: start.clone(),
            end: ScanBound::MAX,
            start_inclusive,
            end_inclusive: true,
            limit: Some(batch_size),
        });
        let cells = store.connection().execute("delete_all", &statement).await?;
        let Some(last) = cells.last() else {
            break;
        };
        start = ScanBound::Key(last.key.clone());
        start_inclusive = false;

        let mut keys = Vec::new();
        for cell in cells {
            if cell.key.starts_with(prefix) && keys.last() != Some(&cell.key) {
                keys.push(cell.key);
            }
        }
        if !keys.is_empty() {
            store.delete(table, &keys, None).await?;
            deleted += keys.len();
        }
    }
    info!("Deleted {} rows from {}", deleted, table);
    Ok(deleted)
}

fn is_table_missing(err: &anyhow::Error) -> bool {
    err.downcast_ref::<tabula_common::Error>()
        .is_some_and(tabula_common::Error::is_table_missing)
}

async fn run(store: &Datastore, command: Commands) -> Result<i32> {
    match command {
        Commands::Prime { replication } => {
            store.prime(replication).await?;
            println!("Keyspace {} primed", store.keyspace());
        }
        Commands::Check => {
            if !store.is_primed().await? {
                error!("Keyspace {} is not primed", store.keyspace());
                return Ok(1);
            }
            println!("Keyspace {} is primed", store.keyspace());
        }
        Commands::DataLayout => {
            if !store.is_valid_version().await? {
                error!("Data layout version is not the expected one");
                return Ok(INVALID_DATA_LAYOUT);
            }
            println!("Data layout version is current");
        }
        Commands::Table { action } => match action {
            TableCommands::Create { name } => {
                store.create_table(&name).await?;
                println!("Table {name} created");
            }
            TableCommands::Drop { name } => {
                store.delete_table(&name).await?;
                println!("Table {name} dropped");
            }
        },
        Commands::View {
            table,
            columns,
            limit,
            keys_only,
        } => {
            let request = ScanRequest::new(table, columns)
                .limit(limit)
                .keys_only(keys_only);
            let results = store.scan(&request).await?;
            println!("{}", serde_json::to_string_pretty(&render(results))?);
        }
        Commands::DeleteAll {
            table,
            prefix,
            batch_size,
        } => {
            let walk_all = table.is_none();
            let tables = match table {
                Some(table) => vec![table],
                None => INITIAL_TABLES.iter().map(ToString::to_string).collect(),
            };
            for table in tables {
                match delete_all(store, &table, prefix.as_bytes(), batch_size).await {
                    Ok(deleted) => println!("Deleted {deleted} rows from {table}"),
                    // an unprimed deployment lacks some initial tables
                    Err(e) if walk_all && is_table_missing(&e) => {
                        info!("Skipping missing table {}", table);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Config file: {}", args.config);
    info!("Data directory: {}", config.local.data_dir.display());

    let store = Datastore::open_local(&config)
        .await
        .context("Failed to connect to the cluster")?;
    let outcome = run(&store, args.command).await;
    store.close().await?;

    let code = outcome?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
