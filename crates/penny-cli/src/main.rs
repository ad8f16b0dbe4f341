//! Penny CLI - local-first personal finance from the terminal
//!
//! Every command works offline; records sync to the configured remote
//! when one is reachable.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use penny_core::models::{Budget, Goal, Settlement, Transaction, Trip, TripExpense};
use penny_core::vault::{VaultHistoryEntry, VaultPayload};
use penny_core::{
    Collection, CollectionRegistry, Connectivity, DataService, DomainRecord, EncryptedVaultRecord,
    HttpRemoteStore, LibSqlStore, MemoryRemoteStore, QueueConfig, RemoteStore, SyncQueueEngine,
    TombstoneService,
};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "penny")]
#[command(about = "Track personal finances locally, sync opportunistically")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// User identity records belong to
    #[arg(long, env = "PENNY_USER", default_value = "local-user")]
    user: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a transaction
    Add {
        /// Amount in minor units (cents); negative for income
        amount: i64,
        /// Spending category
        category: String,
        /// Optional note
        #[arg(short, long, default_value = "")]
        note: String,
    },
    /// Create a budget
    Budget {
        name: String,
        /// Limit in minor units (cents)
        limit: i64,
    },
    /// Create a savings goal
    Goal {
        name: String,
        /// Target in minor units (cents)
        target: i64,
    },
    /// Create a trip for shared expenses
    Trip {
        name: String,
        #[arg(default_value = "USD")]
        currency: String,
    },
    /// Record an expense against a trip
    Expense {
        trip_id: String,
        /// Amount in minor units (cents)
        amount: i64,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Record a cross-party settlement
    Settle {
        payer: String,
        payee: String,
        /// Amount in minor units (cents)
        amount: i64,
    },
    /// List records of a collection
    List {
        collection: Collection,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a record (soft delete with a retention window by default)
    Delete {
        collection: Collection,
        id: String,
        /// Skip the tombstone and delete permanently
        #[arg(long)]
        hard: bool,
    },
    /// Restore a soft-deleted record
    Restore {
        collection: Collection,
        id: String,
    },
    /// Show soft-deleted records still within their retention window
    Deleted {
        collection: Collection,
    },
    /// Reconcile with the remote store and push pending operations
    Sync,
    /// Upload a full snapshot of every collection
    Backup,
    /// Show queue and connectivity status
    Status,
    /// Encrypted vault operations
    #[command(subcommand)]
    Vault(VaultCommands),
}

#[derive(Subcommand)]
enum VaultCommands {
    /// Create the vault
    Init {
        #[arg(long)]
        pin: String,
        #[arg(long)]
        question: String,
        #[arg(long)]
        answer: String,
        /// Opening balance in minor units (cents)
        #[arg(long, default_value = "0")]
        balance: i64,
    },
    /// Decrypt and show the vault balance and history
    Show {
        #[arg(long)]
        pin: String,
    },
    /// Move money into or out of the vault
    Deposit {
        #[arg(long)]
        pin: String,
        /// Amount in minor units (cents); negative to withdraw
        amount: i64,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Recover from a forgotten PIN using the secret answer
    ResetPin {
        #[arg(long)]
        answer: String,
        #[arg(long)]
        new_pin: String,
        /// Balance to seal under the new PIN; the old ciphertext cannot be
        /// opened without the old PIN
        #[arg(long, default_value = "0")]
        balance: i64,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] penny_core::Error),
    #[error(transparent)]
    Vault(#[from] penny_core::VaultError),
    #[error(transparent)]
    Remote(#[from] penny_core::RemoteError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("No vault exists yet. Run `penny vault init` first.")]
    NoVault,
    #[error(
        "Sync is not configured. Set PENNY_REMOTE_URL (and optionally PENNY_API_KEY) to enable `penny sync`."
    )]
    SyncNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("penny=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let app = App::build(cli.db_path, &cli.user).await?;

    match cli.command {
        Commands::Add { amount, category, note } => {
            let mut tx = Transaction::new(amount, category);
            tx.note = note;
            let saved = app.service.save(DomainRecord::Transaction(tx)).await?;
            println!("{}", saved.id());
        }
        Commands::Budget { name, limit } => {
            let saved = app
                .service
                .save(DomainRecord::Budget(Budget::new(name, limit)))
                .await?;
            println!("{}", saved.id());
        }
        Commands::Goal { name, target } => {
            let saved = app
                .service
                .save(DomainRecord::Goal(Goal::new(name, target)))
                .await?;
            println!("{}", saved.id());
        }
        Commands::Trip { name, currency } => {
            let saved = app
                .service
                .save(DomainRecord::Trip(Trip::new(name, currency)))
                .await?;
            println!("{}", saved.id());
        }
        Commands::Expense { trip_id, amount, description } => {
            if app.service.get(Collection::Trips, &trip_id).await?.is_none() {
                return Err(CliError::NotFound(trip_id));
            }
            let mut expense = TripExpense::new(trip_id, amount);
            expense.description = description;
            let saved = app.service.save(DomainRecord::TripExpense(expense)).await?;
            println!("{}", saved.id());
        }
        Commands::Settle { payer, payee, amount } => {
            let saved = app
                .service
                .save(DomainRecord::Settlement(Settlement::new(payer, payee, amount)))
                .await?;
            println!("{}", saved.id());
        }
        Commands::List { collection, json } => run_list(&app, collection, json).await?,
        Commands::Delete { collection, id, hard } => {
            if app.service.delete(collection, &id, !hard).await? {
                println!("Deleted {id}");
            } else {
                return Err(CliError::NotFound(id));
            }
        }
        Commands::Restore { collection, id } => {
            match app.tombstones.restore(collection, &id).await? {
                Some(record) => println!("Restored {}", record.id()),
                None => {
                    return Err(CliError::NotFound(format!(
                        "{id} (no restorable tombstone)"
                    )))
                }
            }
        }
        Commands::Deleted { collection } => {
            for tombstone in app.tombstones.deleted_items(collection).await? {
                println!(
                    "{}  deleted {}  recoverable until {}",
                    tombstone.id,
                    format_timestamp(tombstone.deleted_at),
                    format_timestamp(tombstone.permanent_delete_at),
                );
            }
        }
        Commands::Sync => run_sync(&app).await?,
        Commands::Backup => {
            if !app.remote_configured {
                return Err(CliError::SyncNotConfigured);
            }
            let uploaded = app.service.backup_all().await?;
            println!("Backed up {uploaded} documents");
        }
        Commands::Status => run_status(&app).await?,
        Commands::Vault(command) => run_vault(&app, &cli.user, command).await?,
    }

    Ok(())
}

async fn run_list(app: &App, collection: Collection, as_json: bool) -> Result<(), CliError> {
    let records = app.service.list(collection).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    for record in records {
        match record {
            DomainRecord::Transaction(tx) => println!(
                "{}  {}  {}  {}",
                tx.id,
                format_minor(tx.amount_minor),
                tx.category,
                tx.note
            ),
            DomainRecord::Budget(b) => {
                println!("{}  {}  {}/{}", b.id, b.name, format_minor(b.limit_minor), b.period);
            }
            DomainRecord::Goal(g) => println!(
                "{}  {}  {} of {}",
                g.id,
                g.name,
                format_minor(g.saved_minor),
                format_minor(g.target_minor)
            ),
            DomainRecord::Trip(t) => println!("{}  {}  {}", t.id, t.name, t.currency),
            DomainRecord::TripExpense(e) => println!(
                "{}  trip={}  {}  {}",
                e.id,
                e.trip_id,
                format_minor(e.amount_minor),
                e.description
            ),
            DomainRecord::Settlement(s) => println!(
                "{}  {} -> {}  {}",
                s.id,
                s.payer,
                s.payee,
                format_minor(s.amount_minor)
            ),
            DomainRecord::Vault(v) => println!("{}  (encrypted, v{})", v.id, v.sync_version),
            DomainRecord::Audit(a) => println!(
                "{}  {}  {}/{}",
                format_timestamp(a.at),
                a.action,
                a.collection,
                a.record_id
            ),
        }
    }
    Ok(())
}

async fn run_sync(app: &App) -> Result<(), CliError> {
    if !app.remote_configured {
        return Err(CliError::SyncNotConfigured);
    }

    let report = app.service.initial_sync().await?;
    let drained = app.queue.process_all_queues().await;

    println!(
        "Sync {}: adopted {}, kept local {}, requeued {}, tombstones merged {}",
        if report.full { "(full)" } else { "(incremental)" },
        report.adopted,
        report.kept_local,
        report.requeued,
        report.tombstones_merged,
    );
    println!(
        "Pushed {} operations ({} failed, {} rate limited, {} dropped)",
        drained.sent, drained.failed, drained.rate_limited, drained.dropped
    );
    Ok(())
}

async fn run_status(app: &App) -> Result<(), CliError> {
    println!(
        "Remote: {}",
        if app.remote_configured {
            "configured"
        } else {
            "not configured (local-only)"
        }
    );
    println!("Network: {:?}", app.connectivity.class());
    for (tier, pending) in app.queue.pending_counts().await {
        println!("  {} queue: {pending} pending", tier.label());
    }
    for collection in Collection::ALL {
        let count = app.service.list(collection).await.map_or(0, |r| r.len());
        println!("  {collection}: {count} records");
    }
    Ok(())
}

async fn run_vault(app: &App, user: &str, command: VaultCommands) -> Result<(), CliError> {
    match command {
        VaultCommands::Init { pin, question, answer, balance } => {
            if find_vault(app, user).await?.is_some() {
                eprintln!("Vault already exists; use `penny vault deposit` or `penny vault reset-pin`");
                return Ok(());
            }
            let payload = VaultPayload {
                balance_minor: balance,
                history: Vec::new(),
            };
            let record = EncryptedVaultRecord::create(user, &pin, question, &answer, &payload)?;
            let saved = app.service.save(DomainRecord::Vault(record)).await?;
            println!("{}", saved.id());
        }
        VaultCommands::Show { pin } => {
            let record = find_vault(app, user).await?.ok_or(CliError::NoVault)?;
            let payload = record.open(&pin)?;
            println!("Balance: {}", format_minor(payload.balance_minor));
            for entry in payload.history {
                println!(
                    "  {}  {}  {}",
                    format_timestamp(entry.occurred_at),
                    format_minor(entry.amount_minor),
                    entry.description
                );
            }
        }
        VaultCommands::Deposit { pin, amount, description } => {
            let mut record = find_vault(app, user).await?.ok_or(CliError::NoVault)?;
            let mut payload = record.open(&pin)?;
            payload.balance_minor += amount;
            payload.history.push(VaultHistoryEntry {
                id: penny_core::models::new_record_id(),
                amount_minor: amount,
                description,
                occurred_at: chrono::Utc::now().timestamp_millis(),
            });
            record.update_payload(&pin, &payload)?;
            app.service.save(DomainRecord::Vault(record)).await?;
            println!("Balance: {}", format_minor(payload.balance_minor));
        }
        VaultCommands::ResetPin { answer, new_pin, balance } => {
            let mut record = find_vault(app, user).await?.ok_or(CliError::NoVault)?;
            let payload = VaultPayload {
                balance_minor: balance,
                history: Vec::new(),
            };
            record.reset_pin(&answer, &new_pin, &payload)?;
            app.service.save(DomainRecord::Vault(record)).await?;
            println!("PIN reset");
        }
    }
    Ok(())
}

async fn find_vault(app: &App, user: &str) -> Result<Option<EncryptedVaultRecord>, CliError> {
    for record in app.service.list(Collection::Vault).await? {
        if let DomainRecord::Vault(vault) = record {
            if vault.user_id == user {
                return Ok(Some(vault));
            }
        }
    }
    Ok(None)
}

/// Composition root: one place wires the stores, queue, tombstones and
/// data service together.
struct App {
    service: DataService,
    queue: SyncQueueEngine,
    tombstones: TombstoneService,
    connectivity: Connectivity,
    remote_configured: bool,
}

impl App {
    async fn build(db_path: Option<PathBuf>, user: &str) -> Result<Self, CliError> {
        let db_path = resolve_db_path(db_path);
        let local = Arc::new(LibSqlStore::open(&db_path).await?);
        let registry = Arc::new(CollectionRegistry::with_defaults());

        let (remote, connectivity, remote_configured): (Arc<dyn RemoteStore>, _, _) =
            match remote_endpoint() {
                Some(endpoint) => {
                    let api_key = env::var("PENNY_API_KEY").ok();
                    (
                        Arc::new(HttpRemoteStore::new(&endpoint, api_key)?),
                        Connectivity::online(),
                        true,
                    )
                }
                None => (
                    Arc::new(MemoryRemoteStore::new()),
                    Connectivity::offline(),
                    false,
                ),
            };

        let queue = SyncQueueEngine::new(
            local.clone(),
            remote.clone(),
            registry.clone(),
            connectivity.clone(),
            QueueConfig::default(),
        );
        let tombstones = TombstoneService::new(
            local.clone(),
            queue.clone(),
            registry.clone(),
            device_id(),
        );
        let service = DataService::new(
            local,
            remote,
            queue.clone(),
            tombstones.clone(),
            registry,
            connectivity.clone(),
            user,
        );

        // Expired tombstones are swept once on every start
        if let Err(e) = tombstones.run_cleanup().await {
            tracing::warn!("Tombstone cleanup on startup failed: {e}");
        }

        Ok(Self {
            service,
            queue,
            tombstones,
            connectivity,
            remote_configured,
        })
    }
}

fn remote_endpoint() -> Option<String> {
    env::var("PENNY_REMOTE_URL").ok().filter(|url| !url.is_empty())
}

fn device_id() -> String {
    env::var("PENNY_DEVICE")
        .ok()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "cli".to_string())
}

fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = env::var("PENNY_DB_PATH") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("penny")
        .join("penny.db")
}

fn format_minor(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_minor() {
        assert_eq!(format_minor(1250), "12.50");
        assert_eq!(format_minor(-5), "-0.05");
        assert_eq!(format_minor(0), "0.00");
    }

    #[test]
    fn test_resolve_db_path_prefers_flag() {
        let path = resolve_db_path(Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(path, PathBuf::from("/tmp/x.db"));
    }
}
