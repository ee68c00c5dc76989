use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use worklog_sync::{
    load_csv, AdminAction, AllocationService, NoopInvalidator, Period, RecordStore, Scope,
    SqliteStore, SyncConfig, SyncOutcome, SyncService, TrackerStore, VERSION,
};

#[derive(Parser)]
#[command(name = "worklog-sync", version = VERSION, about = "Reconcile user and admin copies of monthly time records")]
struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, env = "WORKLOG_SYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Local,
    Remote,
}

#[derive(Subcommand)]
enum Command {
    /// Replace one side's document with the rows of a CSV file
    Import {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        period: Period,
        #[arg(long, value_enum)]
        side: SideArg,
        #[arg(long)]
        csv: PathBuf,
    },
    /// User login: refresh the local copy from the admin copy
    Login {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        period: Period,
    },
    /// Admin load: refresh the admin copy from the local copy
    AdminLoad {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        period: Period,
    },
    /// Admin deletes a record (tombstone, purged by the merge)
    AdminDelete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        period: Period,
        #[arg(long)]
        id: String,
    },
    /// Queue a time-off request in the yearly tracker
    Request {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value = "CO")]
        kind: String,
    },
    /// Rebuild the yearly tracker from the twelve admin documents
    SyncTracker {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        year: i32,
    },
    /// Set the remaining allocation for an owner
    SetBalance {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        days: i64,
    },
    /// Print one side's document
    Show {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        period: Period,
        #[arg(long, value_enum, default_value = "local")]
        side: SideArg,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("worklog_sync=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };

    let local = Arc::new(SqliteStore::open(&config.local_db, "local")?);
    let remote = Arc::new(SqliteStore::open(&config.remote_db, "remote")?);
    let service = SyncService::new(
        local.clone(),
        remote.clone(),
        remote.clone(),
        remote.clone(),
        Arc::new(NoopInvalidator),
        &config,
    );

    let store_for = |side: SideArg| -> Arc<SqliteStore> {
        match side {
            SideArg::Local => local.clone(),
            SideArg::Remote => remote.clone(),
        }
    };

    match cli.command {
        Command::Import {
            owner,
            period,
            side,
            csv,
        } => {
            let scope = Scope::new(owner.as_str(), period)?;
            let records = load_csv(&csv, &owner)?;
            worklog_sync::record::validate_document(&scope, &records)
                .with_context(|| format!("CSV rows do not fit {}", scope))?;
            store_for(side).write(&scope, &records)?;
            println!("📂 Imported {} records into {}", records.len(), scope);
        }
        Command::Login { owner, period } => {
            let scope = Scope::new(owner, period)?;
            print_outcome(&scope, service.user_login(&scope)?);
        }
        Command::AdminLoad { owner, period } => {
            let scope = Scope::new(owner, period)?;
            print_outcome(&scope, service.admin_load(&scope)?);
        }
        Command::AdminDelete { owner, period, id } => {
            let scope = Scope::new(owner, period)?;
            print_outcome(&scope, service.admin_save(&scope, vec![AdminAction::Delete(id)])?);
        }
        Command::Request { owner, date, kind } => {
            if service.request_leave(&owner, date, &kind)? {
                println!("📝 Requested {} on {} for {}", kind, date, owner);
            } else {
                println!("✓ {} already approved for {}", date, owner);
            }
        }
        Command::SyncTracker { owner, year } => {
            let report = service.sync_tracker(&owner, year)?;
            println!("📅 {}", report.summary());
            for (month, reason) in &report.failed_months {
                println!("⚠️  month {:02} not read: {}", month, reason);
            }
            if let (Some(before), Some(after)) = (report.balance_before, report.balance_after) {
                println!("🏖️  balance {} -> {}", before, after);
            }
            if let Some(tracker) = remote.read_tracker(&owner, year)? {
                for entry in tracker.entries.values() {
                    println!("  {}  {:<4} {:<9} {}", entry.date, entry.kind, entry.state.as_str(), entry.note);
                }
            }
        }
        Command::SetBalance { owner, days } => {
            remote.set_balance(&owner, days)?;
            println!("🏖️  {} now has {} days", owner, days);
        }
        Command::Show { owner, period, side } => {
            let scope = Scope::new(owner, period)?;
            match store_for(side).read(&scope)? {
                None => println!("(no document for {})", scope),
                Some(records) => {
                    println!("{} ({} records)", scope, records.len());
                    for record in records {
                        let status = record.status.map_or("-", |s| s.as_str());
                        println!("  {}  {:<4} {:<13} {}", record.date(), record.kind(), status, record.id);
                        if let Some(contested) = &record.contested {
                            println!("      user wants: {} {}", contested.kind, serde_json::to_string(&contested.fields)?);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_outcome(scope: &Scope, outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::NoChange => println!("✓ {}: nothing to merge", scope),
        SyncOutcome::Bootstrapped { promoted } => {
            println!("🌱 {}: admin copy created with {} records", scope, promoted)
        }
        SyncOutcome::Merged(report) => {
            println!("🔄 {}: {}", scope, report.summary());
            for id in &report.conflicts {
                println!("⚠️  {} needs admin review", id);
            }
        }
    }
}
