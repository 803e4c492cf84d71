//! illust-pool CLI: operator interface to the illustration rotation pool.

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use illust_pool::config::Config;
use illust_pool::config::secrets::ExposeSecret;
use illust_pool::db::Db;
use illust_pool::model::{Record, WorkId, cooldown_expiry};
use illust_pool::telemetry::{TelemetryConfig, init_telemetry};
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "illust-pool", about = "Rotation pool of illustration sources")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Show total and currently eligible record counts
    Count {
        /// Cooldown in days (defaults to ROTATION_COOLDOWN_DAYS)
        #[arg(long)]
        cooldown_days: Option<i64>,
    },
    /// Run one rotation round: pick an eligible record and mark it posted
    Pick {
        /// Cooldown in days (defaults to ROTATION_COOLDOWN_DAYS)
        #[arg(long)]
        cooldown_days: Option<i64>,
        /// Report the eligible count without selecting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Upsert records from a JSON array (file, or stdin when omitted)
    Ingest {
        /// JSON file of records or bare work ids
        file: Option<PathBuf>,
    },
    /// Show one record
    Show {
        /// Work id
        work_id: WorkId,
    },
}

/// An ingestion entry: a full record or just a work id.
#[derive(Deserialize)]
#[serde(untagged)]
enum IngestEntry {
    Id(WorkId),
    Record(Record),
}

impl From<IngestEntry> for Record {
    fn from(entry: IngestEntry) -> Self {
        match entry {
            IngestEntry::Id(id) => Record::never_posted(id.0),
            IngestEntry::Record(record) => record,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "illust-pool".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect_with(config.database_url.expose_secret(), config.max_connections).await?;
    db.health_check().await?;

    let result: anyhow::Result<()> = match cli.command {
        Command::Migrate => db.migrate().await.map_err(Into::into),
        Command::Count { cooldown_days } => {
            let cooldown = resolve_cooldown(&config, cooldown_days)?;
            cmd_count(&db, cooldown).await
        }
        Command::Pick {
            cooldown_days,
            dry_run,
        } => {
            let cooldown = resolve_cooldown(&config, cooldown_days)?;
            cmd_pick(&db, cooldown, dry_run).await
        }
        Command::Ingest { file } => cmd_ingest(&db, file).await,
        Command::Show { work_id } => cmd_show(&db, work_id).await,
    };

    db.close().await;
    result
}

fn resolve_cooldown(config: &Config, cooldown_days: Option<i64>) -> anyhow::Result<Duration> {
    match cooldown_days {
        Some(days) if days >= 0 => Duration::try_days(days)
            .ok_or_else(|| anyhow::anyhow!("cooldown of {days} days is out of range")),
        Some(days) => anyhow::bail!("cooldown must be non-negative, got {days}"),
        None => Ok(config.cooldown),
    }
}

async fn cmd_count(db: &Db, cooldown: Duration) -> anyhow::Result<()> {
    let expiry = cooldown_expiry(Utc::now(), cooldown);
    let total = db.count_records().await?;
    let eligible = db.count_eligible(expiry).await?;

    println!("Total:      {total}");
    println!("Eligible:   {eligible}");
    println!("Expiry:     {}", expiry.format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}

async fn cmd_pick(db: &Db, cooldown: Duration, dry_run: bool) -> anyhow::Result<()> {
    let expiry = cooldown_expiry(Utc::now(), cooldown);

    if dry_run {
        let eligible = db.count_eligible(expiry).await?;
        println!("{eligible} eligible record(s); nothing selected (dry run)");
        return Ok(());
    }

    match db.select_and_mark_one(expiry).await? {
        Some(record) => {
            println!("{}", record.work_id);
            if let Some(previous) = record.last_posted {
                eprintln!(
                    "previously posted {}",
                    previous.format("%Y-%m-%d %H:%M")
                );
            }
        }
        None => eprintln!("no eligible record"),
    }
    Ok(())
}

async fn cmd_ingest(db: &Db, file: Option<PathBuf>) -> anyhow::Result<()> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let entries: Vec<IngestEntry> = serde_json::from_str(&raw)?;
    let records: Vec<Record> = entries.into_iter().map(Record::from).collect();

    let written = db.upsert_records(&records).await?;
    println!("Upserted {written} record(s).");
    Ok(())
}

async fn cmd_show(db: &Db, work_id: WorkId) -> anyhow::Result<()> {
    let Some(record) = db.get_record(work_id).await? else {
        anyhow::bail!("no record with work id {work_id}");
    };

    println!("Work ID:    {}", record.work_id);
    match record.last_posted {
        Some(at) => println!("Posted:     {}", at.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Posted:     never"),
    }
    if record.work_id.is_sentinel() {
        println!("(sentinel id, never selected)");
    }
    Ok(())
}
