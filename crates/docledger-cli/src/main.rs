//! Admin CLI for a docledger database. Every command opens the database
//! directly, applies pending migrations, and prints a single JSON document
//! to stdout.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use time::OffsetDateTime;

use docledger_core::codec::EventCodec;
use docledger_core::domain::{ApiKey, Record};
use docledger_core::event::MutationMetadata;
use docledger_core::ports::ApiKeyRepository;
use docledger_core::replay::replay_tenant_events;
use docledger_core::{hash_token, AuditService, Error, RecordService, SchemaService};
use docledger_store_sqlite::{
    migrations, Db, SqliteApiKeyRepository, SqliteAuditTrailRepository,
    SqliteCollectionSchemaRepository, SqliteRecordEventStore,
};

#[derive(Debug, Parser)]
#[command(name = "docledger")]
#[command(about = "Admin tooling for a docledger database")]
struct Cli {
    /// SQLite database file path.
    #[arg(long, global = true, default_value = "./docledger.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending schema migrations.
    Migrate,

    /// Manage API keys. Only token hashes are ever written to the database.
    ApiKey {
        #[command(subcommand)]
        command: ApiKeyCommand,
    },

    /// Write or delete a record, emitting its audit and outbox events.
    Record {
        #[command(subcommand)]
        command: RecordCommand,
    },

    /// Outbox queue inspection.
    Outbox {
        #[command(subcommand)]
        command: OutboxCommand,
    },

    /// Replay one tenant's audit stream, oldest first, as JSON lines.
    Replay {
        #[arg(long)]
        tenant: String,
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },
}

#[derive(Debug, Subcommand)]
enum ApiKeyCommand {
    /// Install (or reactivate) an API key for a tenant.
    Add {
        #[arg(long)]
        token: String,
        #[arg(long)]
        tenant: String,
        #[arg(long, default_value = "admin")]
        name: String,
    },
    /// Deactivate an existing API key.
    Deactivate {
        #[arg(long)]
        token: String,
    },
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    Put {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        collection: String,
        #[arg(long)]
        id: String,
        /// Record body as a JSON document.
        #[arg(long)]
        data: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    Delete {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        collection: String,
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
}

#[derive(Debug, Subcommand)]
enum OutboxCommand {
    /// Row counts per delivery status.
    Stats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let db = Arc::new(Db::open(&cli.db).context("open database")?);
    migrations::run(&db).context("run migrations")?;

    match cli.command {
        Command::Migrate => {
            // `run` above already applied anything pending.
            println!("{}", json!({"migrated": true}));
        }
        Command::ApiKey { command } => api_key(&db, command)?,
        Command::Record { command } => record(&db, command)?,
        Command::Outbox { command: OutboxCommand::Stats } => outbox_stats(&db)?,
        Command::Replay { tenant, batch_size } => replay(&db, &tenant, batch_size)?,
    }

    Ok(())
}

fn api_key(db: &Arc<Db>, command: ApiKeyCommand) -> anyhow::Result<()> {
    let repo = SqliteApiKeyRepository::new(db.clone());

    match command {
        ApiKeyCommand::Add { token, tenant, name } => {
            let token_hash = hash_token(token.trim());
            repo.upsert(ApiKey {
                token_hash: token_hash.clone(),
                tenant_id: tenant.clone(),
                name: name.clone(),
                active: true,
                created_at: OffsetDateTime::now_utc(),
            })
            .context("store api key")?;
            println!(
                "{}",
                json!({"tenant_id": tenant, "name": name, "token_hash": token_hash, "active": true})
            );
        }
        ApiKeyCommand::Deactivate { token } => {
            let token_hash = hash_token(token.trim());
            let mut key = repo
                .find_by_token_hash(&token_hash)
                .context("look up api key")?;
            key.active = false;
            repo.upsert(key.clone()).context("store api key")?;
            println!(
                "{}",
                json!({"tenant_id": key.tenant_id, "name": key.name, "active": false})
            );
        }
    }
    Ok(())
}

fn record(db: &Arc<Db>, command: RecordCommand) -> anyhow::Result<()> {
    let schemas = Arc::new(SchemaService::new(Arc::new(
        SqliteCollectionSchemaRepository::new(db.clone()),
    )));
    let records = RecordService::new(Arc::new(SqliteRecordEventStore::new(db.clone())))
        .with_schema_service(schemas);

    match command {
        RecordCommand::Put { tenant, collection, id, data, actor } => {
            let data: serde_json::Value =
                serde_json::from_str(&data).context("parse --data as JSON")?;
            let meta = MutationMetadata {
                actor,
                source: "cli".to_string(),
                ..MutationMetadata::default()
            };
            let stored = records
                .upsert(Record::new(tenant, collection, id, data), meta)
                .context("upsert record")?;
            println!(
                "{}",
                json!({"id": stored.id, "collection": stored.collection, "data": stored.data})
            );
        }
        RecordCommand::Delete { tenant, collection, id, actor } => {
            let meta = MutationMetadata {
                actor,
                source: "cli".to_string(),
                ..MutationMetadata::default()
            };
            let deleted = records
                .delete(&tenant, &collection, &id, meta)
                .context("delete record")?;
            println!("{}", json!({"deleted": deleted}));
        }
    }
    Ok(())
}

fn outbox_stats(db: &Arc<Db>) -> anyhow::Result<()> {
    let counts = db.with_read(|conn| {
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM outbox_events GROUP BY status")
            .map_err(|err| Error::FatalStore(err.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|err| Error::FatalStore(err.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| Error::FatalStore(err.to_string()))?;
        Ok(rows)
    })?;

    let mut pending = 0_i64;
    let mut dispatched = 0_i64;
    let mut dead = 0_i64;
    for (status, count) in counts {
        match status.as_str() {
            "pending" => pending = count,
            "dispatched" => dispatched = count,
            "dead" => dead = count,
            _ => {}
        }
    }
    println!(
        "{}",
        json!({
            "pending": pending,
            "dispatched": dispatched,
            "dead": dead,
            "total": pending + dispatched + dead,
        })
    );
    Ok(())
}

fn replay(db: &Arc<Db>, tenant: &str, batch_size: usize) -> anyhow::Result<()> {
    let audit = AuditService::new(Arc::new(SqliteAuditTrailRepository::new(db.clone())));
    let codec = EventCodec::default();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    replay_tenant_events(&audit, &codec, tenant, batch_size, |event| {
        let line = json!({"audit_id": event.audit_id, "envelope": event.envelope});
        writeln!(out, "{line}").map_err(|err| Error::FatalStore(err.to_string()))
    })
    .context("replay tenant events")?;

    Ok(())
}
