//! docledger HTTP server: wires the SQLite store, core services, outbox
//! dispatcher, and axum router together.

mod http;
mod webhook;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use docledger_core::domain::ApiKey;
use docledger_core::ports::{ApiKeyRepository, EventPublisher};
use docledger_core::{
    hash_token, AuditService, AuthService, IdempotentResponseCache, KvService, LogPublisher,
    OutboxDispatcher, RecordService, SchemaService,
};
use docledger_store_sqlite::{
    migrations, Db, SqliteApiKeyRepository, SqliteAuditTrailRepository,
    SqliteCollectionSchemaRepository, SqliteKvRepository, SqliteOutboxRepository,
    SqliteRecordEventStore,
};

use http::{AppState, HttpMetrics};
use webhook::WebhookPublisher;

#[derive(Debug, Parser)]
#[command(name = "docledger-server")]
#[command(about = "Multi-tenant JSON document service with an event-atomic write path")]
struct Args {
    /// HTTP listen address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// SQLite database file path.
    #[arg(long, default_value = "./docledger.sqlite3")]
    db_path: PathBuf,

    /// Optional API key to install at startup (only its hash is stored).
    #[arg(long, env = "DOCLEDGER_BOOTSTRAP_API_KEY")]
    bootstrap_api_key: Option<String>,

    /// Tenant for the bootstrap API key.
    #[arg(long, default_value = "default", env = "DOCLEDGER_BOOTSTRAP_TENANT")]
    bootstrap_tenant: String,

    /// Name for the bootstrap API key.
    #[arg(long, default_value = "bootstrap", env = "DOCLEDGER_BOOTSTRAP_KEY_NAME")]
    bootstrap_key_name: String,

    /// Outbox webhook target URL; falls back to the log publisher when unset.
    #[arg(long, env = "DOCLEDGER_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// HMAC-SHA256 signing secret for outbound webhook requests.
    #[arg(long, default_value = "", env = "DOCLEDGER_WEBHOOK_SECRET")]
    webhook_secret: String,

    /// Webhook request timeout in seconds.
    #[arg(long, default_value_t = 10, env = "DOCLEDGER_WEBHOOK_TIMEOUT_SECS")]
    webhook_timeout_secs: u64,

    /// Outbox dispatcher polling interval in seconds.
    #[arg(long, default_value_t = 2)]
    dispatch_interval_secs: u64,

    /// Maximum outbox events handled per dispatcher tick.
    #[arg(long, default_value_t = 50)]
    dispatch_batch_size: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db = Arc::new(Db::open(&args.db_path).context("open database")?);
    migrations::run(&db).context("run migrations")?;

    let api_keys = Arc::new(SqliteApiKeyRepository::new(db.clone()));
    let kv = Arc::new(KvService::new(Arc::new(SqliteKvRepository::new(db.clone()))));
    let schemas = Arc::new(SchemaService::new(Arc::new(
        SqliteCollectionSchemaRepository::new(db.clone()),
    )));
    let records = Arc::new(
        RecordService::new(Arc::new(SqliteRecordEventStore::new(db.clone())))
            .with_schema_service(schemas.clone()),
    );
    let audit = Arc::new(AuditService::new(Arc::new(SqliteAuditTrailRepository::new(
        db.clone(),
    ))));
    let auth = Arc::new(AuthService::new(api_keys.clone()));
    let idempotency = Arc::new(IdempotentResponseCache::new(kv.clone()));

    if let Some(token) = args.bootstrap_api_key.as_deref().map(str::trim).filter(|t| !t.is_empty())
    {
        api_keys
            .upsert(ApiKey {
                token_hash: hash_token(token),
                tenant_id: args.bootstrap_tenant.clone(),
                name: args.bootstrap_key_name.clone(),
                active: true,
                created_at: OffsetDateTime::now_utc(),
            })
            .context("bootstrap api key")?;
        tracing::info!(
            tenant_id = %args.bootstrap_tenant,
            name = %args.bootstrap_key_name,
            "bootstrap api key installed"
        );
    }

    let publisher: Arc<dyn EventPublisher> =
        match args.webhook_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => {
                tracing::info!(url, "webhook publisher enabled");
                Arc::new(
                    WebhookPublisher::new(
                        url,
                        &args.webhook_secret,
                        Duration::from_secs(args.webhook_timeout_secs),
                    )
                    .context("build webhook publisher")?,
                )
            }
            None => {
                tracing::info!("no webhook configured, events go to the log publisher");
                Arc::new(LogPublisher::new())
            }
        };

    let dispatcher = Arc::new(OutboxDispatcher::new(
        Arc::new(SqliteOutboxRepository::new(db.clone())),
        publisher,
        Duration::from_secs(args.dispatch_interval_secs),
        args.dispatch_batch_size,
    ));
    dispatcher.start();

    let state = AppState {
        db,
        kv,
        records,
        schemas,
        audit,
        auth,
        idempotency,
        dispatcher: dispatcher.clone(),
        metrics: Arc::new(HttpMetrics::default()),
    };
    let app = http::router(state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build runtime")?;
    let serve_result = runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(args.addr)
            .await
            .with_context(|| format!("bind {}", args.addr))?;
        tracing::info!(addr = %args.addr, "listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("serve")
    });

    dispatcher.close();
    serve_result
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}
