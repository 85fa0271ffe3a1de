//! # courier-server
//!
//! Deliverability event pipeline for a multi-tenant email platform.
//!
//! This binary provides:
//! - **Notification ingestion** (`POST /webhooks/ses`) that applies provider
//!   bounce, complaint, delivery and engagement events to the message store
//!   and fans them out to subscribed webhooks
//! - **Webhook dispatch** with HMAC-SHA256 signatures and queue-driven retries
//! - **Scheduled monitoring**: DNSBL sweeps, bounce-rate watchdog with
//!   auto-pause, daily alert digests and warmup advancement
//! - **Worker pool** draining the durable SQLite job queue

mod api;
mod config;
mod dispatcher;
mod error;
mod ingest;
mod monitor;
mod queue;
mod scheduler;
mod store;
mod worker;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_net::{build_fetch_client, build_resolver, build_webhook_client, DnsblChecker, HickoryLookup};
use courier_shared::constants::DNSBL_ZONES;
use courier_shared::crypto::derive_secret_key;
use courier_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::ingest::provider::ReqwestFetcher;
use crate::ingest::Gateway;
use crate::monitor::Monitor;
use crate::queue::{JobQueue, SqliteQueue};
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::worker::{JobRouter, PoolSettings, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier_server=debug")),
        )
        .init();

    info!("Starting Courier server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store (runs migrations)
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    info!(schema_version = db.schema_version()?, "Database ready");
    let store = Store::new(db);

    // -----------------------------------------------------------------------
    // 4. Initialize subsystems
    // -----------------------------------------------------------------------
    let shutdown = CancellationToken::new();
    let secret_key = derive_secret_key(&config.secret_key);

    let resolver = build_resolver(config.dns_nameserver, config.dns_timeout)?;
    let dnsbl = DnsblChecker::new(
        Arc::new(HickoryLookup::new(resolver)),
        &DNSBL_ZONES,
        config.dns_timeout,
    );

    let queue: Arc<dyn JobQueue> = Arc::new(SqliteQueue::new(store.clone()));
    let dispatcher = Dispatcher::new(
        build_webhook_client(config.webhook_timeout)?,
        store.clone(),
        shutdown.clone(),
    );
    let monitor = Arc::new(Monitor::new(
        store.clone(),
        Arc::clone(&queue),
        dnsbl,
        config.app_domain.clone(),
        config.web_url.clone(),
    ));

    let fetcher = Arc::new(ReqwestFetcher::new(build_fetch_client(config.confirm_timeout)?));
    let mut gateway = Gateway::new(
        store.clone(),
        Arc::clone(&queue),
        fetcher,
        secret_key,
        config.webhook_max_retries,
    );
    if config.verify_signatures {
        info!("Provider signature verification enabled");
        gateway = gateway.with_signature_verification();
    }
    let app_state = AppState::new(Arc::new(gateway));

    // -----------------------------------------------------------------------
    // 5. Spawn background tasks
    // -----------------------------------------------------------------------
    let pool = WorkerPool::new(
        Arc::clone(&queue),
        Arc::new(JobRouter::new(dispatcher, monitor)),
        PoolSettings {
            worker_count: config.worker_count,
            poll_interval: config.queue_poll_interval,
            visibility: config.job_visibility,
        },
        shutdown.clone(),
    );
    let workers = pool.spawn();

    let scheduler = Arc::new(Scheduler::new(Arc::clone(&queue), shutdown.clone()));
    info!(tasks = ?scheduler.registered(), "Scheduler configured");
    let scheduler_task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };

    // -----------------------------------------------------------------------
    // 6. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let result = tokio::select! {
        result = api::serve(app_state, config.http_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    // -----------------------------------------------------------------------
    // 7. Stop background work
    // -----------------------------------------------------------------------
    shutdown.cancel();
    let _ = scheduler_task.await;
    for worker in workers {
        let _ = worker.await;
    }
    info!("Shutdown complete");

    if let Err(e) = &result {
        tracing::error!(error = %e, "HTTP server failed");
    }
    result
}
