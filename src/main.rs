//! Payout Engine entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌───────────┐    ┌──────────┐
//! │  Config  │───▶│  Engine  │───▶│  Gateway  │    │  Worker  │
//! │  (YAML)  │    │ (Store + │    │ (Paystack)│◀───│(Reconcile│
//! └──────────┘    │  Ledger) │    └───────────┘    │  sweep)  │
//!                 └──────────┘                     └──────────┘
//! ```
//!
//! With `postgres_url` configured the engine runs against PostgreSQL and the
//! real Paystack client; without it, an in-memory store/ledger and the mock
//! gateway serve as a standalone dev mode.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use payout_engine::config::AppConfig;
use payout_engine::db::Database;
use payout_engine::ledger::{Ledger, MemoryLedger, PgLedger};
use payout_engine::withdrawal::api::{AppState, router};
use payout_engine::withdrawal::gateway::{MockGateway, TransferGateway};
use payout_engine::withdrawal::paystack::{PaystackClient, PaystackConfig};
use payout_engine::withdrawal::store::WithdrawalStore;
use payout_engine::withdrawal::store_memory::MemoryStore;
use payout_engine::withdrawal::store_pg::PgStore;
use payout_engine::withdrawal::{LifecycleEngine, ReconcileWorker, WorkerConfig};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = payout_engine::logging::init_logging(&config);

    info!("Starting Payout Engine in {} mode", env);

    let (store, ledger): (Arc<dyn WithdrawalStore>, Arc<dyn Ledger>) =
        match config.postgres_url.as_deref() {
            Some(url) => {
                let db = Database::connect(url)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                db.health_check().await.context("Database health check failed")?;
                (
                    Arc::new(PgStore::new(db.pool().clone())),
                    Arc::new(PgLedger::new(db.pool().clone())),
                )
            }
            None => {
                warn!("No postgres_url configured - running with in-memory store/ledger");
                (Arc::new(MemoryStore::new()), Arc::new(MemoryLedger::new()))
            }
        };

    let gateway: Arc<dyn TransferGateway> = if config.paystack.secret_key.is_empty() {
        warn!("No Paystack secret key - using mock gateway (dev only)");
        Arc::new(MockGateway::new())
    } else {
        Arc::new(PaystackClient::new(PaystackConfig {
            base_url: config.paystack.base_url.clone(),
            secret_key: config.paystack.secret_key.clone(),
            timeout: Duration::from_secs(config.paystack.timeout_secs),
            currency: config.paystack.currency.clone(),
        })?)
    };
    info!(gateway = gateway.name(), "Transfer gateway ready");

    let engine = Arc::new(LifecycleEngine::new(store, ledger, gateway));

    let worker = ReconcileWorker::new(
        Arc::clone(&engine),
        WorkerConfig {
            scan_interval: Duration::from_secs(config.worker.scan_interval_secs),
            stale_threshold: Duration::from_secs(config.worker.stale_threshold_secs),
            batch_size: config.worker.batch_size,
        },
    );
    tokio::spawn(async move { worker.run().await });

    let port = get_port_override().unwrap_or(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Admin payout API listening on {}", addr);

    axum::serve(listener, router(AppState { engine }))
        .await
        .context("Server error")?;
    Ok(())
}
