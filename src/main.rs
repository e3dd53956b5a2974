//! Gatekeeper - billing-to-access reconciliation for facility door control

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::{
    cache::{FundingStatusCache, FundingStore, MemoryFundingStore, MongoFundingStore},
    config::Args,
    directory::HttpMemberDirectory,
    engine::AccessControlEngine,
    upstream::{AgreementClient, AgreementFundingFetcher, HttpAccessApi, ReqwestTransport},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gatekeeper={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Gatekeeper - Access Reconciliation");
    info!("======================================");
    info!("Run ID: {}", args.run_id);
    info!("Upstream: {}", args.upstream_url);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Retry: {} attempts, {}ms backoff", args.retry_attempts, args.retry_backoff_ms);
    info!("Cache TTL: {}h", args.cache_ttl_hours);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("======================================");

    let timeout = Duration::from_secs(args.request_timeout_secs);
    let session = args.session_context();

    // Persisted funding cache store (in-memory fallback in dev mode)
    let store: Arc<dyn FundingStore> =
        match MongoFundingStore::connect(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                if args.dev_mode {
                    warn!("MongoDB unavailable (dev mode, using in-memory cache): {}", e);
                    Arc::new(MemoryFundingStore::new())
                } else {
                    error!("MongoDB connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        };

    // Upstream clients
    let transport = Arc::new(ReqwestTransport::new(timeout)?);
    let agreement_client = AgreementClient::new(
        transport,
        args.upstream_url.clone(),
        args.retry_attempts,
        Duration::from_millis(args.retry_backoff_ms),
    );
    let fetcher = Arc::new(AgreementFundingFetcher::new(
        agreement_client,
        session.clone(),
        args.bearer_token.clone(),
    ));
    let access = Arc::new(HttpAccessApi::new(
        args.upstream_url.clone(),
        args.bearer_token.clone(),
        &session,
        timeout,
    )?);
    let directory = Arc::new(HttpMemberDirectory::new(
        args.upstream_url.clone(),
        args.bearer_token.clone(),
        &session,
        timeout,
    )?);

    let cache = FundingStatusCache::new(
        store,
        fetcher,
        chrono::Duration::hours(args.cache_ttl_hours),
    );
    let engine = AccessControlEngine::new(access, directory, args.operator.clone());

    // Lock pass: past-due members lose access
    let lock_batch = engine.check_and_lock_past_due_members().await?;
    info!("Lock pass: {}", lock_batch);
    for err in &lock_batch.errors {
        warn!("Lock failure: {}", err);
    }

    // Unlock pass: settled members get access back
    if args.unlock_pass {
        let unlock_batch = engine.check_and_unlock_paid_members().await?;
        info!("Unlock pass: {}", unlock_batch);
        for err in &unlock_batch.errors {
            warn!("Unlock failure: {}", err);
        }
    }

    // Cache housekeeping
    if args.sweep_expired {
        match cache.sweep_expired().await {
            Ok(removed) => info!("Cache sweep: {} expired records removed", removed),
            Err(e) => warn!("Cache sweep failed: {}", e),
        }
    }

    Ok(())
}
