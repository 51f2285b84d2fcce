use blinno_payments::api::payment::PaymentState;
use blinno_payments::auth::SupabaseIdentityResolver;
use blinno_payments::config::AppConfig;
use blinno_payments::database::ledger_repository::LedgerRepository;
use blinno_payments::database::memory::MemoryStore;
use blinno_payments::database::order_repository::OrderRepository;
use blinno_payments::database::repository::{OrderStore, TransactionLedger};
use blinno_payments::database::{init_pool_from_config, run_migrations};
use blinno_payments::health::HealthChecker;
use blinno_payments::logging::init_tracing_with;
use blinno_payments::payments::{ClickPesaGateway, CredentialCache};
use blinno_payments::services::{OrchestratorConfig, PaymentOrchestrator};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing_with(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "Starting blinno payments service"
    );

    let missing = config.clickpesa.missing_credentials();
    if !missing.is_empty() {
        if config.is_development() {
            warn!(missing = ?missing, "ClickPesa credentials not configured; payment calls will fail");
        } else {
            error!(missing = ?missing, "ClickPesa credentials not configured in {}", config.environment);
        }
    }

    // Ledger and order store
    let (ledger, orders, db_pool): (Arc<dyn TransactionLedger>, Arc<dyn OrderStore>, _) =
        match &config.database {
            Some(db_config) => {
                info!("Initializing database connection pool...");
                let pool = init_pool_from_config(db_config).await.map_err(|e| {
                    error!("Failed to initialize database pool: {}", e);
                    e
                })?;
                if db_config.run_migrations {
                    run_migrations(&pool).await?;
                }
                info!(
                    max_connections = pool.options().get_max_connections(),
                    "Database connection pool initialized"
                );
                (
                    Arc::new(LedgerRepository::new(pool.clone())),
                    Arc::new(OrderRepository::new(pool.clone())),
                    Some(pool),
                )
            }
            None => {
                info!("Skipping database initialization (SKIP_EXTERNALS=true), using in-memory ledger");
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store, None)
            }
        };

    // Provider and credential cache
    let gateway = Arc::new(ClickPesaGateway::new(config.clickpesa.clone())?);
    #[allow(unused_mut)]
    let mut credentials = CredentialCache::new(gateway.clone());
    #[allow(unused_mut)]
    let mut health_checker = HealthChecker::new(db_pool, missing);

    #[cfg(feature = "cache")]
    {
        use blinno_payments::cache::{init_cache_pool, RedisTokenStore};

        match (&config.cache.redis_url, config.skip_externals) {
            (Some(redis_url), false) => match init_cache_pool(redis_url, &config.cache).await {
                Ok(pool) => {
                    info!("Sharing provider access token through Redis");
                    credentials = credentials
                        .with_shared_store(Arc::new(RedisTokenStore::new(pool.clone(), "clickpesa")));
                    health_checker = health_checker.with_cache(Some(pool));
                }
                Err(e) => warn!(error = %e, "Redis unavailable, keeping access token in-process"),
            },
            _ => info!("No shared credential store configured"),
        }
    }

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        Arc::new(credentials),
        gateway,
        ledger,
        orders,
        OrchestratorConfig::from(&config.payment),
    ));
    let identity = Arc::new(SupabaseIdentityResolver::new(config.supabase.clone())?);

    let app = blinno_payments::app_router(
        PaymentState {
            orchestrator,
            identity,
        },
        Arc::new(health_checker),
    );

    info!("Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening: POST /payment, GET /health");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}
