// ============================================================================
// WAGER SETTLEMENT SERVICE
// ============================================================================
//
// Pays out winning confidential wagers exactly once:
//   1. USER CLAIMS:   proof-gated claim path, one lock holder per bet
//   2. BACKUP SWEEP:  reconciles resolved markets, auto-pays stale winners
//   3. FEE RETRY:     treasury fees that failed are retried until they land
//
// Storage: Supabase (PostgREST conditional updates) or in-memory DashMap
// Payouts: vault relay over HTTP
//
// Run:  cargo run
// Test: curl http://localhost:8080/health

// ============================================================================
// IMPORTS
// ============================================================================

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wager_settlement::config::SettlementConfig;
use wager_settlement::oracle::{HttpMarketOracle, MarketOracle};
use wager_settlement::payments::{HttpPaymentRail, PaymentRail};
use wager_settlement::routes::{build_router, AppState, VERSION};
use wager_settlement::storage::{MemoryStore, SettlementStore, SupabaseStore};

// ============================================================================
// WIRING
// ============================================================================

fn build_store(config: &SettlementConfig) -> Arc<dyn SettlementStore> {
    match (&config.supabase_url, &config.supabase_service_role_key) {
        (Some(url), Some(key)) => {
            info!("🗄️  Supabase store at {}", url);
            Arc::new(SupabaseStore::new(url.clone(), key.clone()))
        }
        _ => {
            warn!("🗄️  SUPABASE_URL not set, using in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    }
}

fn build_rail(config: &SettlementConfig) -> Option<Arc<dyn PaymentRail>> {
    match (&config.payout.payment_rail_url, &config.payout.vault_authority_key) {
        (Some(url), Some(key)) => {
            info!("🏦 Vault payment rail at {}", url);
            Some(Arc::new(HttpPaymentRail::new(url.clone(), key.clone())))
        }
        _ => {
            warn!("🏦 PAYMENT_RAIL_URL / VAULT_AUTHORITY_KEY not set, claims will report misconfiguration");
            None
        }
    }
}

// ============================================================================
// BACKGROUND LOOPS
// ============================================================================

fn spawn_background(state: &AppState, config: &SettlementConfig, shutdown: &watch::Receiver<bool>) {
    // 1. Backup settlement sweep
    let sweep = state.sweep.clone();
    let rx = shutdown.clone();
    let interval = config.sweep_interval;
    tokio::spawn(async move { sweep.run(interval, rx).await });

    // 2. Treasury fee retry
    if state.executor.is_configured() {
        let fees = state.fees.clone();
        let rx = shutdown.clone();
        let interval = config.fee_retry_interval;
        tokio::spawn(async move { fees.run(interval, rx).await });
    } else {
        warn!("💰 payouts not configured, fee retry sweep disabled");
    }

    // 3. Rate limiter purge
    let limiter = state.limiter.clone();
    let mut rx = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(limiter.window());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = limiter.purge_stale();
                    if purged > 0 {
                        tracing::debug!(purged, remaining = limiter.tracked_identities(), "rate limiter purged");
                    }
                }
                changed = rx.changed() => {
                    if changed.is_err() || *rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

// ============================================================================
// GRACEFUL SHUTDOWN
// ============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
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
    warn!("🛑 Shutdown signal received");
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() {
    // 1. Environment + logging
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,wager_settlement=debug")))
        .with(tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true))
        .init();

    info!("╔══════════════════════════════════════════════════════╗");
    info!("║            WAGER SETTLEMENT SERVICE                  ║");
    info!("╠══════════════════════════════════════════════════════╣");
    info!("║  Version:   {:<41}║", VERSION);
    info!("║  Jobs:      Claims + Backup Sweep + Fee Retry        ║");
    info!("╚══════════════════════════════════════════════════════╝");

    // 2. Configuration
    let config = match SettlementConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("❌ FATAL: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        fee_rate = config.fee_rate,
        assets = ?config.supported_assets,
        grace_hours = config.auto_payout_grace.as_secs() / 3600,
        "⚙️  configuration loaded"
    );
    if config.payout.treasury_address.is_none() {
        warn!("TREASURY_ADDRESS not set, claims will report misconfiguration");
    }

    // 3. Store, oracle, payment rail
    let store = build_store(&config);
    let oracle: Arc<dyn MarketOracle> = Arc::new(HttpMarketOracle::new(config.oracle_url.clone()));
    info!("🔮 Market oracle at {}", config.oracle_url);
    let rail = build_rail(&config);

    // 4. Build State
    let state = AppState::new(&config, store, oracle, rail);

    // 5. Background loops
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_background(&state, &config, &shutdown_rx);

    // 6. HTTP Server
    let app = build_router(state);
    let addr = config.bind_addr;

    info!("");
    info!("🚀 Listening on http://{}", addr);
    info!("");
    info!("📡 ENDPOINTS:");
    info!("   GET    /health                  Health check");
    info!("   POST   /bets                    Record a wager");
    info!("   GET    /bets/{{wallet}}           Wallet bets");
    info!("   DELETE /bets/{{tx}}               Delete a settled bet");
    info!("   POST   /claims                  Claim winnings");
    info!("   GET    /claims/status           Claimability check");
    info!("   POST   /fees/retry              Retry treasury fees");
    info!("   GET    /fees/status             Fee queue status");
    info!("");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("❌ FATAL: cannot bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server error: {}", e);
    }

    let _ = shutdown_tx.send(true);
    info!("✅ Server shutdown complete");
}
