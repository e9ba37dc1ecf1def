//! Daemon: main runtime orchestrator.
//!
//! Ties together all components:
//! - Balance refresher (single-flight fetch controller)
//! - Collection executor and worker (scheduled attempts)
//! - Reconciliation worker (engine result settlement)
//! - API server (health + operator balance refresh)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Report unsettled advances from the store
//! 4. Start API server and workers
//! 5. Block until SIGINT, then cancel workers and drain

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use recoup_collect::{
    BalanceRefresher, BalanceSourcePort, CollectionExecutor, RepaymentEnginePort,
    StubBalanceSource, StubRepaymentEngine,
};
use recoup_store::{MemoryStore, Store};

use crate::api::{create_router, ApiState};
use crate::collection_worker::CollectionWorker;
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::MessageBus;
use crate::metrics::{Metrics, PrometheusMetrics};
use crate::reconciliation_worker::ReconciliationWorker;

// =============================================================================
// Daemon
// =============================================================================

/// The main Recoup daemon.
pub struct Daemon {
    config: Config,
    store: Arc<dyn Store>,
    bus: Arc<MessageBus>,
    refresher: Arc<BalanceRefresher>,
    executor: Arc<CollectionExecutor>,
    metrics: Arc<dyn Metrics>,
}

impl Daemon {
    /// Create a daemon with stub upstreams and an in-memory store
    /// (development and tests).
    pub fn new_stub(config: Config) -> Self {
        let source = Arc::new(StubBalanceSource::new(rust_decimal_macros::dec!(1000.00)));
        let engine = Arc::new(StubRepaymentEngine::new());
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(PrometheusMetrics::new());
        Self::new(config, source, engine, store, metrics)
    }

    /// Create a daemon with provided components.
    pub fn new(
        config: Config,
        source: Arc<dyn BalanceSourcePort>,
        engine: Arc<dyn RepaymentEnginePort>,
        store: Arc<dyn Store>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        let refresher = Arc::new(BalanceRefresher::with_limits(
            source,
            store.clone(),
            config.collection.balance_timeout,
            config.collection.cache_freshness,
        ));
        let executor = Arc::new(CollectionExecutor::new(
            refresher.clone(),
            engine,
            store.clone(),
        ));
        let bus = Arc::new(MessageBus::new(config.collection.bus_capacity));

        Self {
            config,
            store,
            bus,
            refresher,
            executor,
            metrics,
        }
    }

    /// The daemon's message bus. Schedulers and engine webhook adapters
    /// publish here.
    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Run the daemon.
    ///
    /// Blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "Starting Recoup daemon"
        );

        // 1. Report ledger state on startup
        let unsettled = self.store.advances().find_unsettled().await?;
        info!(count = unsettled.len(), "Unsettled advances on the ledger");

        // 2. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Start workers
        let shutdown_token = CancellationToken::new();
        let collection = Arc::new(CollectionWorker::new(
            self.executor.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.metrics.clone(),
            self.config.collection.max_in_flight,
            shutdown_token.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationWorker::new(
            self.store.clone(),
            self.bus.clone(),
            self.metrics.clone(),
            shutdown_token.clone(),
        ));
        let collection_handle = collection.start();
        let reconciliation_handle = reconciliation.start();

        // 4. Block until shutdown
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to install signal handler: {}", e)))?;
        info!("Received shutdown signal");

        // 5. Graceful shutdown
        shutdown_token.cancel();
        let _ = collection_handle.await;
        let _ = reconciliation_handle.await;
        info!("Shutdown complete");

        Ok(())
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            store: self.store.clone(),
            refresher: self.refresher.clone(),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        // Spawn the server task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FailureResponse, HealthResponse, RefreshBalanceResponse};
    use recoup_domain::AuditSubject;
    use recoup_testkit::test_advance;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let daemon = Daemon::new_stub(Config::test());

        let unsettled = daemon.store().advances().find_unsettled().await.unwrap();
        assert!(unsettled.is_empty());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let daemon = Daemon::new_stub(Config::test());
        let addr = daemon.start_api_server().await.unwrap();
        assert!(addr.port() > 0);

        let response = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap();
        assert!(response.status().is_success());

        let health: HealthResponse = response.json().await.unwrap();
        assert_eq!(health.status, "healthy");
    }

    #[tokio::test]
    async fn test_operator_refresh_round_trip() {
        let daemon = Daemon::new_stub(Config::test());
        let advance = test_advance(500, dec!(75.00));
        daemon.store().advances().save(&advance).await.unwrap();
        let addr = daemon.start_api_server().await.unwrap();

        let client = reqwest::Client::new();
        let response = client
            .post(format!(
                "http://{}/advance/500/bank-account/{}/refresh-balance",
                addr, advance.bank_account.id
            ))
            .json(&serde_json::json!({}))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());

        let refresh: RefreshBalanceResponse = response.json().await.unwrap();
        assert!(refresh.ok);
        assert!(refresh.completed);
        assert!(!refresh.cached);
        assert_eq!(refresh.balances.available, dec!(1000.00));

        // A successful synchronous refresh leaves no audit trail.
        let entries = daemon
            .store()
            .audit_log()
            .find_by_subject(AuditSubject::Advance(500))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_operator_refresh_unknown_advance_is_404() {
        let daemon = Daemon::new_stub(Config::test());
        let addr = daemon.start_api_server().await.unwrap();

        let client = reqwest::Client::new();
        let response = client
            .post(format!(
                "http://{}/advance/999/bank-account/42/refresh-balance",
                addr
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let body: FailureResponse = response.json().await.unwrap();
        assert!(!body.ok);
        assert!(body.reason.unwrap().contains("999"));
    }

    #[tokio::test]
    async fn test_operator_refresh_wrong_bank_account_is_404() {
        let daemon = Daemon::new_stub(Config::test());
        let advance = test_advance(500, dec!(75.00));
        daemon.store().advances().save(&advance).await.unwrap();
        let addr = daemon.start_api_server().await.unwrap();

        let client = reqwest::Client::new();
        let response = client
            .post(format!(
                "http://{}/advance/500/bank-account/7777/refresh-balance",
                addr
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
