//! Recoup Daemon Library
//!
//! Runtime orchestrator for the Recoup collection pipeline.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ─▶ Message Bus ─▶ Collection Worker ─▶ Executor ─▶ Repayment Engine
//!                   │                                  │
//!                   │                          Balance Refresher ─▶ Institution
//!                   │                                  ▲
//!                   │                             API Server (operator refresh)
//!                   │
//!                   └────────▶ Reconciliation Worker ─▶ Ledger (advances, payments, audit)
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Collection Worker**: Turns "advance due" messages into attempts
//! - **Reconciliation Worker**: Settles engine results onto the ledger
//! - **Message Bus**: Internal delivery of due-advances and engine results
//! - **API**: Health and operator-triggered balance refresh
//! - **Metrics**: Injected counter surface (prometheus-backed in production)
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use recoupd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_stub(config);
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod collection_worker;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod metrics;
pub mod reconciliation_worker;

// Re-exports for convenience
pub use collection_worker::CollectionWorker;
pub use config::{ApiConfig, CollectionConfig, Config, Environment};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{BusMessage, MessageBus, MessageReceiver};
pub use metrics::{CapturingMetrics, Metrics, NoopMetrics, PrometheusMetrics};
pub use reconciliation_worker::ReconciliationWorker;
