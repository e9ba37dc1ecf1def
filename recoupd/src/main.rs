//! Recoup Daemon
//!
//! Runtime orchestrator for collection, reconciliation, and the API server.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p recoupd
//!
//! # Start with custom environment
//! RECOUP_ENV=test RECOUP_API_PORT=8081 cargo run -p recoupd
//! ```
//!
//! # Environment Variables
//!
//! - `RECOUP_ENV`: Environment (test, development, production)
//! - `RECOUP_API_HOST`: API host (default: 0.0.0.0)
//! - `RECOUP_API_PORT`: API port (default: 8080)
//! - `RECOUP_BALANCE_TIMEOUT_SECS`: Balance fetch deadline (default: 240)
//! - `RECOUP_CACHE_FRESHNESS_SECS`: Cached snapshot freshness (default: 300)
//! - `RECOUP_MAX_IN_FLIGHT`: Concurrent collection attempts (default: 10)
//! - `RECOUP_BUS_CAPACITY`: Message bus buffer (default: 1000)

use recoupd::{Config, Daemon, Environment};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("recoupd=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        "Recoup Daemon"
    );

    // Only stub upstreams are wired in this binary; refuse to pass them
    // off as production.
    if !config.environment.allows_stub_wiring() {
        anyhow::bail!(
            "RECOUP_ENV=production but no production balance source or \
             repayment engine is wired; this binary only carries stub \
             upstreams and an in-memory store"
        );
    }
    if config.environment == Environment::Development {
        warn!("Stub upstreams and in-memory store active (development wiring)");
    }

    let daemon = Daemon::new_stub(config);
    daemon.run().await?;

    Ok(())
}
