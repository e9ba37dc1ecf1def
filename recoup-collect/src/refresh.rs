//! Balance Refresh Controller.
//!
//! Wraps the upstream balance source with the three guarantees the
//! collection pipeline needs:
//!
//! - **Single-flight per advance**: at most one upstream fetch in flight
//!   per advance id; concurrent callers share the in-flight result.
//! - **Deadline**: the upstream call is bounded by a timeout (default
//!   240 s). Exceeding it fails the attempt with no automatic retry.
//! - **Degraded mode**: with `use_cache`, a snapshot fetched within the
//!   freshness window is served instead of calling upstream, so a flaky
//!   provider does not stall the pipeline.
//!
//! Every failure is recorded in the audit trail before the typed error is
//! propagated; the controller never swallows a failure silently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use recoup_domain::{AdvanceId, AuditKind, AuditLogEntry, AuditSubject, BankAccount};
use recoup_store::Store;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::BalanceError;
use crate::ports::{BalanceSnapshot, BalanceSourcePort, FetchContext};

/// Default deadline for one upstream balance fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(240);

/// Default freshness window for cached snapshots.
pub const DEFAULT_CACHE_FRESHNESS: Duration = Duration::from_secs(300);

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    /// Override the controller's default fetch deadline.
    pub timeout: Option<Duration>,
    /// Serve a fresh-enough cached snapshot instead of calling upstream.
    pub use_cache: bool,
}

/// A completed refresh.
#[derive(Debug, Clone)]
pub struct BalanceRefresh {
    /// Always true when the call returns Ok; kept for parity with the
    /// upstream contract, where a poll-style caller can observe an
    /// in-progress refresh.
    pub completed: bool,
    /// The warning flag: this snapshot came from the freshness cache, not
    /// a live upstream call.
    pub cached: bool,
    pub snapshot: BalanceSnapshot,
}

struct CachedSnapshot {
    snapshot: BalanceSnapshot,
    fetched_at: Instant,
}

type SharedResult = Result<BalanceSnapshot, BalanceError>;
type InflightMap = Mutex<HashMap<AdvanceId, broadcast::Sender<SharedResult>>>;

enum Role<'a> {
    Leader(broadcast::Sender<SharedResult>, InflightGuard<'a>),
    Follower(broadcast::Receiver<SharedResult>),
}

/// Owns the in-flight map entry for one leader fetch.
///
/// If the leader future is dropped before it publishes (caller
/// disconnect, task abort), `Drop` releases the key so the map's sender
/// clone dies with it: waiting followers observe the channel closing and
/// fail with the abandoned-refresh error instead of hanging, and the next
/// caller becomes a fresh leader.
struct InflightGuard<'a> {
    inflight: &'a InflightMap,
    advance_id: AdvanceId,
    published: bool,
}

impl InflightGuard<'_> {
    /// Publish to followers and release the key under one lock
    /// acquisition, so late arrivals either got a subscription before
    /// this or become the next leader.
    fn publish(mut self, tx: &broadcast::Sender<SharedResult>, result: SharedResult) {
        let mut inflight = self.inflight.lock().unwrap();
        inflight.remove(&self.advance_id);
        let _ = tx.send(result);
        self.published = true;
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.inflight.lock().unwrap().remove(&self.advance_id);
        }
    }
}

/// The controller. One instance serves the whole daemon; the single-flight
/// guarantee holds process-wide (all collection traffic for an advance
/// routes to one process; a distributed lease would slot in behind this
/// same surface).
pub struct BalanceRefresher {
    source: Arc<dyn BalanceSourcePort>,
    store: Arc<dyn Store>,
    default_timeout: Duration,
    cache_freshness: Duration,
    cache: Mutex<HashMap<AdvanceId, CachedSnapshot>>,
    inflight: InflightMap,
}

impl BalanceRefresher {
    pub fn new(source: Arc<dyn BalanceSourcePort>, store: Arc<dyn Store>) -> Self {
        Self::with_limits(source, store, DEFAULT_FETCH_TIMEOUT, DEFAULT_CACHE_FRESHNESS)
    }

    pub fn with_limits(
        source: Arc<dyn BalanceSourcePort>,
        store: Arc<dyn Store>,
        default_timeout: Duration,
        cache_freshness: Duration,
    ) -> Self {
        Self {
            source,
            store,
            default_timeout,
            cache_freshness,
            cache: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Refresh the balance for an advance under the single-flight lock.
    ///
    /// Returns a usable balance or propagates a typed error after writing
    /// an audit entry. Concurrent callers for the same advance never both
    /// reach upstream: the second joins the first's in-flight fetch.
    pub async fn refresh_with_lock(
        &self,
        advance_id: AdvanceId,
        bank_account: &BankAccount,
        caller: &str,
        opts: RefreshOptions,
    ) -> Result<BalanceRefresh, BalanceError> {
        if opts.use_cache {
            if let Some(snapshot) = self.fresh_cached(advance_id) {
                debug!(advance_id, "Serving cached balance snapshot");
                return Ok(BalanceRefresh {
                    completed: true,
                    cached: true,
                    snapshot,
                });
            }
        }

        // Join an in-flight fetch or become the one that performs it. The
        // map entry lives exactly as long as the leader future (timeout
        // and cancellation included), so the exclusivity cannot lapse
        // mid-operation and the key cannot outlive an abandoned fetch.
        let role = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(&advance_id) {
                Some(sender) => Role::Follower(sender.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    inflight.insert(advance_id, tx.clone());
                    let guard = InflightGuard {
                        inflight: &self.inflight,
                        advance_id,
                        published: false,
                    };
                    Role::Leader(tx, guard)
                }
            }
        };

        match role {
            Role::Follower(rx) => self.await_shared(rx, advance_id, bank_account, caller).await,
            Role::Leader(tx, guard) => {
                self.fetch_as_leader(tx, guard, advance_id, bank_account, caller, opts)
                    .await
            }
        }
    }

    async fn await_shared(
        &self,
        mut rx: broadcast::Receiver<SharedResult>,
        advance_id: AdvanceId,
        bank_account: &BankAccount,
        caller: &str,
    ) -> Result<BalanceRefresh, BalanceError> {
        debug!(advance_id, "Joining in-flight balance refresh");
        match rx.recv().await {
            Ok(Ok(snapshot)) => Ok(BalanceRefresh {
                completed: true,
                cached: false,
                snapshot,
            }),
            // The leader already wrote the audit entry for this failure.
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let e = BalanceError::Internal(
                    "in-flight balance refresh was abandoned".to_string(),
                );
                self.audit_failure(advance_id, bank_account, caller, &e).await;
                Err(e)
            }
        }
    }

    async fn fetch_as_leader(
        &self,
        tx: broadcast::Sender<SharedResult>,
        guard: InflightGuard<'_>,
        advance_id: AdvanceId,
        bank_account: &BankAccount,
        caller: &str,
        opts: RefreshOptions,
    ) -> Result<BalanceRefresh, BalanceError> {
        let deadline = opts.timeout.unwrap_or(self.default_timeout);
        let ctx = FetchContext {
            advance_id,
            caller: caller.to_string(),
            reason: "collection balance refresh".to_string(),
        };

        let result: SharedResult =
            match tokio::time::timeout(deadline, self.source.fetch_balance(bank_account, &ctx))
                .await
            {
                Ok(upstream) => upstream,
                Err(_) => Err(BalanceError::Timeout(deadline)),
            };

        guard.publish(&tx, result.clone());

        match result {
            Ok(snapshot) => {
                info!(
                    advance_id,
                    bank_account_id = bank_account.id,
                    available = %snapshot.available,
                    "Balance refreshed"
                );
                self.cache.lock().unwrap().insert(
                    advance_id,
                    CachedSnapshot {
                        snapshot: snapshot.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(BalanceRefresh {
                    completed: true,
                    cached: false,
                    snapshot,
                })
            }
            Err(e) => {
                warn!(
                    advance_id,
                    bank_account_id = bank_account.id,
                    error = %e,
                    "Balance refresh failed"
                );
                self.audit_failure(advance_id, bank_account, caller, &e).await;
                Err(e)
            }
        }
    }

    fn fresh_cached(&self, advance_id: AdvanceId) -> Option<BalanceSnapshot> {
        let cache = self.cache.lock().unwrap();
        cache
            .get(&advance_id)
            .filter(|c| c.fetched_at.elapsed() < self.cache_freshness)
            .map(|c| c.snapshot.clone())
    }

    /// Best-effort audit write: a failure to record the entry is logged
    /// and does not change the returned error.
    async fn audit_failure(
        &self,
        advance_id: AdvanceId,
        bank_account: &BankAccount,
        caller: &str,
        cause: &BalanceError,
    ) {
        let entry = AuditLogEntry::new(
            AuditSubject::Advance(advance_id),
            caller,
            AuditKind::BalanceRefresh,
            false,
            cause.to_string(),
            json!({
                "bank_account_id": bank_account.id,
                "institution": bank_account.institution,
                "error": cause.name(),
            }),
        );

        if let Err(audit_err) = self.store.audit_log().append(&entry).await {
            error!(
                advance_id,
                error = %audit_err,
                "Failed to write balance-refresh audit entry"
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubBalanceSource;
    use recoup_store::MemoryStore;
    use rust_decimal_macros::dec;

    fn bank_account() -> BankAccount {
        BankAccount {
            id: 42,
            institution: "First Test Bank".to_string(),
        }
    }

    fn refresher(
        source: Arc<StubBalanceSource>,
        store: Arc<MemoryStore>,
    ) -> BalanceRefresher {
        BalanceRefresher::with_limits(
            source,
            store,
            Duration::from_millis(250),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_refresh_returns_upstream_snapshot() {
        let source = Arc::new(StubBalanceSource::new(dec!(120.00)));
        let store = Arc::new(MemoryStore::new());
        let refresher = refresher(source.clone(), store);

        let refresh = refresher
            .refresh_with_lock(500, &bank_account(), "test", RefreshOptions::default())
            .await
            .unwrap();

        assert!(refresh.completed);
        assert!(!refresh.cached);
        assert_eq!(refresh.snapshot.available, dec!(120.00));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_single_flight_shares_one_upstream_fetch() {
        let source = Arc::new(StubBalanceSource::new(dec!(80.00)));
        source.set_delay(Duration::from_millis(50));
        let store = Arc::new(MemoryStore::new());
        let refresher = refresher(source.clone(), store);

        let account = bank_account();
        let (a, b) = tokio::join!(
            refresher.refresh_with_lock(500, &account, "caller-a", RefreshOptions::default()),
            refresher.refresh_with_lock(500, &account, "caller-b", RefreshOptions::default()),
        );

        assert_eq!(a.unwrap().snapshot.available, dec!(80.00));
        assert_eq!(b.unwrap().snapshot.available, dec!(80.00));
        assert_eq!(source.calls(), 1, "both callers must share one fetch");
    }

    #[tokio::test]
    async fn test_distinct_advances_do_not_share() {
        let source = Arc::new(StubBalanceSource::new(dec!(80.00)));
        source.set_delay(Duration::from_millis(20));
        let store = Arc::new(MemoryStore::new());
        let refresher = refresher(source.clone(), store);

        let account = bank_account();
        let (a, b) = tokio::join!(
            refresher.refresh_with_lock(500, &account, "test", RefreshOptions::default()),
            refresher.refresh_with_lock(501, &account, "test", RefreshOptions::default()),
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_aborted_leader_releases_the_inflight_key() {
        let source = Arc::new(StubBalanceSource::new(dec!(80.00)));
        source.set_delay(Duration::from_millis(100));
        let store = Arc::new(MemoryStore::new());
        let refresher = Arc::new(refresher(source.clone(), store));
        let account = bank_account();

        let leader = tokio::spawn({
            let refresher = refresher.clone();
            let account = account.clone();
            async move {
                refresher
                    .refresh_with_lock(500, &account, "caller-a", RefreshOptions::default())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        source.set_delay(Duration::ZERO);
        let second = tokio::time::timeout(
            Duration::from_secs(1),
            refresher.refresh_with_lock(500, &account, "caller-b", RefreshOptions::default()),
        )
        .await
        .expect("refresh must not wait on the abandoned fetch")
        .unwrap();

        assert_eq!(second.snapshot.available, dec!(80.00));
        assert_eq!(source.calls(), 2, "second caller must lead a fresh fetch");
    }

    #[tokio::test]
    async fn test_follower_of_abandoned_fetch_fails_instead_of_hanging() {
        let source = Arc::new(StubBalanceSource::new(dec!(80.00)));
        source.set_delay(Duration::from_millis(100));
        let store = Arc::new(MemoryStore::new());
        let refresher = Arc::new(refresher(source.clone(), store.clone()));
        let account = bank_account();

        let leader = tokio::spawn({
            let refresher = refresher.clone();
            let account = account.clone();
            async move {
                refresher
                    .refresh_with_lock(500, &account, "caller-a", RefreshOptions::default())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = tokio::spawn({
            let refresher = refresher.clone();
            let account = account.clone();
            async move {
                refresher
                    .refresh_with_lock(500, &account, "caller-b", RefreshOptions::default())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        leader.abort();
        let _ = leader.await;

        let err = tokio::time::timeout(Duration::from_secs(1), follower)
            .await
            .expect("follower must observe the abandoned fetch")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, BalanceError::Internal(_)));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_fails_closed_with_one_audit_entry() {
        let source = Arc::new(StubBalanceSource::new(dec!(80.00)));
        source.set_delay(Duration::from_millis(200));
        let store = Arc::new(MemoryStore::new());
        let refresher = refresher(source, store.clone());

        let opts = RefreshOptions {
            timeout: Some(Duration::from_millis(20)),
            use_cache: false,
        };
        let err = refresher
            .refresh_with_lock(500, &bank_account(), "test", opts)
            .await
            .unwrap_err();

        assert!(matches!(err, BalanceError::Timeout(_)));

        let entries = store
            .audit_log()
            .find_by_subject(AuditSubject::Advance(500))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1, "exactly one audit entry on timeout");
        assert!(!entries[0].successful);
        assert_eq!(entries[0].kind, AuditKind::BalanceRefresh);
        assert_eq!(entries[0].extra["bank_account_id"], 42);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_audited_and_propagated() {
        let source = Arc::new(StubBalanceSource::new(dec!(80.00)));
        source.fail_with(BalanceError::InstitutionUnavailable(
            "provider maintenance".to_string(),
        ));
        let store = Arc::new(MemoryStore::new());
        let refresher = refresher(source, store.clone());

        let err = refresher
            .refresh_with_lock(500, &bank_account(), "test", RefreshOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BalanceError::InstitutionUnavailable(_)));

        let entries = store
            .audit_log()
            .find_by_subject(AuditSubject::Advance(500))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].extra["error"], "institution_unavailable");
    }

    #[tokio::test]
    async fn test_use_cache_serves_fresh_snapshot_with_warning() {
        let source = Arc::new(StubBalanceSource::new(dec!(60.00)));
        let store = Arc::new(MemoryStore::new());
        let refresher = refresher(source.clone(), store);
        let account = bank_account();

        let first = refresher
            .refresh_with_lock(500, &account, "test", RefreshOptions::default())
            .await
            .unwrap();
        assert!(!first.cached);

        let opts = RefreshOptions {
            timeout: None,
            use_cache: true,
        };
        let second = refresher.refresh_with_lock(500, &account, "test", opts).await.unwrap();

        assert!(second.completed);
        assert!(second.cached, "cached result must carry the warning flag");
        assert_eq!(second.snapshot.available, dec!(60.00));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_without_use_cache_always_calls_upstream() {
        let source = Arc::new(StubBalanceSource::new(dec!(60.00)));
        let store = Arc::new(MemoryStore::new());
        let refresher = refresher(source.clone(), store);
        let account = bank_account();

        for _ in 0..2 {
            refresher
                .refresh_with_lock(500, &account, "test", RefreshOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_cache_falls_through_to_upstream() {
        let source = Arc::new(StubBalanceSource::new(dec!(60.00)));
        let store = Arc::new(MemoryStore::new());
        let refresher = BalanceRefresher::with_limits(
            source.clone(),
            store,
            Duration::from_millis(250),
            Duration::from_millis(10),
        );
        let account = bank_account();

        refresher
            .refresh_with_lock(500, &account, "test", RefreshOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let opts = RefreshOptions {
            timeout: None,
            use_cache: true,
        };
        let second = refresher.refresh_with_lock(500, &account, "test", opts).await.unwrap();

        assert!(!second.cached);
        assert_eq!(source.calls(), 2);
    }
}
