//! Bounded connection pooling with exclusive leases.
//!
//! Adapter instances are pooled per logical connection name to amortize
//! connection setup. The pool hands out [`AdapterLease`]s - exclusive
//! ownership for the lease's lifetime - so the same instance can never be
//! used by two callers at once. When all `max_connections` instances for a
//! name are leased, `acquire` fails fast with `PoolExhausted` rather than
//! sharing a live handle.
//!
//! Pool bookkeeping uses a plain mutex with short, non-awaiting critical
//! sections; connection setup and teardown always happen outside the lock.
//! That also lets a dropped lease return its adapter synchronously.

use crate::config::ConnectionDescriptor;
use crate::db::adapter::{EngineAdapter, TransactionState};
use crate::error::{DbError, DbResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Per-name pool statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolEntryStats {
    pub name: String,
    pub total_connections: usize,
    pub active_leases: usize,
    pub idle_connections: usize,
}

/// Snapshot of the whole pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pool_count: usize,
    pub max_connections: usize,
    pub pools: Vec<PoolEntryStats>,
}

#[derive(Default)]
struct PoolEntry {
    idle: Vec<EngineAdapter>,
    /// Idle + leased instances for this name.
    total: usize,
}

struct PoolShared {
    max_connections: usize,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PoolEntry>> {
        // The mutex only guards plain bookkeeping; a poisoned lock means a
        // panic mid-update and there is nothing sensible to recover.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return a clean adapter to the idle set.
    fn restore(&self, name: &str, adapter: EngineAdapter) {
        let mut entries = self.lock();
        let entry = entries.entry(name.to_string()).or_default();
        entry.idle.push(adapter);
        // A release can race close_all; never report fewer than we hold
        if entry.total < entry.idle.len() {
            entry.total = entry.idle.len();
        }
    }

    /// Free a slot without returning an adapter.
    fn forget(&self, name: &str) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(name) {
            entry.total = entry.total.saturating_sub(1);
        }
    }
}

/// Bounded, name-keyed pool of reusable adapter instances.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Create a pool allowing up to `max_connections` instances per name.
    pub fn new(max_connections: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                max_connections: max_connections.max(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.shared.max_connections
    }

    /// Acquire an exclusive lease on an adapter for `name`.
    ///
    /// Reuses an idle instance when one exists (reconnecting it if its
    /// connection went away), creates and connects a new one while under
    /// the per-name bound, and otherwise fails with `PoolExhausted`.
    pub async fn acquire(
        &self,
        name: &str,
        descriptor: &ConnectionDescriptor,
    ) -> DbResult<AdapterLease> {
        // Fast path: take an idle instance
        let reusable = {
            let mut entries = self.shared.lock();
            entries.entry(name.to_string()).or_default().idle.pop()
        };

        if let Some(mut adapter) = reusable {
            if !adapter.is_connected() {
                if let Err(e) = adapter.connect().await {
                    self.shared.forget(name);
                    return Err(e);
                }
            }
            debug!(
                connection = %name,
                instance = %adapter.instance_id(),
                "Reusing pooled adapter"
            );
            return Ok(AdapterLease::new(adapter, Arc::clone(&self.shared), name));
        }

        // Reserve a slot under the bound, then connect outside the lock
        {
            let mut entries = self.shared.lock();
            let entry = entries.entry(name.to_string()).or_default();
            if entry.total >= self.shared.max_connections {
                warn!(
                    connection = %name,
                    max_connections = self.shared.max_connections,
                    "Connection pool exhausted"
                );
                return Err(DbError::pool_exhausted(name, self.shared.max_connections));
            }
            entry.total += 1;
        }

        let mut adapter = EngineAdapter::new(descriptor.clone());
        match adapter.connect().await {
            Ok(()) => {
                info!(
                    connection = %name,
                    instance = %adapter.instance_id(),
                    "New pooled connection"
                );
                Ok(AdapterLease::new(adapter, Arc::clone(&self.shared), name))
            }
            Err(e) => {
                self.shared.forget(name);
                Err(e)
            }
        }
    }

    /// Disconnect and clear the named pool, or every pool when `name` is
    /// omitted. Currently-leased adapters are not reclaimed; they are
    /// discarded when their lease ends.
    pub async fn close_all(&self, name: Option<&str>) {
        let drained: Vec<(String, EngineAdapter)> = {
            let mut entries = self.shared.lock();
            match name {
                Some(n) => entries
                    .remove(n)
                    .map(|entry| {
                        entry
                            .idle
                            .into_iter()
                            .map(|a| (n.to_string(), a))
                            .collect()
                    })
                    .unwrap_or_default(),
                None => entries
                    .drain()
                    .flat_map(|(n, entry)| {
                        entry
                            .idle
                            .into_iter()
                            .map(move |a| (n.clone(), a))
                            .collect::<Vec<_>>()
                    })
                    .collect(),
            }
        };

        for (pool_name, mut adapter) in drained {
            info!(
                connection = %pool_name,
                instance = %adapter.instance_id(),
                "Closing pooled connection"
            );
            adapter.disconnect().await;
        }
    }

    /// Snapshot current pool counts.
    pub fn stats(&self) -> PoolStats {
        let entries = self.shared.lock();
        let mut pools: Vec<PoolEntryStats> = entries
            .iter()
            .map(|(name, entry)| PoolEntryStats {
                name: name.clone(),
                total_connections: entry.total,
                active_leases: entry.total - entry.idle.len(),
                idle_connections: entry.idle.len(),
            })
            .collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        PoolStats {
            pool_count: pools.len(),
            max_connections: self.shared.max_connections,
            pools,
        }
    }
}

/// Exclusive lease on one pooled adapter.
///
/// Prefer [`release`](Self::release), which rolls back a leaked transaction
/// before returning the adapter to the pool. A lease that is simply dropped
/// returns a clean idle adapter synchronously; an adapter dropped
/// mid-transaction is discarded instead (closing the socket makes the
/// server roll back), so a poisoned instance is never reused.
pub struct AdapterLease {
    adapter: Option<EngineAdapter>,
    shared: Arc<PoolShared>,
    name: String,
}

impl AdapterLease {
    fn new(adapter: EngineAdapter, shared: Arc<PoolShared>, name: &str) -> Self {
        Self {
            adapter: Some(adapter),
            shared,
            name: name.to_string(),
        }
    }

    /// The logical connection name this lease belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The leased adapter.
    pub fn adapter(&mut self) -> &mut EngineAdapter {
        // Present from construction until release/drop consumes it
        self.adapter.as_mut().expect("lease already released")
    }

    /// Return the adapter to the pool.
    pub async fn release(mut self) {
        let Some(mut adapter) = self.adapter.take() else {
            return;
        };

        if adapter.transaction_state() == TransactionState::Active {
            warn!(
                connection = %self.name,
                instance = %adapter.instance_id(),
                "Lease released with open transaction, rolling back"
            );
            if adapter.rollback().await.is_err() {
                error!(
                    connection = %self.name,
                    instance = %adapter.instance_id(),
                    "Rollback on release failed, discarding connection"
                );
                adapter.disconnect().await;
                self.shared.forget(&self.name);
                return;
            }
        }

        debug!(
            connection = %self.name,
            instance = %adapter.instance_id(),
            "Lease released"
        );
        self.shared.restore(&self.name, adapter);
    }
}

impl Drop for AdapterLease {
    fn drop(&mut self) {
        if let Some(adapter) = self.adapter.take() {
            if adapter.is_connected() && adapter.transaction_state() == TransactionState::Idle {
                self.shared.restore(&self.name, adapter);
            } else {
                warn!(
                    connection = %self.name,
                    instance = %adapter.instance_id(),
                    "Lease dropped in unclean state, discarding connection"
                );
                self.shared.forget(&self.name);
            }
        }
    }
}

impl std::fmt::Debug for AdapterLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterLease")
            .field("name", &self.name)
            .field("adapter", &self.adapter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineKind;

    #[test]
    fn test_new_pool_is_empty() {
        let pool = ConnectionPool::new(5);
        let stats = pool.stats();
        assert_eq!(stats.pool_count, 0);
        assert_eq!(stats.max_connections, 5);
        assert!(stats.pools.is_empty());
    }

    #[test]
    fn test_zero_max_is_clamped_to_one() {
        let pool = ConnectionPool::new(0);
        assert_eq!(pool.max_connections(), 1);
    }

    #[tokio::test]
    async fn test_acquire_unreachable_host_frees_slot() {
        let pool = ConnectionPool::new(1);
        let descriptor =
            ConnectionDescriptor::new(EngineKind::MySql, "127.0.0.1", 1, "root", "pw").unwrap();

        let err = pool.acquire("dead", &descriptor).await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));

        // The reserved slot was given back, so the failure repeats instead
        // of reporting exhaustion
        let err = pool.acquire("dead", &descriptor).await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));

        let stats = pool.stats();
        assert_eq!(stats.pools[0].total_connections, 0);
        assert_eq!(stats.pools[0].active_leases, 0);
    }

    #[tokio::test]
    async fn test_close_all_unknown_name_is_noop() {
        let pool = ConnectionPool::new(2);
        pool.close_all(Some("missing")).await;
        assert_eq!(pool.stats().pool_count, 0);
    }

    #[test]
    fn test_stats_serialization() {
        let stats = PoolStats {
            pool_count: 1,
            max_connections: 5,
            pools: vec![PoolEntryStats {
                name: "shop".to_string(),
                total_connections: 2,
                active_leases: 1,
                idle_connections: 1,
            }],
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"active_leases\":1"));
    }
}
