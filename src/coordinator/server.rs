//! Coordinator assembly
//!
//! Owns every component: the ring and its bindings, the cache router, the
//! health monitor, the failover manager and the stats aggregator. The
//! front-end talks to this type only.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::common::{CoordinatorConfig, ReplicationMode, Result};
use crate::coordinator::binding::ShardBinding;
use crate::coordinator::cache::{CacheRouter, DeleteOutcome, GetOutcome, SetOutcome};
use crate::coordinator::events::{EventLog, TransitionEvent};
use crate::coordinator::failover::{FailoverManager, FailoverRecord};
use crate::coordinator::health::{HealthMonitor, HealthRecord};
use crate::coordinator::ring::{HashRing, ShardArcs};
use crate::coordinator::stats::{ClusterStats, ShardLag, StatsAggregator};

/// Health and failover state of one shard, merged for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct ShardHealth {
    pub shard: usize,
    pub name: String,
    pub primary_addr: String,
    pub replica_addr: String,
    #[serde(flatten)]
    pub health: HealthRecord,
    pub failover: FailoverRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailoverMetricsReport {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub cumulative_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_duration_ms: Option<f64>,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    ring: Arc<HashRing>,
    cache: CacheRouter,
    events: Arc<EventLog>,
    failover: Arc<FailoverManager>,
    monitor: Arc<HealthMonitor>,
    stats: StatsAggregator,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Build all components from configuration. Fails fast on malformed
    /// endpoints or mismatched primary/replica lists. No connections are
    /// dialed here; endpoints connect lazily on first use.
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;

        let command_timeout = Duration::from_millis(config.command_timeout_ms);
        let probe_timeout = Duration::from_millis(config.probe_timeout_ms);

        let bindings = config
            .primaries
            .iter()
            .zip(config.replicas.iter())
            .enumerate()
            .map(|(id, (primary, replica))| {
                ShardBinding::new(id, primary, replica, command_timeout).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        let ring = Arc::new(HashRing::new(bindings, config.virtual_nodes));
        let events = Arc::new(EventLog::new());
        let failover = Arc::new(FailoverManager::new(
            ring.shard_count(),
            events.clone(),
            probe_timeout,
        ));
        let monitor = Arc::new(HealthMonitor::new(
            ring.clone(),
            failover.clone(),
            events.clone(),
            Duration::from_millis(config.check_interval_ms),
            probe_timeout,
            config.failure_threshold,
        ));
        let cache = CacheRouter::new(ring.clone(), config.default_mode, config.wait_timeout_ms);
        let stats = StatsAggregator::new(ring.clone());

        Ok(Self {
            config,
            ring,
            cache,
            events,
            failover,
            monitor,
            stats,
            monitor_handle: Mutex::new(None),
        })
    }

    /// Start background health monitoring.
    pub fn start(&self) {
        tracing::info!(
            shards = self.ring.shard_count(),
            virtual_nodes = self.config.virtual_nodes,
            positions = self.ring.position_count(),
            mode = %self.config.default_mode,
            "coordinator starting"
        );
        let handle = self.monitor.clone().start();
        *self.monitor_handle.lock().unwrap() = Some(handle);
    }

    /// Stop the monitor, let outstanding probes settle within the grace
    /// window, then close all shard connections. Idempotent.
    pub async fn shutdown(&self) {
        self.monitor.stop();

        let handle = self.monitor_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_grace_ms);
        while !self.monitor.probes_settled() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        for binding in self.ring.bindings() {
            for endpoint in binding.endpoints() {
                endpoint.client().close().await;
            }
        }

        tracing::info!("coordinator stopped");
    }

    // === Data plane ===

    pub async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl_secs: Option<u64>,
        mode: Option<ReplicationMode>,
    ) -> Result<SetOutcome> {
        self.cache.set(key, value, ttl_secs, mode).await
    }

    pub async fn get(&self, key: &str) -> Result<GetOutcome> {
        self.cache.get(key).await
    }

    pub async fn delete(&self, key: &str) -> Result<DeleteOutcome> {
        self.cache.delete(key).await
    }

    // === Observability ===

    pub fn describe_ring(&self) -> Vec<ShardArcs> {
        self.ring.describe()
    }

    pub async fn all_stats(&self) -> ClusterStats {
        self.stats.all_stats().await
    }

    pub async fn replication_lag(&self) -> Vec<ShardLag> {
        self.stats.replication_lag().await
    }

    pub fn health_summary(&self) -> Vec<ShardHealth> {
        self.ring
            .bindings()
            .iter()
            .map(|binding| ShardHealth {
                shard: binding.id(),
                name: binding.name().to_string(),
                primary_addr: binding.write_endpoint().addr(),
                replica_addr: binding.replica_endpoint().addr(),
                health: self.monitor.record(binding.id()),
                failover: self.failover.record(binding.id()),
            })
            .collect()
    }

    pub fn failover_metrics(&self) -> FailoverMetricsReport {
        let metrics = self.failover.metrics();
        FailoverMetricsReport {
            average_duration_ms: metrics.average_duration_ms(),
            total: metrics.total,
            successful: metrics.successful,
            failed: metrics.failed,
            cumulative_duration_ms: metrics.cumulative_duration_ms,
        }
    }

    pub fn health_events(&self) -> Vec<TransitionEvent> {
        self.events.snapshot()
    }

    /// Force a failover, bypassing the probe ladder. For testing.
    pub async fn trigger_failover(&self, shard: usize) -> Result<()> {
        let binding = self.ring.binding(shard)?;
        self.failover.failover_to_replica(&binding).await?;
        self.monitor
            .set_status(shard, crate::coordinator::health::HealthStatus::FailedOver);
        Ok(())
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn ring(&self) -> &Arc<HashRing> {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::failover::FailoverStatus;
    use crate::coordinator::health::HealthStatus;

    fn config(shards: usize) -> CoordinatorConfig {
        let primaries: Vec<String> = (0..shards).map(|i| format!("10.0.0.{}:6379", i + 1)).collect();
        let replicas: Vec<String> = (0..shards).map(|i| format!("10.0.1.{}:6379", i + 1)).collect();
        CoordinatorConfig::from_endpoint_lists(&primaries.join(","), &replicas.join(",")).unwrap()
    }

    #[test]
    fn test_build_from_config() {
        let coordinator = Coordinator::new(config(3)).unwrap();

        assert_eq!(coordinator.ring().shard_count(), 3);
        assert_eq!(coordinator.ring().position_count(), 3 * 150);

        let summary = coordinator.health_summary();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[0].health.status, HealthStatus::Healthy);
        assert_eq!(summary[0].failover.status, FailoverStatus::NeverFailed);
        assert_eq!(summary[1].name, "cache_node_1");
    }

    #[test]
    fn test_bad_config_rejected() {
        let mut bad = config(2);
        bad.replicas.pop();
        assert!(Coordinator::new(bad).is_err());
    }

    #[test]
    fn test_describe_ring_shares() {
        let coordinator = Coordinator::new(config(4)).unwrap();
        let arcs = coordinator.describe_ring();
        assert_eq!(arcs.len(), 4);
        let percent: f64 = arcs.iter().map(|a| a.percent).sum();
        assert!((percent - 100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_trigger_failover_unknown_shard() {
        let coordinator = Coordinator::new(config(2)).unwrap();
        assert!(coordinator.trigger_failover(9).await.is_err());
    }

    #[test]
    fn test_initial_metrics_empty() {
        let coordinator = Coordinator::new(config(2)).unwrap();
        let metrics = coordinator.failover_metrics();
        assert_eq!(metrics.total, 0);
        assert_eq!(metrics.average_duration_ms, None);
    }
}
