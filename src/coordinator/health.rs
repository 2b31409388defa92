//! Active health monitoring of storage shards
//!
//! A background loop probes every shard's acting primary on a fixed
//! interval. Sustained probe failure trips the failover manager; a
//! successful probe of a failed-over shard's original primary triggers
//! recovery re-integration. Probes never block cache operations, and at
//! most one probe per shard is in flight at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::timestamp_now_millis;
use crate::coordinator::binding::ShardBinding;
use crate::coordinator::events::{EventKind, EventLog};
use crate::coordinator::failover::FailoverManager;
use crate::coordinator::ring::HashRing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    /// Failing probes, but under the threshold. Usually a transient glitch.
    Degraded,
    Failed,
    FailedOver,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    /// Unix ms of the last completed probe, 0 before the first one.
    pub last_check_at: u64,
    /// Unix ms of the last successful probe, 0 before the first one.
    pub last_success_at: u64,
}

impl HealthRecord {
    fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            last_check_at: 0,
            last_success_at: 0,
        }
    }
}

pub struct HealthMonitor {
    ring: Arc<HashRing>,
    failover: Arc<FailoverManager>,
    events: Arc<EventLog>,
    records: Vec<Mutex<HealthRecord>>,
    /// Per-shard in-flight guard; overlapping ticks are dropped.
    probing: Vec<AtomicBool>,
    check_interval: Duration,
    probe_timeout: Duration,
    failure_threshold: u32,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    stopped: AtomicBool,
}

impl HealthMonitor {
    pub fn new(
        ring: Arc<HashRing>,
        failover: Arc<FailoverManager>,
        events: Arc<EventLog>,
        check_interval: Duration,
        probe_timeout: Duration,
        failure_threshold: u32,
    ) -> Self {
        let shard_count = ring.shard_count();
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            ring,
            failover,
            events,
            records: (0..shard_count)
                .map(|_| Mutex::new(HealthRecord::new()))
                .collect(),
            probing: (0..shard_count).map(|_| AtomicBool::new(false)).collect(),
            check_interval,
            probe_timeout,
            failure_threshold,
            stop_tx,
            stop_rx,
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn the periodic probe loop. Runs until [`stop`](Self::stop).
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut stop_rx = self.stop_rx.clone();
            if *stop_rx.borrow() {
                return;
            }

            loop {
                tokio::select! {
                    _ = ticker.tick() => Self::probe_all(&self),
                    _ = stop_rx.changed() => {
                        tracing::info!("health monitor stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Signal the probe loop to exit. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            let _ = self.stop_tx.send(true);
        }
    }

    /// True once no probe is in flight.
    pub fn probes_settled(&self) -> bool {
        self.probing.iter().all(|flag| !flag.load(Ordering::Acquire))
    }

    pub fn record(&self, shard: usize) -> HealthRecord {
        self.records[shard].lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<HealthRecord> {
        self.records
            .iter()
            .map(|record| record.lock().unwrap().clone())
            .collect()
    }

    /// Kick off one probe per shard, all in parallel, without waiting for
    /// completion. The per-shard guard coalesces overlap with a previous
    /// still-running probe.
    fn probe_all(monitor: &Arc<Self>) {
        for shard in 0..monitor.ring.shard_count() {
            let monitor = monitor.clone();
            tokio::spawn(async move {
                if monitor.probing[shard].swap(true, Ordering::AcqRel) {
                    return;
                }
                monitor.probe_shard(shard).await;
                monitor.probing[shard].store(false, Ordering::Release);
            });
        }
    }

    async fn probe_shard(&self, shard: usize) {
        let binding = match self.ring.binding(shard) {
            Ok(binding) => binding,
            Err(_) => return,
        };

        let status = self.records[shard].lock().unwrap().status;

        match status {
            HealthStatus::Healthy | HealthStatus::Degraded => {
                let endpoint = binding.write_endpoint();
                match endpoint.client().ping(self.probe_timeout).await {
                    Ok(()) => self.note_success(shard),
                    Err(e) => {
                        let failures = self.note_failure(shard);
                        tracing::warn!(
                            shard,
                            endpoint = %endpoint.addr(),
                            failures,
                            error = %e,
                            "health probe failed"
                        );
                        if failures >= self.failure_threshold {
                            self.declare_failed(&binding, &endpoint.addr(), failures).await;
                        }
                    }
                }
            }
            HealthStatus::Failed => {
                // No promotion has happened; either the primary is back or
                // the failover is retried.
                let endpoint = binding.write_endpoint();
                match endpoint.client().ping(self.probe_timeout).await {
                    Ok(()) => {
                        self.set_status(shard, HealthStatus::Healthy);
                        self.events.record(
                            EventKind::PrimaryRecovered,
                            shard,
                            format!("{} reachable again, no promotion needed", endpoint.addr()),
                        );
                        tracing::info!(shard, endpoint = %endpoint.addr(), "primary recovered before promotion");
                    }
                    Err(_) => {
                        if self.failover.failover_to_replica(&binding).await.is_ok() {
                            self.set_status(shard, HealthStatus::FailedOver);
                        }
                    }
                }
            }
            HealthStatus::FailedOver => {
                // The acting primary is the promoted replica, which is
                // healthy by construction. Recovery detection must watch
                // the original primary's own address.
                let original = binding.original_primary();
                if original.client().ping(self.probe_timeout).await.is_ok() {
                    match self.failover.handle_primary_recovery(&binding).await {
                        Ok(()) => self.set_status(shard, HealthStatus::Healthy),
                        Err(e) => {
                            tracing::warn!(
                                shard,
                                endpoint = %original.addr(),
                                error = %e,
                                "recovery re-integration failed, will retry"
                            );
                        }
                    }
                }
            }
        }
    }

    async fn declare_failed(&self, binding: &Arc<ShardBinding>, endpoint_addr: &str, failures: u32) {
        let shard = binding.id();
        {
            let mut record = self.records[shard].lock().unwrap();
            record.status = HealthStatus::Failed;
        }
        self.events.record(
            EventKind::PrimaryFailed,
            shard,
            format!("{} unreachable after {} probes", endpoint_addr, failures),
        );
        tracing::error!(shard, endpoint = %endpoint_addr, failures, "shard primary declared failed");

        if self.failover.failover_to_replica(binding).await.is_ok() {
            self.set_status(shard, HealthStatus::FailedOver);
        }
    }

    fn note_success(&self, shard: usize) {
        let now = timestamp_now_millis();
        let mut record = self.records[shard].lock().unwrap();
        record.status = HealthStatus::Healthy;
        record.consecutive_failures = 0;
        record.last_check_at = now;
        record.last_success_at = now;
    }

    fn note_failure(&self, shard: usize) -> u32 {
        let mut record = self.records[shard].lock().unwrap();
        record.consecutive_failures += 1;
        record.last_check_at = timestamp_now_millis();
        if record.status == HealthStatus::Healthy {
            record.status = HealthStatus::Degraded;
        }
        record.consecutive_failures
    }

    pub(crate) fn set_status(&self, shard: usize, status: HealthStatus) {
        let mut record = self.records[shard].lock().unwrap();
        record.status = status;
        if status == HealthStatus::Healthy || status == HealthStatus::FailedOver {
            record.consecutive_failures = 0;
        }
    }
}
