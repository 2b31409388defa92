//! Failover execution and recovery re-integration
//!
//! Promotion turns the replica of a failed primary into a standalone
//! writable node and swaps the binding's role pointers. Once a shard has
//! failed over, the promoted endpoint stays primary: a recovered original
//! primary is re-integrated as the new replica, never failed back.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::common::{timestamp_now_millis, Error, Result};
use crate::coordinator::binding::ShardBinding;
use crate::coordinator::events::{EventKind, EventLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverStatus {
    NeverFailed,
    FailingOver,
    FailedOver,
    Recovered,
    FailoverFailed,
}

/// Per-shard failover bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct FailoverRecord {
    pub status: FailoverStatus,
    /// When the current status was entered (Unix ms).
    pub since: u64,
    /// Whether the original replica currently acts as primary.
    pub promoted: bool,
    /// Duration of the last completed promotion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<u64>,
}

impl FailoverRecord {
    fn new() -> Self {
        Self {
            status: FailoverStatus::NeverFailed,
            since: timestamp_now_millis(),
            promoted: false,
            last_duration_ms: None,
        }
    }

    fn enter(&mut self, status: FailoverStatus) {
        self.status = status;
        self.since = timestamp_now_millis();
    }
}

/// Monotonic failover counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FailoverMetrics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub cumulative_duration_ms: u64,
}

impl FailoverMetrics {
    pub fn average_duration_ms(&self) -> Option<f64> {
        if self.successful == 0 {
            None
        } else {
            Some(self.cumulative_duration_ms as f64 / self.successful as f64)
        }
    }
}

pub struct FailoverManager {
    records: Vec<Mutex<FailoverRecord>>,
    metrics: Mutex<FailoverMetrics>,
    events: Arc<EventLog>,
    /// Deadline for the pre-promotion replica probe.
    probe_timeout: Duration,
}

impl FailoverManager {
    pub fn new(shard_count: usize, events: Arc<EventLog>, probe_timeout: Duration) -> Self {
        Self {
            records: (0..shard_count)
                .map(|_| Mutex::new(FailoverRecord::new()))
                .collect(),
            metrics: Mutex::new(FailoverMetrics::default()),
            events,
            probe_timeout,
        }
    }

    pub fn record(&self, shard: usize) -> FailoverRecord {
        self.records[shard].lock().unwrap().clone()
    }

    pub fn metrics(&self) -> FailoverMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Promote the shard's replica to primary. Idempotent against a second
    /// concurrent trigger: a shard already failing over or failed over
    /// returns without repeating the promotion sequence.
    pub async fn failover_to_replica(&self, binding: &Arc<ShardBinding>) -> Result<()> {
        let shard = binding.id();

        // Test-and-set under the record lock makes the promotion at-most-once.
        {
            let mut record = self.records[shard].lock().unwrap();
            match record.status {
                FailoverStatus::FailingOver | FailoverStatus::FailedOver => {
                    tracing::debug!(shard, status = ?record.status, "failover already underway, skipping");
                    return Ok(());
                }
                _ => record.enter(FailoverStatus::FailingOver),
            }
        }
        binding.raise_gate();
        let started = Instant::now();

        let replica = binding.replica_endpoint();
        self.events.record(
            EventKind::FailoverBegin,
            shard,
            format!("promoting {}", replica.addr()),
        );
        tracing::warn!(shard, replica = %replica.addr(), "starting failover");

        // The replica must be alive before we point writes at it
        if let Err(e) = replica.client().ping(self.probe_timeout).await {
            return self.abort(binding, format!("replica probe failed: {}", e));
        }

        // Promotion: writable first, then detach from the dead master
        if let Err(e) = replica.client().config_set("replica-read-only", "no").await {
            return self.abort(binding, format!("could not disable read-only: {}", e));
        }
        if let Err(e) = replica.client().replicaof_no_one().await {
            return self.abort(binding, format!("REPLICAOF NO ONE failed: {}", e));
        }

        binding.swap_roles();
        binding.lower_gate();

        let duration_ms = started.elapsed().as_millis() as u64;
        {
            let mut record = self.records[shard].lock().unwrap();
            record.enter(FailoverStatus::FailedOver);
            record.promoted = true;
            record.last_duration_ms = Some(duration_ms);
        }
        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.total += 1;
            metrics.successful += 1;
            metrics.cumulative_duration_ms += duration_ms;
        }

        self.events.record(
            EventKind::FailoverSuccess,
            shard,
            format!("{} promoted in {} ms", replica.addr(), duration_ms),
        );
        tracing::info!(shard, promoted = %replica.addr(), duration_ms, "failover complete");

        Ok(())
    }

    /// Re-integrate a recovered original primary as a replica of the
    /// promoted endpoint. Roles are not swapped back.
    pub async fn handle_primary_recovery(&self, binding: &Arc<ShardBinding>) -> Result<()> {
        let shard = binding.id();

        {
            let record = self.records[shard].lock().unwrap();
            if record.status != FailoverStatus::FailedOver || !record.promoted {
                return Ok(());
            }
        }

        // After the swap the recovered endpoint occupies the replica slot
        let recovered = binding.replica_endpoint();
        let promoted = binding.write_endpoint();

        recovered
            .client()
            .replicaof(promoted.host(), promoted.port())
            .await?;
        recovered
            .client()
            .config_set("replica-read-only", "yes")
            .await?;

        self.records[shard]
            .lock()
            .unwrap()
            .enter(FailoverStatus::Recovered);

        self.events.record(
            EventKind::PrimaryRecovered,
            shard,
            format!("{} rejoined as replica of {}", recovered.addr(), promoted.addr()),
        );
        tracing::info!(
            shard,
            recovered = %recovered.addr(),
            master = %promoted.addr(),
            "original primary re-integrated as replica"
        );

        Ok(())
    }

    /// Failure exit: record, count, emit, and lower the gate so writes do
    /// not stall behind a promotion that will never finish.
    fn abort(&self, binding: &Arc<ShardBinding>, reason: String) -> Result<()> {
        let shard = binding.id();

        binding.lower_gate();
        self.records[shard]
            .lock()
            .unwrap()
            .enter(FailoverStatus::FailoverFailed);
        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.total += 1;
            metrics.failed += 1;
        }

        self.events
            .record(EventKind::FailoverFailed, shard, reason.clone());
        tracing::error!(shard, %reason, "failover failed");

        Err(Error::FailoverFailed { shard, reason })
    }
}
