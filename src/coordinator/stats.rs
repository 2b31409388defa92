//! Statistics aggregation from shard `INFO` output
//!
//! Shards report statistics as semi-structured `key:value` text per
//! section. The aggregator extracts the handful of fields the coordinator
//! cares about and sums across shards. Read-only and non-critical: a shard
//! that fails to respond contributes an error entry without failing the
//! aggregate.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::coordinator::ring::HashRing;

#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub shard: usize,
    pub name: String,
    pub primary_addr: String,
    pub keys: u64,
    pub hits: u64,
    pub misses: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStats {
    pub shards: Vec<ShardStats>,
    pub total_keys: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    /// Hits over hits+misses across all responding primaries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardLag {
    pub shard: usize,
    pub name: String,
    pub primary_offset: u64,
    pub replica_offset: u64,
    /// Replication backlog in bytes, floored at zero.
    pub lag: u64,
    pub synced: bool,
    pub connected_replicas: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct StatsAggregator {
    ring: Arc<HashRing>,
}

impl StatsAggregator {
    pub fn new(ring: Arc<HashRing>) -> Self {
        Self { ring }
    }

    /// Keyspace and hit/miss counters per shard, plus cluster totals.
    pub async fn all_stats(&self) -> ClusterStats {
        let mut shards = Vec::with_capacity(self.ring.shard_count());

        for binding in self.ring.bindings() {
            let endpoint = binding.write_endpoint();
            let mut entry = ShardStats {
                shard: binding.id(),
                name: binding.name().to_string(),
                primary_addr: endpoint.addr(),
                keys: 0,
                hits: 0,
                misses: 0,
                error: None,
            };

            match fetch_sections(&endpoint, &["keyspace", "stats"]).await {
                Ok([keyspace, stats]) => {
                    entry.keys = db0_keys(&keyspace);
                    entry.hits = field(&stats, "keyspace_hits");
                    entry.misses = field(&stats, "keyspace_misses");
                }
                Err(e) => {
                    tracing::warn!(shard = binding.id(), error = %e, "stats query failed");
                    entry.error = Some(e);
                }
            }

            shards.push(entry);
        }

        let total_keys = shards.iter().map(|s| s.keys).sum();
        let total_hits: u64 = shards.iter().map(|s| s.hits).sum();
        let total_misses: u64 = shards.iter().map(|s| s.misses).sum();
        let lookups = total_hits + total_misses;

        ClusterStats {
            shards,
            total_keys,
            total_hits,
            total_misses,
            hit_rate: (lookups > 0).then(|| total_hits as f64 / lookups as f64),
        }
    }

    /// Replication offsets for each shard pair. A shard is synced when the
    /// replica has applied the primary's full backlog.
    pub async fn replication_lag(&self) -> Vec<ShardLag> {
        let mut lags = Vec::with_capacity(self.ring.shard_count());

        for binding in self.ring.bindings() {
            let primary = binding.write_endpoint();
            let replica = binding.replica_endpoint();

            let mut entry = ShardLag {
                shard: binding.id(),
                name: binding.name().to_string(),
                primary_offset: 0,
                replica_offset: 0,
                lag: 0,
                synced: false,
                connected_replicas: 0,
                error: None,
            };

            let primary_info = primary.client().info("replication").await;
            let replica_info = replica.client().info("replication").await;

            match (primary_info, replica_info) {
                (Ok(p), Ok(r)) => {
                    let p = parse_info(&p);
                    let r = parse_info(&r);
                    entry.primary_offset = field(&p, "master_repl_offset");
                    entry.replica_offset = field(&r, "master_repl_offset");
                    entry.connected_replicas = field(&p, "connected_slaves");
                    entry.lag = entry.primary_offset.saturating_sub(entry.replica_offset);
                    entry.synced = entry.lag == 0;
                }
                (p, r) => {
                    let detail = [("primary", p.err()), ("replica", r.err())]
                        .into_iter()
                        .filter_map(|(side, e)| e.map(|e| format!("{}: {}", side, e)))
                        .collect::<Vec<_>>()
                        .join("; ");
                    tracing::warn!(shard = binding.id(), error = %detail, "replication-lag query failed");
                    entry.error = Some(detail);
                }
            }

            lags.push(entry);
        }

        lags
    }
}

async fn fetch_sections(
    endpoint: &crate::coordinator::binding::Endpoint,
    sections: &[&str; 2],
) -> std::result::Result<[HashMap<String, String>; 2], String> {
    let mut out = [HashMap::new(), HashMap::new()];
    for (slot, &section) in out.iter_mut().zip(sections.iter()) {
        let text = endpoint
            .client()
            .info(section)
            .await
            .map_err(|e| e.to_string())?;
        *slot = parse_info(&text);
    }
    Ok(out)
}

/// Parse an `INFO` section into a key/value map. Comment lines and lines
/// without a separator are ignored.
fn parse_info(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            line.split_once(':')
                .map(|(k, v)| (k.to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Numeric field from a parsed section, 0 when absent or malformed.
fn field(info: &HashMap<String, String>, key: &str) -> u64 {
    info.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Key count from the `keyspace` section: `db0:keys=<n>,expires=...`.
fn db0_keys(info: &HashMap<String, String>) -> u64 {
    info.get("db0")
        .and_then(|v| {
            v.split(',')
                .find_map(|part| part.strip_prefix("keys="))
                .and_then(|n| n.parse().ok())
        })
        .unwrap_or(0)
}
