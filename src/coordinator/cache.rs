//! Cache operations composed over the ring and shard bindings
//!
//! All three operations resolve the owning shard first, then act on its
//! endpoints. Reads go primary-first to preserve read-your-writes under
//! async replication, falling back to the replica only on transport
//! errors. Writes fail fast while the shard's failover gate is raised.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::common::{Error, ReplicationMode, Result};
use crate::coordinator::binding::{Endpoint, ShardBinding};
use crate::coordinator::ring::HashRing;

/// Suggested client retry delay while a shard is mid-failover.
pub const FAILOVER_RETRY_MS: u64 = 5000;

/// Which endpoint absorbed a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteTarget {
    Primary,
    PromotedReplica,
}

/// Which endpoint served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadSource {
    Primary,
    Replica,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationStatus {
    /// At least one replica acknowledged within the window.
    Confirmed,
    /// No replica acknowledged in time. The write itself succeeded.
    Timeout,
}

/// Outcome of the replica-ack wait for a sync-mode write.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationAck {
    pub replicas: i64,
    pub status: ReplicationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetOutcome {
    pub shard: usize,
    pub shard_name: String,
    pub hash: u32,
    pub target: WriteTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationAck>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GetOutcome {
    Found {
        shard: usize,
        shard_name: String,
        value: Value,
        source: ReadSource,
        failover: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    /// Missing key is not an error.
    KeyNotFound { shard: usize, shard_name: String },
}

impl GetOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            GetOutcome::Found { value, .. } => Some(value),
            GetOutcome::KeyNotFound { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, GetOutcome::Found { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub shard: usize,
    pub shard_name: String,
    pub deleted: bool,
}

/// Routes cache operations to the owning shard's endpoints.
pub struct CacheRouter {
    ring: Arc<HashRing>,
    default_mode: ReplicationMode,
    wait_timeout_ms: u64,
}

impl CacheRouter {
    pub fn new(ring: Arc<HashRing>, default_mode: ReplicationMode, wait_timeout_ms: u64) -> Self {
        Self {
            ring,
            default_mode,
            wait_timeout_ms,
        }
    }

    /// Write a value, optionally with a TTL, optionally waiting for one
    /// replica ack (`sync` mode). Fails fast with `NodeInFailover` while
    /// the shard is mid-promotion.
    pub async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl_secs: Option<u64>,
        mode: Option<ReplicationMode>,
    ) -> Result<SetOutcome> {
        let mode = mode.unwrap_or(self.default_mode);
        let (hash, binding) = self.ring.lookup(key)?;

        if binding.gate_raised() {
            return Err(Error::NodeInFailover {
                shard: binding.id(),
                retry_after_ms: FAILOVER_RETRY_MS,
            });
        }

        let started = Instant::now();
        let endpoint = binding.write_endpoint();
        let payload = encode_value(value);

        match ttl_secs {
            Some(ttl) => endpoint.client().set_ex(key, ttl, &payload).await?,
            None => endpoint.client().set(key, &payload).await?,
        }

        let replication = match mode {
            ReplicationMode::Async => None,
            ReplicationMode::Sync => Some(self.await_replica_ack(&binding, &endpoint).await),
        };

        Ok(SetOutcome {
            shard: binding.id(),
            shard_name: binding.name().to_string(),
            hash,
            target: write_target(&binding),
            replication,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Read a value. Primary first; on transport error, the replica slot
    /// is tried before giving up with `NodeUnavailable`.
    pub async fn get(&self, key: &str) -> Result<GetOutcome> {
        let (_, binding) = self.ring.lookup(key)?;
        let primary = binding.write_endpoint();

        let primary_err = match primary.client().get(key).await {
            Ok(Some(raw)) => {
                return Ok(found(&binding, raw, ReadSource::Primary, false, None));
            }
            Ok(None) => return Ok(key_not_found(&binding)),
            Err(e) => e,
        };

        tracing::warn!(
            shard = binding.id(),
            endpoint = %primary.addr(),
            error = %primary_err,
            "primary read failed, trying replica"
        );

        let replica = binding.replica_endpoint();
        match replica.client().get(key).await {
            Ok(Some(raw)) => Ok(found(
                &binding,
                raw,
                ReadSource::Replica,
                true,
                Some("Primary unavailable, reading from replica".to_string()),
            )),
            Ok(None) => Ok(key_not_found(&binding)),
            Err(replica_err) => Err(Error::NodeUnavailable {
                shard: binding.id(),
                detail: format!("primary: {}; replica: {}", primary_err, replica_err),
            }),
        }
    }

    /// Remove a key. Gated like `set` during failover.
    pub async fn delete(&self, key: &str) -> Result<DeleteOutcome> {
        let (_, binding) = self.ring.lookup(key)?;

        if binding.gate_raised() {
            return Err(Error::NodeInFailover {
                shard: binding.id(),
                retry_after_ms: FAILOVER_RETRY_MS,
            });
        }

        let removed = binding.write_endpoint().client().del(key).await?;

        Ok(DeleteOutcome {
            shard: binding.id(),
            shard_name: binding.name().to_string(),
            deleted: removed == 1,
        })
    }

    /// WAIT runs on the very endpoint the write was issued on, and
    /// therefore on the same serialized connection, even if a role swap
    /// lands between the write and the wait. A wait that errors or returns
    /// no acks is a timeout outcome, not an operation failure.
    async fn await_replica_ack(
        &self,
        binding: &Arc<ShardBinding>,
        endpoint: &Endpoint,
    ) -> ReplicationAck {
        match endpoint.client().wait(1, self.wait_timeout_ms).await {
            Ok(replicas) if replicas >= 1 => ReplicationAck {
                replicas,
                status: ReplicationStatus::Confirmed,
            },
            Ok(replicas) => ReplicationAck {
                replicas,
                status: ReplicationStatus::Timeout,
            },
            Err(e) => {
                tracing::warn!(
                    shard = binding.id(),
                    endpoint = %endpoint.addr(),
                    error = %e,
                    "replica-ack wait failed"
                );
                ReplicationAck {
                    replicas: 0,
                    status: ReplicationStatus::Timeout,
                }
            }
        }
    }
}

/// Strings are stored raw; anything structured is stored as JSON text.
fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stored text parses back as JSON when possible, else stays a raw string.
fn decode_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn write_target(binding: &Arc<ShardBinding>) -> WriteTarget {
    if binding.promoted() {
        WriteTarget::PromotedReplica
    } else {
        WriteTarget::Primary
    }
}

fn found(
    binding: &Arc<ShardBinding>,
    raw: String,
    source: ReadSource,
    failover: bool,
    warning: Option<String>,
) -> GetOutcome {
    GetOutcome::Found {
        shard: binding.id(),
        shard_name: binding.name().to_string(),
        value: decode_value(raw),
        source,
        failover,
        warning,
    }
}

fn key_not_found(binding: &Arc<ShardBinding>) -> GetOutcome {
    GetOutcome::KeyNotFound {
        shard: binding.id(),
        shard_name: binding.name().to_string(),
    }
}
