//! Per-shard endpoint bindings
//!
//! A shard is a pair of endpoints bound by role pointers. The pair is fixed
//! at construction; failover swaps which endpoint acts as primary. Callers
//! resolve the current role through the accessors on every operation and
//! never cache an endpoint across suspension points.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::common::{parse_host_port, Result};
use crate::coordinator::client::ShardClient;

/// Role an endpoint was given at startup. Identity, not current duty:
/// it never changes, even after the role pointers swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginalRole {
    Primary,
    Replica,
}

/// One storage-shard address plus its connection.
pub struct Endpoint {
    host: String,
    port: u16,
    original_role: OriginalRole,
    client: ShardClient,
}

impl Endpoint {
    pub fn new(addr: &str, original_role: OriginalRole, command_timeout: Duration) -> Result<Self> {
        let (host, port) = parse_host_port(addr)?;
        Ok(Self {
            client: ShardClient::new(format!("{}:{}", host, port), command_timeout),
            host,
            port,
            original_role,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn original_role(&self) -> OriginalRole {
        self.original_role
    }

    pub fn client(&self) -> &ShardClient {
        &self.client
    }
}

/// The two sides of a binding, indexed by original role.
const ORIGINAL_PRIMARY: usize = 0;
const ORIGINAL_REPLICA: usize = 1;

/// One logical shard: two endpoints and the swappable role pointers.
pub struct ShardBinding {
    id: usize,
    name: String,
    endpoints: [Arc<Endpoint>; 2],
    /// Index of the endpoint currently acting as primary.
    primary_idx: AtomicUsize,
    /// Raised for the duration of a failover; writes fail fast while up.
    failover_gate: AtomicBool,
}

impl ShardBinding {
    pub fn new(
        id: usize,
        primary_addr: &str,
        replica_addr: &str,
        command_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            id,
            name: format!("cache_node_{}", id),
            endpoints: [
                Arc::new(Endpoint::new(
                    primary_addr,
                    OriginalRole::Primary,
                    command_timeout,
                )?),
                Arc::new(Endpoint::new(
                    replica_addr,
                    OriginalRole::Replica,
                    command_timeout,
                )?),
            ],
            primary_idx: AtomicUsize::new(ORIGINAL_PRIMARY),
            failover_gate: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint currently acting as primary. After failover this is the
    /// promoted replica; transparent to callers.
    pub fn write_endpoint(&self) -> Arc<Endpoint> {
        self.endpoints[self.primary_idx.load(Ordering::Acquire)].clone()
    }

    /// Endpoint for steady-state reads; same as the write side.
    pub fn read_endpoint(&self) -> Arc<Endpoint> {
        self.write_endpoint()
    }

    /// Endpoint currently occupying the replica slot.
    pub fn replica_endpoint(&self) -> Arc<Endpoint> {
        self.endpoints[1 - self.primary_idx.load(Ordering::Acquire)].clone()
    }

    /// The endpoint that was primary at construction, regardless of any
    /// swaps since. Recovery detection probes this one.
    pub fn original_primary(&self) -> Arc<Endpoint> {
        self.endpoints[ORIGINAL_PRIMARY].clone()
    }

    pub fn original_replica(&self) -> Arc<Endpoint> {
        self.endpoints[ORIGINAL_REPLICA].clone()
    }

    /// Has the original replica been promoted to primary?
    pub fn promoted(&self) -> bool {
        self.primary_idx.load(Ordering::Acquire) == ORIGINAL_REPLICA
    }

    /// Atomically exchange the primary and replica pointers. Only the
    /// failover manager calls this, with the gate raised.
    pub fn swap_roles(&self) {
        self.primary_idx.fetch_xor(1, Ordering::AcqRel);
    }

    pub fn raise_gate(&self) {
        self.failover_gate.store(true, Ordering::Release);
    }

    pub fn lower_gate(&self) {
        self.failover_gate.store(false, Ordering::Release);
    }

    pub fn gate_raised(&self) -> bool {
        self.failover_gate.load(Ordering::Acquire)
    }

    /// Both endpoints, for connection teardown.
    pub fn endpoints(&self) -> &[Arc<Endpoint>; 2] {
        &self.endpoints
    }
}
