//! # shardcache
//!
//! Coordinator core for a horizontally-partitioned in-memory key/value
//! cache:
//! - Consistent-hash ring with virtual nodes for deterministic placement
//! - Primary/replica write dispatch with optional sync replication
//! - Active health monitoring with automatic failover to replicas
//! - Recovery re-integration without failback
//! - Topology, replication-lag and keyspace statistics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             Coordinator                 │
//! │  HashRing ── ShardBinding (roles)       │
//! │  HealthMonitor ──► FailoverManager      │
//! └───────────┬─────────────────────────────┘
//!             │ text protocol
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐  ┌──────▼─────┐  ┌─────▼──────┐
//! │ Shard 0    │  │ Shard 1    │  │ Shard 2    │
//! │ primary +  │  │ primary +  │  │ primary +  │
//! │ replica    │  │ replica    │  │ replica    │
//! └────────────┘  └────────────┘  └────────────┘
//! ```
//!
//! The coordinator is stateless: ring geometry and shard bindings are
//! rebuilt from configuration at startup, and health and failover records
//! live only in memory. Failover swaps the role pointers inside a shard
//! binding; ring positions never change.
//!
//! ## Usage
//!
//! ```bash
//! shardcache-coord serve \
//!   --primaries 10.0.0.1:6379,10.0.0.2:6379,10.0.0.3:6379 \
//!   --replicas 10.0.1.1:6379,10.0.1.2:6379,10.0.1.3:6379
//! ```

pub mod common;
pub mod coordinator;

// Re-export commonly used types
pub use common::{CoordinatorConfig, Error, ReplicationMode, Result};
pub use coordinator::Coordinator;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
