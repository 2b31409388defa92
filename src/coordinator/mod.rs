//! Coordinator core
//!
//! The coordinator is responsible for:
//! - Key placement via a consistent-hash ring with virtual nodes
//! - Replication-mode-aware write dispatch to primaries
//! - Active health monitoring of shard endpoints
//! - Automatic failover to replicas and recovery re-integration
//! - Topology, replication-lag and distribution statistics

pub mod binding;
pub mod cache;
pub mod client;
pub mod events;
pub mod failover;
pub mod health;
pub mod ring;
pub mod server;
pub mod stats;

pub use server::Coordinator;
