//! Common utilities and types shared across shardcache

pub mod config;
pub mod error;
pub mod hash;
pub mod utils;

pub use config::{parse_host_port, split_endpoints, CoordinatorConfig, ReplicationMode};
pub use error::{Error, Result};
pub use hash::{ring_hash, virtual_node_name, RING_SPACE};
pub use utils::{timestamp_now, timestamp_now_millis};
