//! Configuration for the shardcache coordinator

use serde::{Deserialize, Serialize};

/// Replication mode for writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// Fire-and-forget: the write returns once the primary has applied it
    Async,
    /// Wait for at least one replica ack (bounded by the wait timeout)
    Sync,
}

impl Default for ReplicationMode {
    fn default() -> Self {
        ReplicationMode::Async
    }
}

impl std::fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationMode::Async => write!(f, "async"),
            ReplicationMode::Sync => write!(f, "sync"),
        }
    }
}

impl std::str::FromStr for ReplicationMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "async" => Ok(ReplicationMode::Async),
            "sync" => Ok(ReplicationMode::Sync),
            other => Err(crate::Error::InvalidConfig(format!(
                "unknown replication mode: {}",
                other
            ))),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Primary shard endpoints (`host:port`), one per shard
    pub primaries: Vec<String>,

    /// Replica endpoints, same cardinality and order as `primaries`
    pub replicas: Vec<String>,

    /// Virtual nodes per shard
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,

    /// Default replication mode for writes
    #[serde(default)]
    pub default_mode: ReplicationMode,

    /// Health-check period (ms)
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,

    /// Per-probe deadline (ms)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Consecutive probe failures before a shard is declared FAILED
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Per-command deadline for data operations (ms)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// WAIT deadline for sync-mode writes (ms)
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_ms: u64,

    /// Grace window for draining in-flight work at shutdown (ms)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

fn default_virtual_nodes() -> usize {
    150
}
fn default_check_interval() -> u64 {
    5000
}
fn default_probe_timeout() -> u64 {
    3000
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_command_timeout() -> u64 {
    5000
}
fn default_wait_timeout() -> u64 {
    1000
}
fn default_shutdown_grace() -> u64 {
    10_000
}

impl CoordinatorConfig {
    /// Build a config from comma-separated `host:port` lists, defaults elsewhere.
    pub fn from_endpoint_lists(primaries: &str, replicas: &str) -> crate::Result<Self> {
        let config = Self {
            primaries: split_endpoints(primaries),
            replicas: split_endpoints(replicas),
            virtual_nodes: default_virtual_nodes(),
            default_mode: ReplicationMode::default(),
            check_interval_ms: default_check_interval(),
            probe_timeout_ms: default_probe_timeout(),
            failure_threshold: default_failure_threshold(),
            command_timeout_ms: default_command_timeout(),
            wait_timeout_ms: default_wait_timeout(),
            shutdown_grace_ms: default_shutdown_grace(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CoordinatorConfig = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.primaries.len()
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.primaries.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "at least one primary endpoint is required".into(),
            ));
        }

        if self.primaries.len() != self.replicas.len() {
            return Err(crate::Error::InvalidConfig(format!(
                "primary/replica count mismatch: {} primaries, {} replicas",
                self.primaries.len(),
                self.replicas.len()
            )));
        }

        for addr in self.primaries.iter().chain(self.replicas.iter()) {
            parse_host_port(addr)?;
        }

        if self.virtual_nodes == 0 {
            return Err(crate::Error::InvalidConfig(
                "virtual_nodes must be at least 1".into(),
            ));
        }

        if self.failure_threshold == 0 {
            return Err(crate::Error::InvalidConfig(
                "failure_threshold must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Split a comma-separated endpoint list, dropping empty entries.
pub fn split_endpoints(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `host:port` into its parts.
pub fn parse_host_port(addr: &str) -> crate::Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| crate::Error::InvalidConfig(format!("malformed endpoint: {}", addr)))?;

    if host.is_empty() {
        return Err(crate::Error::InvalidConfig(format!(
            "malformed endpoint: {}",
            addr
        )));
    }

    let port: u16 = port
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid port in endpoint: {}", addr)))?;

    Ok((host.to_string(), port))
}
