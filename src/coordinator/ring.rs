//! Consistent-hash ring with virtual nodes
//!
//! Each shard owns a fixed number of positions on the 32-bit ring. The ring
//! is immutable after construction: failover swaps role pointers inside the
//! shard bindings, never ring geometry. The sorted position list is
//! read-only on the hot path, so lookups need no synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::common::{ring_hash, virtual_node_name, Result, RING_SPACE};
use crate::coordinator::binding::ShardBinding;

pub struct HashRing {
    /// Virtual-node positions, sorted ascending.
    positions: Vec<u32>,
    /// Position → owning shard id.
    owners: HashMap<u32, usize>,
    bindings: Vec<Arc<ShardBinding>>,
}

/// Aggregated arc ownership for one shard, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct ShardArcs {
    pub shard: usize,
    pub name: String,
    pub virtual_nodes: usize,
    /// Hash-space units owned across all arcs.
    pub owned: u64,
    /// Share of the ring, in percent.
    pub percent: f64,
}

impl HashRing {
    /// Build the ring: `virtual_nodes` positions per shard, derived from the
    /// shard name. Position collisions are resolved by probing the next slot.
    pub fn new(bindings: Vec<Arc<ShardBinding>>, virtual_nodes: usize) -> Self {
        let mut owners = HashMap::with_capacity(bindings.len() * virtual_nodes);
        let mut positions = Vec::with_capacity(bindings.len() * virtual_nodes);

        for binding in &bindings {
            for vnode in 0..virtual_nodes {
                let mut position = ring_hash(&virtual_node_name(binding.name(), vnode));
                while owners.contains_key(&position) {
                    position = position.wrapping_add(1);
                }
                owners.insert(position, binding.id());
                positions.push(position);
            }
        }

        positions.sort_unstable();

        Self {
            positions,
            owners,
            bindings,
        }
    }

    /// Resolve a key to its owning shard. Returns the key's ring position
    /// alongside the binding.
    pub fn lookup(&self, key: &str) -> Result<(u32, Arc<ShardBinding>)> {
        if self.positions.is_empty() {
            return Err(crate::Error::EmptyRing);
        }

        let hash = ring_hash(key);

        // First position at or after the key's hash, wrapping at the seam.
        // An exact hit selects that virtual node.
        let idx = self.positions.partition_point(|&pos| pos < hash);
        let position = if idx == self.positions.len() {
            self.positions[0]
        } else {
            self.positions[idx]
        };

        let shard = self.owners[&position];
        Ok((hash, self.bindings[shard].clone()))
    }

    /// Per-shard arc ownership. Each position owns the arc that ends at it;
    /// the first position's arc wraps around the seam.
    pub fn describe(&self) -> Vec<ShardArcs> {
        let mut arcs: Vec<ShardArcs> = self
            .bindings
            .iter()
            .map(|b| ShardArcs {
                shard: b.id(),
                name: b.name().to_string(),
                virtual_nodes: 0,
                owned: 0,
                percent: 0.0,
            })
            .collect();

        let n = self.positions.len();
        for (k, &position) in self.positions.iter().enumerate() {
            let previous = self.positions[(k + n - 1) % n];
            let length = if k == 0 {
                (RING_SPACE - previous as u64) + position as u64
            } else {
                (position - previous) as u64
            };

            let entry = &mut arcs[self.owners[&position]];
            entry.virtual_nodes += 1;
            entry.owned += length;
        }

        for entry in &mut arcs {
            entry.percent = entry.owned as f64 * 100.0 / RING_SPACE as f64;
        }

        arcs
    }

    pub fn shard_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn binding(&self, shard: usize) -> Result<Arc<ShardBinding>> {
        self.bindings
            .get(shard)
            .cloned()
            .ok_or(crate::Error::ShardNotFound(shard))
    }

    pub fn bindings(&self) -> &[Arc<ShardBinding>] {
        &self.bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ring(shards: usize, virtual_nodes: usize) -> HashRing {
        let bindings = (0..shards)
            .map(|i| {
                Arc::new(
                    ShardBinding::new(
                        i,
                        &format!("10.0.0.{}:6379", i + 1),
                        &format!("10.0.1.{}:6379", i + 1),
                        Duration::from_secs(5),
                    )
                    .unwrap(),
                )
            })
            .collect();
        HashRing::new(bindings, virtual_nodes)
    }

    #[test]
    fn test_position_count() {
        let ring = ring(3, 150);
        assert_eq!(ring.position_count(), 3 * 150);
    }

    #[test]
    fn test_positions_unique_and_sorted() {
        let ring = ring(5, 200);
        for pair in ring.positions.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(ring.owners.len(), ring.positions.len());
    }

    #[test]
    fn test_lookup_deterministic() {
        let a = ring(3, 150);
        let b = ring(3, 150);

        for key in ["user:1", "user:2", "session:abc", ""] {
            let (hash_a, shard_a) = a.lookup(key).unwrap();
            let (hash_b, shard_b) = b.lookup(key).unwrap();
            assert_eq!(hash_a, hash_b);
            assert_eq!(shard_a.id(), shard_b.id());
        }
    }

    #[test]
    fn test_lookup_empty_ring() {
        let ring = HashRing::new(vec![], 150);
        assert!(matches!(ring.lookup("k"), Err(crate::Error::EmptyRing)));
    }

    #[test]
    fn test_lookup_wraps_past_last_position() {
        let ring = ring(3, 150);
        let max = *ring.positions.last().unwrap();

        // Any key hashing beyond the last position must land on the
        // smallest position's owner.
        if max < u32::MAX {
            let expected = ring.owners[&ring.positions[0]];
            // Find a key that actually hashes past the last position
            for i in 0..100_000u32 {
                let key = format!("wrap-probe-{}", i);
                if ring_hash(&key) > max {
                    let (_, shard) = ring.lookup(&key).unwrap();
                    assert_eq!(shard.id(), expected);
                    return;
                }
            }
        }
        // max == u32::MAX: the seam is unreachable, nothing to check
    }

    #[test]
    fn test_lookup_exact_position_hit() {
        let ring = ring(3, 150);

        // A key whose hash equals a virtual-node position selects exactly
        // that node. vnode names themselves are such keys.
        let name = virtual_node_name("cache_node_1", 0);
        let hash = ring_hash(&name);
        if ring.owners.get(&hash) == Some(&1) {
            let (_, shard) = ring.lookup(&name).unwrap();
            assert_eq!(shard.id(), 1);
        }
    }

    #[test]
    fn test_describe_covers_whole_ring() {
        let ring = ring(4, 150);
        let arcs = ring.describe();

        assert_eq!(arcs.len(), 4);
        let total: u64 = arcs.iter().map(|a| a.owned).sum();
        assert_eq!(total, RING_SPACE);

        let percent: f64 = arcs.iter().map(|a| a.percent).sum();
        assert!((percent - 100.0).abs() < 1e-6);

        for arc in &arcs {
            assert_eq!(arc.virtual_nodes, 150);
        }
    }

    #[test]
    fn test_describe_empty_ring() {
        let ring = HashRing::new(vec![], 150);
        assert!(ring.describe().is_empty());
    }
}
