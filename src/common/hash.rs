//! Ring hashing for shardcache
//!
//! Keys and virtual nodes map onto a 32-bit ring position: SHA-256 of the
//! input, truncated to the first 4 bytes, read as an unsigned big-endian
//! integer.

use sha2::{Digest, Sha256};

/// Size of the hash space: positions live in `[0, 2^32)`.
pub const RING_SPACE: u64 = 1 << 32;

/// Ring position of an arbitrary string.
pub fn ring_hash(input: &str) -> u32 {
    let digest = Sha256::digest(input.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Name of a virtual node, the hash input for its ring position.
pub fn virtual_node_name(shard_name: &str, index: usize) -> String {
    format!("{}:vnode{}", shard_name, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_hash_deterministic() {
        let a = ring_hash("user:42");
        let b = ring_hash("user:42");
        assert_eq!(a, b);
    }

    #[test]
    fn test_ring_hash_spreads() {
        // Nearby inputs should not land on nearby positions
        let a = ring_hash("key-1");
        let b = ring_hash("key-2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_ring_hash_known_value() {
        // First four bytes of SHA-256("") are e3 b0 c4 42
        assert_eq!(ring_hash(""), u32::from_be_bytes([0xe3, 0xb0, 0xc4, 0x42]));
    }

    #[test]
    fn test_virtual_node_name() {
        assert_eq!(virtual_node_name("cache_node_0", 7), "cache_node_0:vnode7");
    }
}
