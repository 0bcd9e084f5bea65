//! Consistent-hash ring with virtual nodes.
//!
//! Each real node occupies `replicas` positions on a 32-bit ring,
//! derived by hashing `"{node}_{i}"`. A key is owned by the node at the
//! smallest ring position >= the key's hash, wrapping past the maximum
//! back to the origin. Adding or removing one node therefore remaps only
//! a bounded fraction of keys, which is what makes the ring safe to
//! rebuild on every membership change.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Pluggable ring hash. Default is a standard 32-bit checksum.
pub type RingHashFn = fn(&[u8]) -> u32;

/// Default hash: crc32 over the raw key bytes.
pub fn crc32_ring_hash(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[derive(Default)]
struct RingState {
    /// Sorted virtual-node positions.
    hashes: Vec<u32>,
    /// Virtual-node position -> owning node id.
    owners: HashMap<u32, String>,
}

pub struct HashRing {
    replicas: usize,
    hash_fn: RingHashFn,
    state: RwLock<RingState>,
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self::with_hash_fn(replicas, crc32_ring_hash)
    }

    pub fn with_hash_fn(
        replicas: usize,
        hash_fn: RingHashFn,
    ) -> Self {
        assert!(replicas > 0, "replicas must be greater than zero");
        Self {
            replicas,
            hash_fn,
            state: RwLock::new(RingState::default()),
        }
    }

    /// Insert every virtual node of `nodes`, re-sorting once per batch.
    ///
    /// Re-adding an already present node is a no-op per virtual-node
    /// slot; an empty slice is a no-op.
    pub fn add<S: AsRef<str>>(
        &self,
        nodes: &[S],
    ) {
        if nodes.is_empty() {
            return;
        }

        let mut guard = self.state.write();
        let state = &mut *guard;
        for node in nodes {
            let node = node.as_ref();
            for replica in 0..self.replicas {
                let position = self.virtual_hash(node, replica);
                if let std::collections::hash_map::Entry::Vacant(entry) =
                    state.owners.entry(position)
                {
                    entry.insert(node.to_string());
                    state.hashes.push(position);
                }
            }
        }
        state.hashes.sort_unstable();
    }

    /// Remove every virtual node of `nodes` from both structures.
    pub fn remove<S: AsRef<str>>(
        &self,
        nodes: &[S],
    ) {
        if nodes.is_empty() {
            return;
        }

        let mut state = self.state.write();
        for node in nodes {
            let node = node.as_ref();
            for replica in 0..self.replicas {
                let position = self.virtual_hash(node, replica);
                // On position collision another node may own this slot.
                if state.owners.get(&position).map(String::as_str) == Some(node) {
                    state.owners.remove(&position);
                    if let Ok(index) = state.hashes.binary_search(&position) {
                        state.hashes.remove(index);
                    }
                }
            }
        }
    }

    /// Reset to the empty state.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.hashes.clear();
        state.owners.clear();
    }

    /// Resolve the node owning `key`, or `None` when the ring is empty.
    pub fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        let state = self.state.read();
        if state.hashes.is_empty() {
            return None;
        }

        let hash = (self.hash_fn)(key.as_bytes());
        let index = match state.hashes.binary_search(&hash) {
            Ok(index) => index,
            // Past the maximum position: wrap to the origin.
            Err(index) if index == state.hashes.len() => 0,
            Err(index) => index,
        };

        state.owners.get(&state.hashes[index]).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().hashes.is_empty()
    }

    /// Number of virtual nodes currently on the ring.
    pub fn len(&self) -> usize {
        self.state.read().hashes.len()
    }

    fn virtual_hash(
        &self,
        node: &str,
        replica: usize,
    ) -> u32 {
        (self.hash_fn)(format!("{}_{}", node, replica).as_bytes())
    }
}
