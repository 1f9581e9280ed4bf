//! Consistent-hash distribution of keys over a set of nodes.
//!
//! Two ring flavors are provided: [`HashRing`] (CRC32 virtual points) and
//! [`KetamaRing`] (MD5 points, compatible with libketama clients). Both are
//! instances of the generic [`Ring`].

mod ring;

pub use ring::{Crc32, HashRing, Ketama, KetamaRing, Ring, RingAlgorithm};

use crate::error::Result;

/// Weight used for nodes added without one (or with zero).
pub const DEFAULT_WEIGHT: u32 = 100;

/// Maps arbitrary key bytes onto the 32-bit hash space of a ring.
pub trait KeyHasher {
    fn hash(&self, value: &[u8]) -> u32;
}

/// A weighted set of nodes that keys can be distributed over.
///
/// Node identity is the node's `Display` text: two nodes that print the
/// same are the same node as far as the ring is concerned.
pub trait Distributor<T>: KeyHasher {
    /// Add a node. `None` or `Some(0)` means [`DEFAULT_WEIGHT`].
    fn add(&mut self, node: T, weight: Option<u32>);

    /// Remove every node with the same identity as `node`. Returns whether
    /// anything was removed.
    fn remove(&mut self, node: &T) -> bool;

    /// Node owning the given hash.
    fn get_by_hash(&self, hash: u32) -> Result<&T>;

    /// Node owning the given key.
    fn get(&self, value: &[u8]) -> Result<&T> {
        self.get_by_hash(self.hash(value))
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which ring flavor a cluster distributes keys with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RingStrategy {
    /// CRC32 points ([`HashRing`]).
    #[default]
    Crc32,
    /// MD5 points ([`KetamaRing`]).
    Ketama,
}

impl RingStrategy {
    /// Build an empty distributor of this flavor. `replicas` overrides the
    /// flavor's default number of base replicas.
    pub fn build<T>(self, replicas: Option<usize>) -> Box<dyn Distributor<T> + Send>
    where
        T: std::fmt::Display + Send + 'static,
    {
        match (self, replicas) {
            (Self::Crc32, Some(n)) => Box::new(HashRing::<T>::with_replicas(n)),
            (Self::Crc32, None) => Box::new(HashRing::<T>::new()),
            (Self::Ketama, Some(n)) => Box::new(KetamaRing::<T>::with_replicas(n)),
            (Self::Ketama, None) => Box::new(KetamaRing::<T>::new()),
        }
    }
}

/// Extract the hash tag from a key.
///
/// If the key contains `{...}` with at least one character between the first `{`
/// and the first subsequent `}`, the content between them is the hash tag.
/// Otherwise, the entire key is used.
///
/// Returns the portion of the key that should be hashed.
pub fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = memchr::memchr(b'{', key) {
        if let Some(close_offset) = memchr::memchr(b'}', &key[open + 1..]) {
            if close_offset > 0 {
                return &key[open + 1..open + 1 + close_offset];
            }
        }
    }
    key
}

// ── Tests ──────────────────────────────────────────────────────────
