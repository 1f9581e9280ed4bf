use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use crc::{Crc, CRC_32_ISO_HDLC};
use md5::{Digest, Md5};

use super::{Distributor, KeyHasher, DEFAULT_WEIGHT};
use crate::error::{Error, Result};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// How a ring places virtual points and resolves lookups that fall between
/// them.
pub trait RingAlgorithm {
    /// Base number of replicas per node at equal weight.
    const DEFAULT_REPLICAS: usize;

    /// Number of placement rounds for a node holding `ratio` of the total
    /// weight.
    fn replicas(ratio: f64, node_count: usize, base: usize) -> usize;

    /// Insert the points of placement round `index` for the node whose
    /// identity is `identity`.
    fn place(identity: &str, index: usize, node: usize, points: &mut BTreeMap<u32, usize>);

    fn hash(value: &[u8]) -> u32;

    /// Position to use when `hash` is not exactly on a point. `below` is the
    /// number of points strictly smaller than `hash`.
    fn wrap(below: usize, len: usize) -> usize;
}

/// CRC32 points `crc32("<identity>:<i>")`, misses resolved to the nearest
/// lower point.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32;

impl RingAlgorithm for Crc32 {
    const DEFAULT_REPLICAS: usize = 128;

    fn replicas(ratio: f64, node_count: usize, base: usize) -> usize {
        (ratio * node_count as f64 * base as f64).round() as usize
    }

    fn place(identity: &str, index: usize, node: usize, points: &mut BTreeMap<u32, usize>) {
        let point = CRC32.checksum(format!("{identity}:{index}").as_bytes());
        points.insert(point, node);
    }

    fn hash(value: &[u8]) -> u32 {
        CRC32.checksum(value)
    }

    fn wrap(below: usize, len: usize) -> usize {
        if below > 0 {
            below - 1
        } else {
            len - 1
        }
    }
}

/// MD5 points, four little-endian words per `md5("<identity>-<i>")`,
/// misses resolved to the nearest higher point.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ketama;

impl RingAlgorithm for Ketama {
    const DEFAULT_REPLICAS: usize = 160;

    fn replicas(ratio: f64, node_count: usize, base: usize) -> usize {
        (ratio * node_count as f64 * (base as f64 / 4.0)).floor() as usize
    }

    fn place(identity: &str, index: usize, node: usize, points: &mut BTreeMap<u32, usize>) {
        let digest = Md5::digest(format!("{identity}-{index}").as_bytes());
        for word in digest.chunks_exact(4) {
            let point = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            points.insert(point, node);
        }
    }

    fn hash(value: &[u8]) -> u32 {
        let digest = Md5::digest(value);
        u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    fn wrap(below: usize, len: usize) -> usize {
        if below < len {
            below
        } else {
            0
        }
    }
}

/// CRC32 consistent-hash ring.
pub type HashRing<T> = Ring<T, Crc32>;

/// MD5 (ketama) consistent-hash ring.
pub type KetamaRing<T> = Ring<T, Ketama>;

/// A weighted consistent-hash ring.
///
/// The sorted point table is derived from the node list on first lookup and
/// thrown away whenever the node list changes.
pub struct Ring<T, A> {
    nodes: Vec<(T, u32)>,
    replicas: usize,
    points: OnceCell<Vec<(u32, usize)>>,
    _algorithm: PhantomData<A>,
}

impl<T: fmt::Display, A: RingAlgorithm> Ring<T, A> {
    pub fn new() -> Self {
        Self::with_replicas(A::DEFAULT_REPLICAS)
    }

    pub fn with_replicas(replicas: usize) -> Self {
        Self {
            nodes: Vec::new(),
            replicas,
            points: OnceCell::new(),
            _algorithm: PhantomData,
        }
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Nodes in insertion order, with their effective weights.
    pub fn nodes(&self) -> impl Iterator<Item = (&T, u32)> {
        self.nodes.iter().map(|(node, weight)| (node, *weight))
    }

    /// Number of virtual points currently on the ring.
    pub fn point_count(&self) -> usize {
        self.points().len()
    }

    fn points(&self) -> &[(u32, usize)] {
        self.points.get_or_init(|| self.build())
    }

    fn build(&self) -> Vec<(u32, usize)> {
        let total: u64 = self.nodes.iter().map(|(_, w)| *w as u64).sum();
        let count = self.nodes.len();
        let mut points = BTreeMap::new();

        for (idx, (node, weight)) in self.nodes.iter().enumerate() {
            let ratio = *weight as f64 / total as f64;
            let identity = node.to_string();
            for i in 0..A::replicas(ratio, count, self.replicas) {
                A::place(&identity, i, idx, &mut points);
            }
        }

        tracing::debug!(nodes = count, points = points.len(), "hash ring rebuilt");
        points.into_iter().collect()
    }

    fn invalidate(&mut self) {
        self.points = OnceCell::new();
    }
}

impl<T: fmt::Display, A: RingAlgorithm> Default for Ring<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, A> fmt::Debug for Ring<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("nodes", &self.nodes)
            .field("replicas", &self.replicas)
            .finish()
    }
}

impl<T: fmt::Display, A: RingAlgorithm> KeyHasher for Ring<T, A> {
    fn hash(&self, value: &[u8]) -> u32 {
        A::hash(value)
    }
}

impl<T: fmt::Display, A: RingAlgorithm> Distributor<T> for Ring<T, A> {
    fn add(&mut self, node: T, weight: Option<u32>) {
        let weight = match weight {
            Some(w) if w > 0 => w,
            _ => DEFAULT_WEIGHT,
        };
        self.nodes.push((node, weight));
        self.invalidate();
    }

    fn remove(&mut self, node: &T) -> bool {
        let identity = node.to_string();
        let before = self.nodes.len();
        self.nodes.retain(|(n, _)| n.to_string() != identity);
        let removed = self.nodes.len() != before;
        if removed {
            self.invalidate();
        }
        removed
    }

    fn get_by_hash(&self, hash: u32) -> Result<&T> {
        let points = self.points();
        if points.is_empty() {
            return Err(Error::Distributor(
                "cannot look up a key on an empty ring".into(),
            ));
        }

        let slot = match points.binary_search_by_key(&hash, |(point, _)| *point) {
            Ok(exact) => exact,
            Err(below) => A::wrap(below, points.len()),
        };
        Ok(&self.nodes[points[slot].1].0)
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
