use super::error::DhtError;
use crate::constants::{ID_LEN, NUM_BUCKETS};
use rand::Rng as _;
use sha1::{Digest, Sha1};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A 160-bit identifier naming a node or a stored key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub [u8; ID_LEN]);

/// Keys live in the same space as node ids.
pub type Key = NodeId;

impl NodeId {
    /// Generates a random id from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut id = [0u8; ID_LEN];
        rand::rng().fill(&mut id);
        Self(id)
    }

    /// SHA-1 of `data`, for deriving storage keys from content.
    pub fn hash(data: &[u8]) -> Self {
        Self(Sha1::digest(data).into())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        if bytes.len() != ID_LEN {
            return Err(DhtError::InvalidNodeId);
        }
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut dist = [0u8; ID_LEN];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        Distance(dist)
    }

    /// Index of the bucket `other` belongs to in a table owned by `self`.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        self.distance(other).bucket_index()
    }

    /// Random id whose distance to `self` falls in bucket `bucket_idx`.
    ///
    /// Keeps our prefix above the bucket bit, flips that bit and randomizes
    /// everything below it.
    pub fn random_in_bucket(&self, bucket_idx: usize) -> NodeId {
        if bucket_idx >= NUM_BUCKETS {
            return NodeId::generate();
        }

        let mut id = self.0;
        let byte_idx = bucket_idx / 8;
        let bit_idx = 7 - (bucket_idx % 8);

        id[byte_idx] ^= 1 << bit_idx;

        if bit_idx > 0 {
            let random_byte: u8 = rand::random();
            let keep_mask = !((1u8 << bit_idx) - 1);
            let random_mask = (1u8 << bit_idx) - 1;
            id[byte_idx] = (id[byte_idx] & keep_mask) | (random_byte & random_mask);
        }

        for byte in id.iter_mut().skip(byte_idx + 1) {
            *byte = rand::random();
        }

        NodeId(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// XOR distance between two identifiers.
///
/// Compares as a big-endian unsigned integer, so the derived ordering is the
/// metric's ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance(pub [u8; ID_LEN]);

impl Distance {
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Position of the highest set bit, 0 being the most significant.
    ///
    /// The zero distance (a node to itself) maps to the last bucket.
    pub fn bucket_index(&self) -> usize {
        for (i, &byte) in self.0.iter().enumerate() {
            if byte != 0 {
                let leading = byte.leading_zeros() as usize;
                return i * 8 + leading;
            }
        }

        NUM_BUCKETS - 1
    }
}

/// An id and address as exchanged on the wire.
///
/// Contacts learned from other peers are hearsay; only a [`Node`] built from
/// direct contact goes into the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Contact {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl Contact {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

/// A peer record held in a bucket.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub failures: u32,
}

impl Node {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            failures: 0,
        }
    }

    pub fn contact(&self) -> Contact {
        Contact::new(self.id, self.addr)
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.failures = 0;
    }

    pub fn fail(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    pub fn is_good(&self, timeout: Duration) -> bool {
        self.failures == 0 && !self.is_stale(timeout)
    }
}
