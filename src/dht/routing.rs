use std::net::SocketAddr;
use std::time::Duration;

use super::bucket::{InsertOutcome, KBucket};
use super::node::{Node, NodeId};
use crate::constants::{K, NUM_BUCKETS};

/// The node's view of the identifier space: one [`KBucket`] per bit.
///
/// There is no table-wide lock. Every operation touches buckets one at a
/// time, so the dispatcher and the refresh loop only contend when they hit the
/// same bucket.
pub struct RoutingTable {
    our_id: NodeId,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(our_id: NodeId) -> Self {
        Self::with_bucket_size(our_id, K)
    }

    pub fn with_bucket_size(our_id: NodeId, bucket_size: usize) -> Self {
        let buckets = (0..NUM_BUCKETS)
            .map(|_| KBucket::new(bucket_size))
            .collect();

        Self { our_id, buckets }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    pub fn bucket(&self, index: usize) -> Option<&KBucket> {
        self.buckets.get(index)
    }

    pub fn insert(&self, node: Node) -> InsertOutcome {
        if node.id == self.our_id {
            return InsertOutcome::Rejected;
        }

        let bucket_idx = self.our_id.bucket_index(&node.id);
        self.buckets[bucket_idx].try_add(node)
    }

    /// Records the outcome of a contact attempt. Returns false for unknown
    /// peers.
    pub fn touch(&self, id: &NodeId, success: bool) -> bool {
        let bucket_idx = self.our_id.bucket_index(id);
        self.buckets[bucket_idx].try_update(id, |node| {
            if success {
                node.touch();
            } else {
                node.fail();
            }
        })
    }

    /// The `count` known peers closest to `target`, nearest first.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<Node> {
        if count == 0 {
            return Vec::new();
        }

        let mut nodes: Vec<Node> = Vec::new();

        for group in scan_groups(self.our_id.bucket_index(target)) {
            for idx in group {
                nodes.extend(self.buckets[idx].nodes());
            }
            if nodes.len() >= count {
                break;
            }
        }

        nodes.sort_by(|a, b| {
            a.id.distance(target)
                .cmp(&b.id.distance(target))
                .then_with(|| a.id.cmp(&b.id))
        });
        nodes.dedup_by(|a, b| a.id == b.id);
        nodes.truncate(count);
        nodes
    }

    pub fn find_node(&self, id: &NodeId) -> Option<Node> {
        let bucket_idx = self.our_id.bucket_index(id);
        self.buckets[bucket_idx].get(id)
    }

    pub fn find_by_addr(&self, addr: &SocketAddr) -> Option<Node> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.nodes())
            .find(|node| &node.addr == addr)
    }

    pub fn node_count(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        let mut nodes = Vec::new();
        for bucket in &self.buckets {
            nodes.extend(bucket.nodes());
        }
        nodes
    }

    /// Records with no contact for longer than `timeout`.
    pub fn stale_nodes(&self, timeout: Duration) -> Vec<Node> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.nodes())
            .filter(|node| node.is_stale(timeout))
            .collect()
    }

    /// Buckets that have gone `interval` without a successful contact.
    pub fn buckets_needing_refresh(&self, interval: Duration) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| bucket.idle_for() > interval)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Bucket indices grouped by distance to a target whose own bucket is
/// `nearest`.
///
/// Peers in `nearest` share the target's prefix one bit further than we do,
/// so they come first. Every peer in a deeper bucket sits at the same order of
/// magnitude (the target's bucket bit), so those buckets form one group. The
/// shallower buckets then follow one by one, each strictly farther than the
/// last. A peer in an earlier group is always closer than any peer in a later
/// one, which lets [`RoutingTable::closest`] stop after any group.
fn scan_groups(nearest: usize) -> impl Iterator<Item = Vec<usize>> {
    let deeper: Vec<usize> = (nearest + 1..NUM_BUCKETS).collect();

    std::iter::once(vec![nearest])
        .chain(std::iter::once(deeper).filter(|g| !g.is_empty()))
        .chain((0..nearest).rev().map(|idx| vec![idx]))
}
