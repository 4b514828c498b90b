use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::node::{Node, NodeId};

/// What [`KBucket::try_add`] did with a record.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// New peer, bucket had room.
    Inserted,
    /// Known peer, stored record replaced by the fresher one.
    Updated,
    /// New peer admitted by evicting a failing member.
    Evicted(Node),
    /// Older information for a known peer, or a full bucket of healthy peers.
    Rejected,
}

impl InsertOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, InsertOutcome::Rejected)
    }
}

#[derive(Debug)]
struct BucketInner {
    nodes: Vec<Node>,
    last_activity: Instant,
}

impl BucketInner {
    fn record_activity(&mut self, at: Instant) {
        self.last_activity = self.last_activity.max(at);
    }
}

/// A bounded set of peer records sharing one bucket index.
///
/// Every bucket owns its own reader-writer lock; snapshots take the shared
/// side, mutations the exclusive side.
#[derive(Debug)]
pub struct KBucket {
    capacity: usize,
    inner: RwLock<BucketInner>,
}

impl KBucket {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(BucketInner {
                nodes: Vec::with_capacity(capacity),
                last_activity: Instant::now(),
            }),
        }
    }

    pub fn try_add(&self, node: Node) -> InsertOutcome {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let seen = node.last_seen;
        let healthy = node.failures == 0;

        if let Some(existing) = inner.nodes.iter_mut().find(|n| n.id == node.id) {
            if seen < existing.last_seen {
                return InsertOutcome::Rejected;
            }
            *existing = node;
            if healthy {
                inner.record_activity(seen);
            }
            return InsertOutcome::Updated;
        }

        if inner.nodes.len() < self.capacity {
            inner.nodes.push(node);
            if healthy {
                inner.record_activity(seen);
            }
            return InsertOutcome::Inserted;
        }

        // Most failures first, then the longest silence.
        let victim = inner
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.failures > 0)
            .max_by(|(_, a), (_, b)| {
                a.failures
                    .cmp(&b.failures)
                    .then_with(|| b.last_seen.cmp(&a.last_seen))
            })
            .map(|(i, _)| i);

        match victim {
            Some(pos) => {
                let evicted = inner.nodes.remove(pos);
                inner.nodes.push(node);
                if healthy {
                    inner.record_activity(seen);
                }
                InsertOutcome::Evicted(evicted)
            }
            None => InsertOutcome::Rejected,
        }
    }

    pub fn try_update<F>(&self, id: &NodeId, update: F) -> bool
    where
        F: FnOnce(&mut Node),
    {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(node) = inner.nodes.iter_mut().find(|n| &n.id == id) else {
            return false;
        };

        update(node);
        if node.failures == 0 {
            let seen = node.last_seen;
            inner.record_activity(seen);
        }
        true
    }

    /// Point-in-time copy of the bucket, in insertion order.
    pub fn nodes(&self) -> Vec<Node> {
        self.inner.read().nodes.clone()
    }

    pub fn get(&self, id: &NodeId) -> Option<Node> {
        self.inner.read().nodes.iter().find(|n| &n.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time since the last successful contact with any member.
    pub fn idle_for(&self) -> Duration {
        self.inner.read().last_activity.elapsed()
    }
}
