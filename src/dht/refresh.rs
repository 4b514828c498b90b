use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::dispatcher::Dispatcher;
use super::lookup::LookupKind;
use super::node::Node;

/// Background maintenance of the routing table.
///
/// Two independent loops share one task: the bucket refresh repopulates
/// regions of the identifier space nobody has talked to lately, and the
/// liveness sweep pings peers that have gone quiet so failing ones become
/// eviction candidates. A long refresh pass never holds up the sweep.
pub struct RefreshScheduler {
    dispatcher: Arc<Dispatcher>,
}

impl RefreshScheduler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn run(self) {
        tokio::join!(self.refresh_loop(), self.liveness_loop());
        debug!("Refresh scheduler stopped");
    }

    async fn refresh_loop(&self) {
        let period = self.dispatcher.config().refresh_interval;
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let cancel = self.dispatcher.cancellation();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.refresh_buckets().await;
                }
            }
        }
    }

    async fn liveness_loop(&self) {
        let period = self.dispatcher.config().liveness_interval;
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let cancel = self.dispatcher.cancellation();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.check_liveness().await;
                }
            }
        }
    }

    /// Looks up a random id in every bucket idle for longer than the refresh
    /// interval. Returns how many buckets were refreshed.
    pub async fn refresh_buckets(&self) -> usize {
        let config = self.dispatcher.config();
        let our_id = *self.dispatcher.our_id();
        let stale = self
            .dispatcher
            .routing_table()
            .buckets_needing_refresh(config.refresh_interval);

        if stale.is_empty() {
            return 0;
        }

        debug!("Refreshing {} idle DHT buckets", stale.len());

        let mut refreshed = 0;
        for bucket_idx in stale {
            if self.dispatcher.cancellation().is_cancelled() {
                break;
            }
            let target = our_id.random_in_bucket(bucket_idx);
            self.dispatcher.lookup(target, LookupKind::FindNode).await;
            refreshed += 1;
        }

        refreshed
    }

    /// Pings every peer not heard from within the node timeout. Returns how
    /// many answered.
    pub async fn check_liveness(&self) -> usize {
        let config = self.dispatcher.config();
        let stale = self
            .dispatcher
            .routing_table()
            .stale_nodes(config.node_timeout);

        if stale.is_empty() {
            return 0;
        }

        let probed = stale.len();
        let alive = stream::iter(stale)
            .map(|node| self.probe(node))
            .buffer_unordered(config.alpha)
            .filter(|alive| futures::future::ready(*alive))
            .count()
            .await;

        debug!("Liveness sweep: {}/{} stale peers answered", alive, probed);
        alive
    }

    async fn probe(&self, node: Node) -> bool {
        match self.dispatcher.ping(node.contact()).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Stale peer {} at {} did not answer: {}", node.id, node.addr, e);
                false
            }
        }
    }
}
