use super::config::DhtConfig;
use super::dispatcher::Dispatcher;
use super::error::DhtError;
use super::lookup::{LookupKind, LookupOutcome};
use super::message::MAX_VALUE_LEN;
use super::node::{Key, NodeId};
use super::refresh::RefreshScheduler;
use super::routing::RoutingTable;
use super::stats::StatsSnapshot;
use super::storage::ValueStore;
use super::transport::Transport;
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct NodeTasks {
    dispatcher: JoinHandle<Result<(), DhtError>>,
    refresh: JoinHandle<()>,
}

/// A running DHT node.
///
/// Construction binds the transport, generates a fresh identity and spawns
/// the receive loop and the refresh scheduler on the current Tokio runtime.
/// Both stop on [`shutdown`](Self::shutdown), when the node is dropped, or
/// when the transport fails.
///
/// # Examples
///
/// ```no_run
/// use kadnode::dht::{DhtNode, NodeId};
/// use std::net::SocketAddr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let node = DhtNode::bind(4000).await?;
///
/// // Join the network through a known peer
/// let seed: SocketAddr = "203.0.113.7:4000".parse()?;
/// node.bootstrap(&[seed]).await?;
///
/// let key = NodeId::hash(b"hello");
/// node.store(key, &b"world"[..]).await?;
///
/// let lookup = node.find_value(key).await;
/// assert_eq!(lookup.value.as_deref(), Some(&b"world"[..]));
///
/// node.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct DhtNode {
    dispatcher: Arc<Dispatcher>,
    local_addr: SocketAddr,
    tasks: Mutex<Option<NodeTasks>>,
}

impl DhtNode {
    /// Binds UDP on all interfaces at `port` with the default configuration.
    pub async fn bind(port: u16) -> Result<Self, DhtError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        Self::bind_addr(addr, DhtConfig::default()).await
    }

    pub async fn bind_addr(addr: SocketAddr, config: DhtConfig) -> Result<Self, DhtError> {
        let socket = UdpSocket::bind(addr).await?;
        Self::with_transport(Arc::new(socket), config)
    }

    /// Starts a node on an externally supplied transport.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        config: DhtConfig,
    ) -> Result<Self, DhtError> {
        config.validate()?;

        let local_addr = transport.local_addr()?;
        let our_id = NodeId::generate();
        let dispatcher = Arc::new(Dispatcher::new(transport, our_id, config));

        info!("DHT node bound to {} with id {}", local_addr, our_id);

        let receiver = dispatcher.clone();
        let dispatcher_task = tokio::spawn(async move { receiver.run().await });
        let refresh_task = tokio::spawn(RefreshScheduler::new(dispatcher.clone()).run());

        Ok(Self {
            dispatcher,
            local_addr,
            tasks: Mutex::new(Some(NodeTasks {
                dispatcher: dispatcher_task,
                refresh: refresh_task,
            })),
        })
    }

    pub fn our_id(&self) -> &NodeId {
        self.dispatcher.our_id()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &DhtConfig {
        self.dispatcher.config()
    }

    pub fn routing_table(&self) -> &RoutingTable {
        self.dispatcher.routing_table()
    }

    pub fn storage(&self) -> &ValueStore {
        self.dispatcher.storage()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.dispatcher.stats().snapshot()
    }

    pub fn pending_requests(&self) -> usize {
        self.dispatcher.pending_count()
    }

    pub fn is_running(&self) -> bool {
        !self.dispatcher.cancellation().is_cancelled()
    }

    /// Joins the network: pings every seed, then looks up our own id so the
    /// seeds' neighbours learn about us. Returns the routing table size.
    pub async fn bootstrap(&self, seeds: &[SocketAddr]) -> Result<usize, DhtError> {
        info!("Starting DHT bootstrap from {} seeds", seeds.len());

        let pings = seeds.iter().map(|addr| async move {
            match self.dispatcher.ping_addr(*addr, None).await {
                Ok(id) => {
                    debug!("Seed {} answered as {}", addr, id);
                    true
                }
                Err(e) => {
                    debug!("Seed {} did not answer: {}", addr, e);
                    false
                }
            }
        });
        let answered = join_all(pings).await.into_iter().filter(|ok| *ok).count();

        let lookup = self.find_node(*self.our_id()).await;
        if lookup.cancelled {
            return Err(DhtError::Cancelled);
        }

        let nodes = self.routing_table().node_count();
        info!(
            "DHT bootstrap complete, {}/{} seeds answered, {} nodes in routing table",
            answered,
            seeds.len(),
            nodes
        );
        Ok(nodes)
    }

    /// Pings `addr` and returns the id it answers with. A known peer at that
    /// address is charged a failure if it stays silent.
    pub async fn ping(&self, addr: SocketAddr) -> Result<NodeId, DhtError> {
        let known = self.routing_table().find_by_addr(&addr).map(|n| n.id);
        self.dispatcher.ping_addr(addr, known).await
    }

    pub async fn find_node(&self, target: NodeId) -> LookupOutcome {
        self.dispatcher.lookup(target, LookupKind::FindNode).await
    }

    /// Looks `key` up locally first, then across the network.
    pub async fn find_value(&self, key: Key) -> LookupOutcome {
        if let Some(value) = self.storage().get(&key) {
            return LookupOutcome {
                value: Some(value),
                ..LookupOutcome::default()
            };
        }

        self.dispatcher.lookup(key, LookupKind::FindValue).await
    }

    /// Stores `value` locally and on the closest peers to `key`. Returns how
    /// many peers the STORE was sent to.
    pub async fn store(&self, key: Key, value: impl Into<Bytes>) -> Result<usize, DhtError> {
        let value = value.into();
        if value.len() > MAX_VALUE_LEN {
            return Err(DhtError::ValueTooLarge(value.len()));
        }

        self.dispatcher.store_local(key, value.clone());

        let lookup = self.find_node(key).await;
        if lookup.cancelled {
            return Err(DhtError::Cancelled);
        }

        let sends = lookup
            .closest
            .iter()
            .map(|contact| self.dispatcher.store_at(*contact, key, value.clone()));

        let mut sent = 0;
        for (contact, result) in lookup.closest.iter().zip(join_all(sends).await) {
            match result {
                Ok(()) => sent += 1,
                Err(e) => debug!("Failed to send STORE to {}: {}", contact.addr, e),
            }
        }

        debug!("Stored key {} on {} peers", key, sent);
        Ok(sent)
    }

    /// Resolves once the node has stopped, by shutdown or transport failure.
    pub async fn closed(&self) {
        self.dispatcher.cancellation().cancelled().await;
    }

    /// Stops the background loops, cancels outstanding requests and waits for
    /// the loops to finish. Returns the transport error if that is what
    /// stopped the node.
    pub async fn shutdown(&self) -> Result<(), DhtError> {
        self.dispatcher.shutdown();

        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            return Ok(());
        };

        if let Err(e) = tasks.refresh.await {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }

        match tasks.dispatcher.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        }
    }
}

impl Drop for DhtNode {
    fn drop(&mut self) {
        self.dispatcher.shutdown();
    }
}
