use super::bucket::InsertOutcome;
use super::config::DhtConfig;
use super::error::DhtError;
use super::message::{DhtBody, DhtMessage, TransactionId, ValueReply, MAX_VALUE_LEN};
use super::node::{Contact, Key, Node, NodeId};
use super::routing::RoutingTable;
use super::stats::DhtStats;
use super::storage::ValueStore;
use super::transport::Transport;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

type Completion = Result<DhtMessage, DhtError>;

struct PendingRequest {
    addr: SocketAddr,
    issued_at: Instant,
    sender: oneshot::Sender<Completion>,
}

/// Drops a request's registry entry however its waiting future ends, so an
/// abandoned lookup round leaves nothing behind.
struct PendingGuard<'a> {
    pending: &'a DashMap<TransactionId, PendingRequest>,
    tid: TransactionId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.tid);
    }
}

/// Owns the node's state and moves datagrams in and out of it.
///
/// Inbound, [`run`](Self::run) decodes every datagram, refreshes the sender in
/// the routing table and either answers the request or hands the response to
/// whoever is waiting on its transaction id. Outbound,
/// [`request`](Self::request) registers a pending entry, transmits and waits
/// for the correlated reply or the node timeout.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    our_id: NodeId,
    config: DhtConfig,
    routing_table: RoutingTable,
    storage: ValueStore,
    pending: DashMap<TransactionId, PendingRequest>,
    stats: DhtStats,
    cancel: CancellationToken,
    failure: Mutex<Option<io::Error>>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, our_id: NodeId, config: DhtConfig) -> Self {
        Self {
            transport,
            our_id,
            routing_table: RoutingTable::with_bucket_size(our_id, config.k),
            storage: ValueStore::new(config.max_stored_values),
            pending: DashMap::new(),
            stats: DhtStats::new(),
            cancel: CancellationToken::new(),
            failure: Mutex::new(None),
            config,
        }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    pub fn config(&self) -> &DhtConfig {
        &self.config
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn storage(&self) -> &ValueStore {
        &self.storage
    }

    pub fn stats(&self) -> &DhtStats {
        &self.stats
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The receive loop. Returns `Ok` on shutdown and `Err` when the transport
    /// itself failed, on either the receive or the send side, in which case
    /// the whole node has been stopped.
    pub async fn run(&self) -> Result<(), DhtError> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];

        loop {
            let (n, addr) = tokio::select! {
                _ = self.cancel.cancelled() => return self.stopped(),
                result = self.transport.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) if is_transient(&e) => {
                        debug!("Ignoring transient receive error: {}", e);
                        continue;
                    }
                    Err(e) => {
                        error!("DHT transport failed on receive, stopping node: {}", e);
                        self.fail(e);
                        return self.stopped();
                    }
                },
            };

            self.handle_datagram(&buf[..n], addr).await;
        }
    }

    pub async fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        self.stats.record_datagram();

        match DhtMessage::parse(data) {
            Ok(msg) => self.handle_message(msg, addr).await,
            Err(e) => {
                self.stats.record_malformed();
                debug!("Failed to parse DHT message from {}: {}", addr, e);
            }
        }
    }

    async fn handle_message(&self, msg: DhtMessage, addr: SocketAddr) {
        if msg.sender_id != self.our_id {
            self.learn(Node::new(msg.sender_id, addr));
        }

        if msg.body.is_response() {
            self.complete(msg, addr);
            return;
        }

        let reply = match msg.body {
            DhtBody::Ping => DhtBody::Pong,
            DhtBody::FindNode { target } => DhtBody::FindNodeResponse {
                nodes: self.closest_contacts(&target),
            },
            DhtBody::Store { key, value } => {
                if value.len() > MAX_VALUE_LEN {
                    debug!(
                        "Dropping STORE of {} bytes from {}, too large to serve",
                        value.len(),
                        addr
                    );
                } else {
                    self.store_local(key, value);
                }
                return;
            }
            DhtBody::FindValue { key } => match self.storage.get(&key) {
                Some(value) => DhtBody::FindValueResponse(ValueReply::Found(value)),
                None => DhtBody::FindValueResponse(ValueReply::Nodes(self.closest_contacts(&key))),
            },
            _ => return,
        };

        let response = DhtMessage::new(msg.transaction_id, self.our_id, reply);
        if let Err(e) = self.send(&response, addr).await {
            debug!("Failed to reply to {}: {}", addr, e);
        }
    }

    /// Feeds a direct contact into the routing table.
    fn learn(&self, node: Node) {
        let id = node.id;
        match self.routing_table.insert(node) {
            InsertOutcome::Inserted => trace!("Added node {} to routing table", id),
            InsertOutcome::Updated => {}
            InsertOutcome::Evicted(old) => {
                self.stats.record_eviction();
                debug!(
                    "Evicted node {} ({} failures) in favour of {}",
                    old.id, old.failures, id
                );
            }
            InsertOutcome::Rejected => {
                self.stats.record_rejected();
                trace!("Bucket full, ignoring node {}", id);
            }
        }
    }

    fn complete(&self, msg: DhtMessage, addr: SocketAddr) {
        let tid = msg.transaction_id;
        let Some((_, pending)) = self.pending.remove_if(&tid, |_, p| p.addr == addr) else {
            self.stats.record_unmatched();
            trace!("Dropping unmatched {:?} from {}", msg.kind(), addr);
            return;
        };

        trace!(
            "Response {} from {} after {:?}",
            tid,
            addr,
            pending.issued_at.elapsed()
        );
        let _ = pending.sender.send(Ok(msg));
    }

    fn closest_contacts(&self, target: &NodeId) -> Vec<Contact> {
        self.routing_table
            .closest(target, self.config.k)
            .iter()
            .map(Node::contact)
            .collect()
    }

    pub fn store_local(&self, key: Key, value: Bytes) -> bool {
        let stored = self.storage.put(key, value);
        if stored {
            self.stats.record_stored();
            trace!("Stored value for key {}", key);
        } else {
            debug!("Value store full, dropping key {}", key);
        }
        stored
    }

    /// Sends `body` to `addr` and waits for the correlated response.
    ///
    /// When `peer` is known, a timeout or send failure is charged to it in the
    /// routing table. Shutdown resolves the request as [`DhtError::Cancelled`]
    /// rather than [`DhtError::Timeout`].
    pub async fn request(
        &self,
        addr: SocketAddr,
        peer: Option<NodeId>,
        body: DhtBody,
    ) -> Result<DhtMessage, DhtError> {
        if self.cancel.is_cancelled() {
            return Err(DhtError::Cancelled);
        }
        if self.pending.len() >= self.config.max_pending_requests {
            return Err(DhtError::RateLimited);
        }

        let (tx, rx) = oneshot::channel();
        let tid = self.register(addr, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            tid,
        };

        let msg = DhtMessage::new(tid, self.our_id, body);
        if let Err(e) = self.send(&msg, addr).await {
            // A dead socket is not the peer's fault
            if matches!(e, DhtError::Io(_)) && !self.cancel.is_cancelled() {
                if let Some(id) = peer {
                    self.routing_table.touch(&id, false);
                }
            }
            return Err(e);
        }

        let result = tokio::select! {
            result = timeout(self.config.node_timeout, rx) => result,
            _ = self.cancel.cancelled() => return Err(DhtError::Cancelled),
        };

        match result {
            Ok(Ok(completion)) => completion,
            Ok(Err(_)) => Err(DhtError::Cancelled),
            Err(_) => {
                self.stats.record_timeout();
                if let Some(id) = peer {
                    self.routing_table.touch(&id, false);
                }
                debug!("{:?} to {} timed out", msg.kind(), addr);
                Err(DhtError::Timeout)
            }
        }
    }

    fn register(&self, addr: SocketAddr, sender: oneshot::Sender<Completion>) -> TransactionId {
        let mut request = Some(PendingRequest {
            addr,
            issued_at: Instant::now(),
            sender,
        });

        loop {
            let tid: TransactionId = rand::random();
            if let Entry::Vacant(slot) = self.pending.entry(tid) {
                if let Some(request) = request.take() {
                    slot.insert(request);
                }
                return tid;
            }
        }
    }

    /// Fire-and-forget message with a fresh transaction id.
    pub async fn notify(&self, addr: SocketAddr, body: DhtBody) -> Result<(), DhtError> {
        let msg = DhtMessage::new(rand::random(), self.our_id, body);
        self.send(&msg, addr).await
    }

    /// Transmits one datagram. A non-transient socket error stops the node;
    /// the caller still gets a copy of it.
    async fn send(&self, msg: &DhtMessage, addr: SocketAddr) -> Result<(), DhtError> {
        let data = msg.encode()?;

        match self.transport.send_to(&data, addr).await {
            Ok(()) => Ok(()),
            Err(e) if is_transient(&e) => Err(e.into()),
            Err(e) => {
                error!("DHT transport failed on send, stopping node: {}", e);
                let copy = io::Error::new(e.kind(), e.to_string());
                self.fail(e);
                Err(copy.into())
            }
        }
    }

    /// Records the first fatal transport error and stops the node.
    fn fail(&self, e: io::Error) {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() && !self.cancel.is_cancelled() {
                *failure = Some(e);
            }
        }
        self.shutdown();
    }

    fn stopped(&self) -> Result<(), DhtError> {
        match self.failure.lock().take() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub async fn ping(&self, contact: Contact) -> Result<NodeId, DhtError> {
        self.ping_addr(contact.addr, Some(contact.id)).await
    }

    pub async fn ping_addr(
        &self,
        addr: SocketAddr,
        peer: Option<NodeId>,
    ) -> Result<NodeId, DhtError> {
        let reply = self.request(addr, peer, DhtBody::Ping).await?;
        match reply.body {
            DhtBody::Pong => Ok(reply.sender_id),
            other => Err(DhtError::InvalidMessage(format!(
                "expected pong, got {:?}",
                other.kind()
            ))),
        }
    }

    pub async fn store_at(&self, contact: Contact, key: Key, value: Bytes) -> Result<(), DhtError> {
        self.notify(contact.addr, DhtBody::Store { key, value }).await
    }

    /// Stops the background loops and resolves every outstanding request as
    /// cancelled.
    pub fn shutdown(&self) {
        self.cancel.cancel();

        let tids: Vec<TransactionId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for tid in tids {
            if let Some((_, pending)) = self.pending.remove(&tid) {
                let _ = pending.sender.send(Err(DhtError::Cancelled));
            }
        }
    }
}

/// Errors some platforms report on a UDP socket for ICMP feedback about a
/// single peer.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
