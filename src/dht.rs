//! Kademlia distributed hash table node.
//!
//! A [`DhtNode`] keeps a [`RoutingTable`] of peers bucketed by XOR distance,
//! answers PING / FIND_NODE / STORE / FIND_VALUE over UDP, runs iterative
//! parallel lookups and keeps its buckets fresh in the background.
//!
//! # Layout
//!
//! - [`node`](NodeId) - identifiers, the XOR metric and peer records
//! - [`KBucket`] / [`RoutingTable`] - bounded buckets with failure-based eviction
//! - [`DhtMessage`] - the binary wire format
//! - [`Dispatcher`] - receive loop and request/response correlation
//! - [`LookupOutcome`] - iterative FIND_NODE / FIND_VALUE
//! - [`RefreshScheduler`] - bucket refresh and liveness sweep

mod bucket;
mod config;
mod dispatcher;
mod error;
mod lookup;
mod message;
mod node;
mod refresh;
mod routing;
mod server;
mod stats;
mod storage;
mod transport;

pub use bucket::{InsertOutcome, KBucket};
pub use config::DhtConfig;
pub use dispatcher::Dispatcher;
pub use error::DhtError;
pub use lookup::{LookupKind, LookupOutcome};
pub use message::{
    DhtBody, DhtMessage, MessageKind, TransactionId, ValueReply, HEADER_LEN, MAX_VALUE_LEN,
};
pub use node::{Contact, Distance, Key, Node, NodeId};
pub use refresh::RefreshScheduler;
pub use routing::RoutingTable;
pub use server::DhtNode;
pub use stats::{DhtStats, StatsSnapshot};
pub use storage::ValueStore;
pub use transport::Transport;
