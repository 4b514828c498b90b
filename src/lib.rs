//! kadnode - A Kademlia DHT node
//!
//! This library implements a Kademlia distributed hash table over UDP: a
//! 160-bit XOR-metric routing table, a binary request/response protocol and
//! iterative parallel lookups for peers and stored values.
//!
//! # Modules
//!
//! - [`dht`] - Routing table, wire protocol, lookups and the running node
//! - [`constants`] - Protocol parameters and timer defaults

pub mod constants;
pub mod dht;

pub use dht::{
    Contact, DhtConfig, DhtError, DhtMessage, DhtNode, Key, LookupOutcome, Node, NodeId,
    RoutingTable, StatsSnapshot, Transport,
};
