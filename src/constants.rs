//! Protocol constants and tuning parameters.
//!
//! These are the defaults used by [`DhtConfig`](crate::dht::DhtConfig). The
//! Kademlia values (K, Alpha, timeouts) follow the Kademlia paper and the
//! usual deployments built on it.

use std::time::Duration;

// ============================================================================
// Identifier space
// ============================================================================

/// Identifier length in bytes (160 bits)
pub const ID_LEN: usize = 20;

/// One bucket per bit of the identifier space
pub const NUM_BUCKETS: usize = ID_LEN * 8;

// ============================================================================
// Kademlia parameters
// ============================================================================

/// Bucket capacity and lookup result size
pub const K: usize = 20;

/// Lookup parallelism per round
pub const ALPHA: usize = 3;

/// Upper bound on lookup rounds, so churn can't keep a lookup alive forever
pub const MAX_LOOKUP_ROUNDS: usize = 10;

// ============================================================================
// Timers
// ============================================================================

/// How long to wait for a response, and how long a peer stays fresh
pub const NODE_TIMEOUT: Duration = Duration::from_secs(15);

/// Buckets without a successful contact for this long get refreshed
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// How often stale peers are probed with PING
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Limits
// ============================================================================

/// Maximum outstanding requests before new ones are refused
pub const MAX_PENDING_REQUESTS: usize = 1024;

/// Receive buffer; large enough for any UDP payload
pub const RECV_BUFFER_SIZE: usize = 65535;

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65507;
