use thiserror::Error;

/// Errors produced by the DHT node.
///
/// Peer-specific trouble (timeouts, garbage datagrams, full buckets) is
/// absorbed into routing state and only shows up here for direct RPCs such as
/// [`DhtNode::ping`](super::DhtNode::ping).
#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid node id length")]
    InvalidNodeId,

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("rate limited")]
    RateLimited,

    #[error("value too large: {0} bytes")]
    ValueTooLarge(usize),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
