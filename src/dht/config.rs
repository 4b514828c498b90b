use std::time::Duration;

use super::error::DhtError;
use crate::constants::{
    ALPHA, K, LIVENESS_INTERVAL, MAX_LOOKUP_ROUNDS, MAX_PENDING_REQUESTS, NODE_TIMEOUT,
    RECV_BUFFER_SIZE, REFRESH_INTERVAL,
};

/// Tuning knobs for a [`DhtNode`](super::DhtNode).
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Bucket capacity and lookup result size (k)
    pub k: usize,
    /// Requests in flight per lookup round (alpha)
    pub alpha: usize,
    /// Response timeout; also the age at which a peer counts as stale
    pub node_timeout: Duration,
    /// Idle time after which a bucket is refreshed with a lookup
    pub refresh_interval: Duration,
    /// Period of the stale-peer PING sweep
    pub liveness_interval: Duration,
    /// Hard cap on rounds per lookup
    pub max_lookup_rounds: usize,
    /// Outstanding requests allowed before new ones are refused
    pub max_pending_requests: usize,
    /// Cap on locally stored values; `None` grows without bound
    pub max_stored_values: Option<usize>,
    /// Size of the datagram receive buffer
    pub recv_buffer_size: usize,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: K,
            alpha: ALPHA,
            node_timeout: NODE_TIMEOUT,
            refresh_interval: REFRESH_INTERVAL,
            liveness_interval: LIVENESS_INTERVAL,
            max_lookup_rounds: MAX_LOOKUP_ROUNDS,
            max_pending_requests: MAX_PENDING_REQUESTS,
            max_stored_values: None,
            recv_buffer_size: RECV_BUFFER_SIZE,
        }
    }
}

impl DhtConfig {
    pub fn validate(&self) -> Result<(), DhtError> {
        if self.k == 0 || self.k > K {
            return Err(DhtError::InvalidConfig(format!(
                "k must be between 1 and {}, got {}",
                K, self.k
            )));
        }
        if self.alpha == 0 {
            return Err(DhtError::InvalidConfig("alpha must be positive".into()));
        }
        if self.max_lookup_rounds == 0 {
            return Err(DhtError::InvalidConfig(
                "max_lookup_rounds must be positive".into(),
            ));
        }
        if self.node_timeout.is_zero() || self.liveness_interval.is_zero() {
            return Err(DhtError::InvalidConfig("timers must be non-zero".into()));
        }
        if self.refresh_interval.is_zero() {
            return Err(DhtError::InvalidConfig(
                "refresh_interval must be non-zero".into(),
            ));
        }
        if self.recv_buffer_size == 0 {
            return Err(DhtError::InvalidConfig(
                "recv_buffer_size must be positive".into(),
            ));
        }
        Ok(())
    }
}
