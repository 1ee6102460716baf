//! Retransmission timeouts and jukebox delays for mount sessions.
//!
//! Each retransmission doubles the per-attempt timeout, clamped between the
//! mount's minimum and maximum. Non-idempotent requests get a larger floor
//! so a slow server has time to answer before the request is resent.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default initial request timeout.
pub const NFS_TIMEO: Duration = Duration::from_secs(1);
/// Smallest per-attempt timeout.
pub const NFS_MINTIMEO: Duration = Duration::from_secs(1);
/// Largest per-attempt timeout.
pub const NFS_MAXTIMEO: Duration = Duration::from_secs(60);
/// Smallest per-attempt timeout for non-idempotent requests.
pub const NFS_MINIDEMTIMEO: Duration = Duration::from_secs(5);
/// Default soft-mount retransmission count.
pub const NFS_RETRANS: u32 = 10;
/// First wait after a jukebox (DELAY) reply.
pub const NFS_TRYLATERDEL: Duration = Duration::from_secs(4);

/// Timeout policy of one mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Timeout of the first attempt
    pub initial_timeout: Duration,
    /// Lower clamp
    pub min_timeout: Duration,
    /// Upper clamp
    pub max_timeout: Duration,
    /// Lower clamp for non-idempotent requests
    pub non_idempotent_min_timeout: Duration,
    /// Retransmissions a soft mount makes before giving up
    pub retry_count: u32,
    /// First jukebox wait
    pub jukebox_initial: Duration,
    /// Largest jukebox wait
    pub jukebox_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_timeout: NFS_TIMEO,
            min_timeout: NFS_MINTIMEO,
            max_timeout: NFS_MAXTIMEO,
            non_idempotent_min_timeout: NFS_MINIDEMTIMEO,
            retry_count: NFS_RETRANS,
            jukebox_initial: NFS_TRYLATERDEL,
            jukebox_max: NFS_MAXTIMEO,
        }
    }
}

fn doubled(base: Duration, times: u32) -> Duration {
    base.saturating_mul(1u32 << times.min(20))
}

impl RetryPolicy {
    /// Timeout for attempt number `attempt` (0 = first send).
    pub fn attempt_timeout(&self, attempt: u32, idempotent: bool) -> Duration {
        let floor = if idempotent {
            self.min_timeout
        } else {
            self.min_timeout.max(self.non_idempotent_min_timeout)
        };
        let ceiling = self.max_timeout.max(floor);
        doubled(self.initial_timeout, attempt).clamp(floor, ceiling)
    }

    /// Wait before resending after the `n`th consecutive jukebox reply.
    pub fn jukebox_delay(&self, n: u32) -> Duration {
        doubled(self.jukebox_initial, n).min(self.jukebox_max)
    }

    /// Total attempts a soft mount makes: the first send plus retransmissions.
    pub fn soft_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}
