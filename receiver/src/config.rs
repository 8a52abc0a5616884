use psn_protocol::reassembly::{DEFAULT_MAX_PENDING_FRAMES, DEFAULT_REASSEMBLY_TIMEOUT};
use psn_protocol::{PsnError, Result, DEFAULT_MULTICAST_GROUP, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_STALENESS_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(1);
pub const DEFAULT_MAX_DATAGRAMS_PER_TICK: usize = 256;

/// Largest datagram the receiver reads in one call.
pub const RECEIVE_BUFFER_LEN: usize = 65_536;

/// Receiver settings. The defaults listen on the published PSN group and port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Multicast group to join. A unicast address is bound directly instead.
    pub group: Ipv4Addr,
    pub port: u16,
    /// Local interface used for the multicast join.
    pub interface: Ipv4Addr,
    /// Whether datagrams sent from this host are looped back to it.
    pub multicast_loopback: bool,
    pub staleness_timeout: Duration,
    pub reassembly_timeout: Duration,
    pub max_pending_frames: usize,
    /// Upper bound on a single socket read inside `tick`.
    pub poll_timeout: Duration,
    pub max_datagrams_per_tick: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            multicast_loopback: true,
            staleness_timeout: DEFAULT_STALENESS_TIMEOUT,
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            max_datagrams_per_tick: DEFAULT_MAX_DATAGRAMS_PER_TICK,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.staleness_timeout.is_zero() {
            return Err(PsnError::invalid_config("staleness_timeout must be non-zero"));
        }
        if self.reassembly_timeout.is_zero() {
            return Err(PsnError::invalid_config("reassembly_timeout must be non-zero"));
        }
        if self.max_pending_frames == 0 {
            return Err(PsnError::invalid_config("max_pending_frames must be at least 1"));
        }
        if self.max_datagrams_per_tick == 0 {
            return Err(PsnError::invalid_config(
                "max_datagrams_per_tick must be at least 1",
            ));
        }
        if self.group.is_unspecified() {
            return Err(PsnError::invalid_config("group must not be 0.0.0.0"));
        }
        Ok(())
    }

    /// Returns true when `start` will join a multicast group rather than bind a unicast address.
    pub fn is_multicast(&self) -> bool {
        self.group.is_multicast()
    }
}
