//! # PSN Receiver Library
//!
//! Listens for PosiStageNet traffic and keeps a registry of the trackers it
//! hears about. The host owns the cadence: every call to [`Receiver::tick`]
//! drains the socket, routes datagrams through reassembly and decoding, and
//! runs the maintenance pass.
//!
//! ## Lifecycle
//!
//! The receiver is either `Stopped` or `Listening`. `start` binds the socket
//! and joins the multicast group (or binds a unicast address directly), `stop`
//! leaves the group and drops every pending fragment. `stop` can be called at
//! any time, including when already stopped.
//!
//! ## Failure Handling
//!
//! Bytes from the network are untrusted. Malformed datagrams, conflicting
//! fragments, undecodable packets and unknown packet types are counted in
//! [`ReceiverStats`] and dropped. Only bind and join failures on `start` reach
//! the host as errors.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Group, port, interface and the timeouts that bound memory and staleness.
//!
//! ### Registry Module (`registry`)
//! Tracker entries keyed by id:
//! - Names from INFO packets
//! - Merged tracker fields from DATA packets
//! - Last-seen timestamps for staleness eviction
//!
//! ### Network Module (`network`)
//! Socket ownership, the receive state machine and statistics. Hosts that
//! prefer push over polling call `Receiver::subscribe` and get every decoded
//! packet on a channel.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use psn_receiver::{Receiver, ReceiverConfig};
//! use std::time::{Duration, Instant};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut receiver = Receiver::new(ReceiverConfig::default())?;
//!     receiver.listen()?;
//!
//!     let mut ticker = tokio::time::interval(Duration::from_millis(10));
//!     loop {
//!         ticker.tick().await;
//!         receiver.tick(Instant::now()).await?;
//!
//!         for tracker in receiver.list_trackers().await {
//!             println!("{} {:?}", tracker.id, tracker.name);
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod network;
pub mod registry;

pub use config::ReceiverConfig;
pub use network::{ReceivedPacket, Receiver, ReceiverState, ReceiverStats};
pub use registry::{SharedRegistry, TrackerRegistry, TrackerRegistryEntry};
