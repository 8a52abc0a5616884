//! # PSN Sender Library
//!
//! Broadcasts PosiStageNet tracker state. The host supplies trackers through a
//! [`TrackerStateProvider`] and calls [`Sender::tick`] from its own loop; the
//! sender decides when INFO and DATA packets are due, encodes them, splits
//! them into datagrams and emits them.
//!
//! ## Packet Schedule
//!
//! INFO packets (system name and tracker names) go out on a slow interval,
//! one second by default. DATA packets (tracker state) follow a [`SendRate`]:
//! 30, 60 or 120 Hz, an explicit interval, or once per tick.
//!
//! ## Frame Counters
//!
//! Two counters are kept apart:
//! - The PSN header frame id is a `u8` incremented per DATA packet (INFO has
//!   its own) and wraps at 255
//! - The transport frame id is a `u32` incremented for every logical packet
//!   sent, so INFO and DATA fragments never share a reassembly key
//!
//! ## Failure Handling
//!
//! Socket errors on `start` are returned as fatal. A send failure during
//! `tick` is returned as a recoverable error; the packet is not resent until
//! its next scheduled deadline.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use psn_protocol::TrackerData;
//! use psn_sender::{Sender, SenderConfig, SharedTrackerTable};
//! use std::time::{Duration, Instant};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let table = SharedTrackerTable::new();
//!     table.lock().add_tracker(1, "Actor");
//!
//!     let mut sender = Sender::new(SenderConfig::default())?;
//!     sender.start_with(table.clone())?;
//!
//!     let mut ticker = tokio::time::interval(Duration::from_millis(5));
//!     loop {
//!         ticker.tick().await;
//!         table
//!             .lock()
//!             .update_tracker(1, TrackerData::new(1).with_position((0.0, 1.0, 0.0)));
//!         if let Err(e) = sender.tick(Instant::now()).await {
//!             eprintln!("send failed: {}", e);
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod network;
pub mod provider;
pub mod utils;

pub use config::{SendRate, SenderConfig};
pub use network::{build_data_packet, build_info_packet, Sender, SenderState, SenderStats};
pub use provider::{SharedTrackerTable, TrackedObject, TrackerStateProvider, TrackerTable};
