//! # PosiStageNet Protocol
//!
//! Wire-level building blocks shared by the PSN sender and receiver. Nothing in
//! this crate touches a socket; every function works on byte slices so it can
//! be tested and reused without a network.
//!
//! ## Layers
//!
//! ### Chunk Codec (`chunk`)
//! The recursive tagged-length-value format every PSN packet is made of.
//! Decoding is bounded in depth and keeps unknown chunk ids so newer senders
//! do not break older readers.
//!
//! ### Packet Model (`packet`)
//! Typed INFO packets (system name, tracker names) and DATA packets (per-tracker
//! position, speed, orientation, status, acceleration, target position,
//! timestamp). Every tracker field is optional.
//!
//! ### Fragmentation (`fragment`, `reassembly`)
//! Logical packets are split into datagrams carrying a small transport header.
//! The reassembler rebuilds them per source and frame id, tolerating any
//! arrival order and expiring frames whose fragments never all arrive.
//!
//! ## Usage Example
//!
//! ```rust
//! use psn_protocol::{decode_packet, encode_data_packet, Fragmenter, Packet, Reassembler, TrackerData};
//! use std::time::Instant;
//!
//! let tracker = TrackerData::new(1).with_position((1.0, 2.0, 3.0));
//! let bytes = encode_data_packet(7, 0, &[tracker]).unwrap();
//!
//! let datagrams = Fragmenter::default().fragment(7, &bytes).unwrap();
//! let mut reassembler = Reassembler::default();
//! let source = "127.0.0.1:56565".parse().unwrap();
//!
//! for datagram in &datagrams {
//!     if let Some(packet) = reassembler.accept(source, datagram, Instant::now()).unwrap() {
//!         assert!(matches!(decode_packet(&packet).unwrap(), Packet::Data(_)));
//!     }
//! }
//! ```

pub mod chunk;
pub mod error;
pub mod fragment;
pub mod packet;
pub mod reassembly;

use std::net::Ipv4Addr;

pub use chunk::{decode_chunks, encode_chunk, Chunk, ChunkBody};
pub use error::{PsnError, Result};
pub use fragment::{Fragmenter, TransportHeader, DEFAULT_MTU, TRANSPORT_HEADER_LEN};
pub use packet::{
    decode_packet, encode_data_packet, encode_info_packet, DataPacket, Float3, InfoPacket,
    Packet, PacketHeader, PacketKind, TrackerData, TrackerInfo, MAX_FRAME_PACKETS,
};
pub use reassembly::{Reassembler, ReassemblyStats};

/// Published PSN multicast group.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(236, 10, 10, 10);

/// Published PSN UDP port.
pub const DEFAULT_PORT: u16 = 56565;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_published_defaults() {
        assert!(DEFAULT_MULTICAST_GROUP.is_multicast());
        assert_eq!(DEFAULT_PORT, 56565);
        assert_eq!(DEFAULT_MTU, 1460);
    }
}
