//! Transport-level fragmentation of logical PSN packets
//!
//! Each datagram on the wire is a fixed 8-byte transport header followed by a
//! slice of the encoded packet:
//!
//! ```text
//! ┌───────────────────┬───────────────────────┬──────────────────────┬────────────┐
//! │ frame_id (u32 LE) │ packet_number (u16 LE)│ packet_total (u16 LE)│ fragment…  │
//! └───────────────────┴───────────────────────┴──────────────────────┴────────────┘
//! ```
//!
//! `packet_number` is zero-based and always below `packet_total`. Datagrams of
//! one frame may arrive in any order; see [`crate::reassembly`] for the receive side.

use crate::error::{PsnError, Result};

pub const TRANSPORT_HEADER_LEN: usize = 8;

/// Default largest datagram the sender emits, header included.
pub const DEFAULT_MTU: usize = 1460;

/// Header prepended to every fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    pub frame_id: u32,
    pub packet_number: u16,
    pub packet_total: u16,
}

impl TransportHeader {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.frame_id.to_le_bytes());
        out.extend_from_slice(&self.packet_number.to_le_bytes());
        out.extend_from_slice(&self.packet_total.to_le_bytes());
    }

    /// Splits a datagram into its header and fragment bytes.
    pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8])> {
        if datagram.len() < TRANSPORT_HEADER_LEN {
            return Err(PsnError::malformed(
                0,
                format!(
                    "datagram of {} bytes is shorter than the transport header",
                    datagram.len()
                ),
            ));
        }

        let header = Self {
            frame_id: u32::from_le_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]),
            packet_number: u16::from_le_bytes([datagram[4], datagram[5]]),
            packet_total: u16::from_le_bytes([datagram[6], datagram[7]]),
        };

        if header.packet_total == 0 {
            return Err(PsnError::malformed(4, "packet_total is zero"));
        }
        if header.packet_number >= header.packet_total {
            return Err(PsnError::malformed(
                4,
                format!(
                    "packet_number {} is not below packet_total {}",
                    header.packet_number, header.packet_total
                ),
            ));
        }

        Ok((header, &datagram[TRANSPORT_HEADER_LEN..]))
    }
}

/// Splits encoded packets into size-bounded datagrams.
#[derive(Debug, Clone)]
pub struct Fragmenter {
    max_fragment_payload: usize,
}

impl Fragmenter {
    /// Creates a fragmenter whose datagrams never exceed `mtu` bytes.
    pub fn new(mtu: usize) -> Result<Self> {
        if mtu <= TRANSPORT_HEADER_LEN {
            return Err(PsnError::invalid_config(format!(
                "mtu {} leaves no room after the {}-byte transport header",
                mtu, TRANSPORT_HEADER_LEN
            )));
        }
        Ok(Self {
            max_fragment_payload: mtu - TRANSPORT_HEADER_LEN,
        })
    }

    pub fn max_fragment_payload(&self) -> usize {
        self.max_fragment_payload
    }

    /// Number of datagrams needed for `len` bytes. Empty input still takes one.
    pub fn fragment_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_fragment_payload).max(1)
    }

    /// Splits `packet` into datagrams tagged with `frame_id`.
    pub fn fragment(&self, frame_id: u32, packet: &[u8]) -> Result<Vec<Vec<u8>>> {
        let count = self.fragment_count(packet.len());
        if count > u16::MAX as usize {
            return Err(PsnError::Encoding {
                context: "fragmented packet",
                length: packet.len(),
                limit: u16::MAX as usize * self.max_fragment_payload,
            });
        }
        let packet_total = count as u16;

        let slices: Vec<&[u8]> = if packet.is_empty() {
            vec![packet]
        } else {
            packet.chunks(self.max_fragment_payload).collect()
        };

        Ok(slices
            .into_iter()
            .enumerate()
            .map(|(index, slice)| {
                let mut datagram = Vec::with_capacity(TRANSPORT_HEADER_LEN + slice.len());
                TransportHeader {
                    frame_id,
                    packet_number: index as u16,
                    packet_total,
                }
                .write_to(&mut datagram);
                datagram.extend_from_slice(slice);
                datagram
            })
            .collect())
    }
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self {
            max_fragment_payload: DEFAULT_MTU - TRANSPORT_HEADER_LEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut out = Vec::new();
        TransportHeader {
            frame_id: 0x0403_0201,
            packet_number: 1,
            packet_total: 3,
        }
        .write_to(&mut out);
        assert_eq!(out, vec![0x01, 0x02, 0x03, 0x04, 0x01, 0x00, 0x03, 0x00]);
    }

    #[test]
    fn test_single_fragment() {
        let fragmenter = Fragmenter::new(100).unwrap();
        let datagrams = fragmenter.fragment(9, &[1, 2, 3]).unwrap();

        assert_eq!(datagrams.len(), 1);
        let (header, body) = TransportHeader::parse(&datagrams[0]).unwrap();
        assert_eq!(header.frame_id, 9);
        assert_eq!(header.packet_number, 0);
        assert_eq!(header.packet_total, 1);
        assert_eq!(body, &[1, 2, 3]);
    }

    #[test]
    fn test_fragment_sizes() {
        let fragmenter = Fragmenter::new(18).unwrap();
        assert_eq!(fragmenter.max_fragment_payload(), 10);

        let packet: Vec<u8> = (0..25).collect();
        let datagrams = fragmenter.fragment(1, &packet).unwrap();

        assert_eq!(datagrams.len(), 3);
        assert!(datagrams.iter().all(|d| d.len() <= 18));
        assert_eq!(datagrams[2].len(), TRANSPORT_HEADER_LEN + 5);

        let mut joined = Vec::new();
        for (i, datagram) in datagrams.iter().enumerate() {
            let (header, body) = TransportHeader::parse(datagram).unwrap();
            assert_eq!(header.packet_number as usize, i);
            assert_eq!(header.packet_total, 3);
            joined.extend_from_slice(body);
        }
        assert_eq!(joined, packet);
    }

    #[test]
    fn test_exact_multiple() {
        let fragmenter = Fragmenter::new(18).unwrap();
        let datagrams = fragmenter.fragment(1, &[7u8; 20]).unwrap();
        assert_eq!(datagrams.len(), 2);
    }

    #[test]
    fn test_empty_packet_yields_one_datagram() {
        let fragmenter = Fragmenter::default();
        let datagrams = fragmenter.fragment(4, &[]).unwrap();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].len(), TRANSPORT_HEADER_LEN);
    }

    #[test]
    fn test_too_many_fragments_rejected() {
        let fragmenter = Fragmenter::new(TRANSPORT_HEADER_LEN + 1).unwrap();
        let packet = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(
            fragmenter.fragment(0, &packet),
            Err(PsnError::Encoding { .. })
        ));
    }

    #[test]
    fn test_tiny_mtu_rejected() {
        assert!(matches!(
            Fragmenter::new(TRANSPORT_HEADER_LEN),
            Err(PsnError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_headers() {
        assert!(TransportHeader::parse(&[0, 0, 0]).is_err());

        let mut zero_total = Vec::new();
        TransportHeader {
            frame_id: 1,
            packet_number: 0,
            packet_total: 0,
        }
        .write_to(&mut zero_total);
        assert!(TransportHeader::parse(&zero_total).is_err());

        let mut out_of_range = Vec::new();
        TransportHeader {
            frame_id: 1,
            packet_number: 2,
            packet_total: 2,
        }
        .write_to(&mut out_of_range);
        assert!(TransportHeader::parse(&out_of_range).is_err());
    }
}
