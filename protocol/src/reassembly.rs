//! Reassembly of fragmented frames
//!
//! Fragments are grouped by `(source address, transport frame id)`. A buffer is
//! created by the first fragment seen for a key, completed once every index
//! below `packet_total` is present, and dropped by [`Reassembler::sweep`] once
//! it is older than the reassembly timeout, complete or not.

use crate::chunk::{CHUNK_HEADER_LEN, MAX_CHUNK_PAYLOAD};
use crate::error::{PsnError, Result};
use crate::fragment::{TransportHeader, TRANSPORT_HEADER_LEN};
use log::{debug, trace};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Largest logical packet: a single root chunk at full length.
pub const MAX_LOGICAL_PACKET_LEN: usize = CHUNK_HEADER_LEN + MAX_CHUNK_PAYLOAD;

pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 64;

pub type FrameKey = (SocketAddr, u32);

/// Fragments of one frame received so far.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    pub expected_count: u16,
    pub received: BTreeMap<u16, Vec<u8>>,
    pub first_seen: Instant,
    byte_count: usize,
}

impl ReassemblyBuffer {
    fn new(expected_count: u16, first_seen: Instant) -> Self {
        Self {
            expected_count,
            received: BTreeMap::new(),
            first_seen,
            byte_count: 0,
        }
    }

    /// Stores a fragment. A repeated index replaces the earlier copy.
    fn insert(&mut self, index: u16, bytes: &[u8]) {
        if let Some(previous) = self.received.insert(index, bytes.to_vec()) {
            self.byte_count -= previous.len();
        }
        self.byte_count += bytes.len();
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.expected_count as usize
    }

    fn concatenate(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_count);
        for bytes in self.received.into_values() {
            out.extend_from_slice(&bytes);
        }
        out
    }
}

/// Counters for frames that left the table without completing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub completed: u64,
    pub expired: u64,
    pub conflicts: u64,
    pub oversized: u64,
    pub evicted: u64,
}

/// Table of in-flight frames keyed by source and frame id.
pub struct Reassembler {
    buffers: HashMap<FrameKey, ReassemblyBuffer>,
    timeout: Duration,
    max_pending_frames: usize,
    stats: ReassemblyStats,
}

impl Reassembler {
    pub fn new(timeout: Duration, max_pending_frames: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            timeout,
            max_pending_frames: max_pending_frames.max(1),
            stats: ReassemblyStats::default(),
        }
    }

    /// Feeds one datagram.
    ///
    /// Returns `Ok(Some(packet))` when this datagram completes a frame,
    /// `Ok(None)` while fragments are still missing, and an error when the
    /// datagram is malformed or contradicts the frame it belongs to. In the
    /// conflict case the partial frame is discarded.
    pub fn accept(
        &mut self,
        source: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) -> Result<Option<Vec<u8>>> {
        let (header, fragment) = TransportHeader::parse(datagram)?;
        let key = (source, header.frame_id);

        if header.packet_total == 1 {
            if let Some(stale) = self.buffers.remove(&key) {
                self.stats.conflicts += 1;
                return Err(PsnError::ReassemblyConflict {
                    frame_id: header.frame_id,
                    expected: stale.expected_count,
                    found: 1,
                });
            }
            if fragment.len() > MAX_LOGICAL_PACKET_LEN {
                self.stats.oversized += 1;
                return Err(PsnError::malformed(0, "frame exceeds the largest PSN packet"));
            }
            self.stats.completed += 1;
            return Ok(Some(fragment.to_vec()));
        }

        // Every fragment of a split frame carries at least one byte.
        if fragment.is_empty() {
            return Err(PsnError::malformed(
                TRANSPORT_HEADER_LEN,
                format!(
                    "empty fragment {} of {} in frame {}",
                    header.packet_number, header.packet_total, header.frame_id
                ),
            ));
        }

        if !self.buffers.contains_key(&key) && self.buffers.len() >= self.max_pending_frames {
            self.evict_oldest();
        }

        let buffer = self
            .buffers
            .entry(key)
            .or_insert_with(|| ReassemblyBuffer::new(header.packet_total, now));

        if buffer.expected_count != header.packet_total {
            let expected = buffer.expected_count;
            self.buffers.remove(&key);
            self.stats.conflicts += 1;
            return Err(PsnError::ReassemblyConflict {
                frame_id: header.frame_id,
                expected,
                found: header.packet_total,
            });
        }

        buffer.insert(header.packet_number, fragment);
        trace!(
            "Frame {} from {}: fragment {}/{} ({} of {} held)",
            header.frame_id,
            source,
            header.packet_number + 1,
            header.packet_total,
            buffer.received.len(),
            buffer.expected_count
        );

        if buffer.byte_count > MAX_LOGICAL_PACKET_LEN {
            self.buffers.remove(&key);
            self.stats.oversized += 1;
            return Err(PsnError::malformed(0, "frame exceeds the largest PSN packet"));
        }

        if !buffer.is_complete() {
            return Ok(None);
        }

        match self.buffers.remove(&key) {
            Some(buffer) => {
                self.stats.completed += 1;
                Ok(Some(buffer.concatenate()))
            }
            None => Ok(None),
        }
    }

    /// Drops every buffer older than the timeout. Returns how many were dropped.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.buffers.len();
        self.buffers
            .retain(|_, buffer| now.saturating_duration_since(buffer.first_seen) <= timeout);
        let expired = before - self.buffers.len();

        if expired > 0 {
            debug!("Discarded {} incomplete frames after {:?}", expired, timeout);
            self.stats.expired += expired as u64;
        }
        expired
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .buffers
            .iter()
            .min_by_key(|(_, buffer)| buffer.first_seen)
            .map(|(key, _)| *key);

        if let Some(key) = oldest {
            debug!("Reassembly table full, dropping frame {} from {}", key.1, key.0);
            self.buffers.remove(&key);
            self.stats.evicted += 1;
        }
    }

    /// Drops all pending frames.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn contains(&self, source: SocketAddr, frame_id: u32) -> bool {
        self.buffers.contains_key(&(source, frame_id))
    }

    pub fn pending(&self) -> usize {
        self.buffers.len()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_REASSEMBLY_TIMEOUT, DEFAULT_MAX_PENDING_FRAMES)
    }
}
