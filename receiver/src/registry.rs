//! Tracker registry maintained by the receiver
//!
//! This module holds the receiver's view of every tracker it has heard about:
//! - Entries are created by INFO or DATA packets referencing an unseen id
//! - INFO packets set names, DATA packets merge tracker fields
//! - Entries not refreshed within the staleness timeout are evicted
//!
//! Readers get owned snapshots, so a copy taken from another task stays
//! consistent while the receive loop keeps updating the registry.

use log::{debug, info};
use psn_protocol::{DataPacket, InfoPacket, TrackerData};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Registry handle shared between the receive loop and host readers.
pub type SharedRegistry = Arc<RwLock<TrackerRegistry>>;

/// Everything known about one tracker
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerRegistryEntry {
    pub id: u16,
    /// Name announced by the latest INFO packet
    pub name: Option<String>,
    /// System name of the sender that announced the tracker
    pub system_name: Option<String>,
    /// Merged tracker fields from all DATA packets so far
    pub last_data: Option<TrackerData>,
    /// Last time an INFO or DATA packet mentioned this tracker
    pub last_seen: Instant,
    /// Address of the sender that last mentioned this tracker
    pub source: SocketAddr,
    /// PSN frame id of the packet that last mentioned this tracker
    pub frame_id: u8,
}

impl TrackerRegistryEntry {
    fn new(id: u16, source: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            name: None,
            system_name: None,
            last_data: None,
            last_seen: now,
            source,
            frame_id: 0,
        }
    }

    /// Returns true if the entry has not been refreshed for longer than `timeout`.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Trackers indexed by id
#[derive(Debug)]
pub struct TrackerRegistry {
    entries: HashMap<u16, TrackerRegistryEntry>,
    staleness_timeout: Duration,
}

impl TrackerRegistry {
    pub fn new(staleness_timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            staleness_timeout,
        }
    }

    /// Wraps a new registry for sharing across tasks.
    pub fn shared(staleness_timeout: Duration) -> SharedRegistry {
        Arc::new(RwLock::new(Self::new(staleness_timeout)))
    }

    fn touch(&mut self, id: u16, source: SocketAddr, frame_id: u8, now: Instant) -> &mut TrackerRegistryEntry {
        let entry = self.entries.entry(id).or_insert_with(|| {
            info!("Tracker {} discovered from {}", id, source);
            TrackerRegistryEntry::new(id, source, now)
        });
        entry.last_seen = now;
        entry.source = source;
        entry.frame_id = frame_id;
        entry
    }

    /// Records tracker names from an INFO packet. Returns how many trackers it named.
    pub fn apply_info(&mut self, packet: &InfoPacket, source: SocketAddr, now: Instant) -> usize {
        for tracker in &packet.trackers {
            let entry = self.touch(tracker.tracker_id, source, packet.header.frame_id, now);
            entry.name = Some(tracker.name.clone());
            if packet.system_name.is_some() {
                entry.system_name = packet.system_name.clone();
            }
        }
        packet.trackers.len()
    }

    /// Merges tracker fields from a DATA packet. Returns how many trackers it updated.
    pub fn apply_data(&mut self, packet: &DataPacket, source: SocketAddr, now: Instant) -> usize {
        for data in &packet.trackers {
            let entry = self.touch(data.tracker_id, source, packet.header.frame_id, now);
            match entry.last_data.as_mut() {
                Some(existing) => existing.merge(data),
                None => entry.last_data = Some(data.clone()),
            }
        }
        packet.trackers.len()
    }

    /// Removes entries older than the staleness timeout and returns their ids.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<u16> {
        let timeout = self.staleness_timeout;
        let mut stale: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_stale(now, timeout))
            .map(|(id, _)| *id)
            .collect();
        stale.sort_unstable();

        for id in &stale {
            if let Some(entry) = self.entries.remove(id) {
                debug!(
                    "Tracker {} ({}) went stale",
                    id,
                    entry.name.as_deref().unwrap_or("unnamed")
                );
            }
        }

        stale
    }

    /// Point-in-time copy of all entries, ordered by tracker id.
    pub fn snapshot(&self) -> Vec<TrackerRegistryEntry> {
        let mut entries: Vec<TrackerRegistryEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|entry| entry.id);
        entries
    }

    pub fn get(&self, id: u16) -> Option<TrackerRegistryEntry> {
        self.entries.get(&id).cloned()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn staleness_timeout(&self) -> Duration {
        self.staleness_timeout
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
