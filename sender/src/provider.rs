//! Host-side tracker state for the sender
//!
//! The sender pulls tracker state through [`TrackerStateProvider`] every time
//! it builds a packet. Hosts can implement the trait, pass a closure, or keep
//! their trackers in a [`SharedTrackerTable`] and update it from anywhere.

use log::debug;
use psn_protocol::TrackerData;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One tracker as the host sees it
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub id: u16,
    pub name: String,
    /// Latest state. Fields left `None` are omitted from DATA packets.
    pub data: TrackerData,
}

impl TrackedObject {
    pub fn new(id: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            data: TrackerData::new(id),
        }
    }

    pub fn with_data(mut self, data: TrackerData) -> Self {
        self.data = TrackerData {
            tracker_id: self.id,
            ..data
        };
        self
    }
}

/// Source of the trackers the sender announces.
pub trait TrackerStateProvider: Send {
    fn trackers(&mut self) -> Vec<TrackedObject>;
}

impl<F> TrackerStateProvider for F
where
    F: FnMut() -> Vec<TrackedObject> + Send,
{
    fn trackers(&mut self) -> Vec<TrackedObject> {
        self()
    }
}

/// Trackers keyed by id, iterated in id order
#[derive(Debug, Default)]
pub struct TrackerTable {
    trackers: BTreeMap<u16, TrackedObject>,
}

impl TrackerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tracker. Returns false if the id was already taken, in
    /// which case only the name is replaced.
    pub fn add_tracker(&mut self, id: u16, name: impl Into<String>) -> bool {
        let name = name.into();
        match self.trackers.get_mut(&id) {
            Some(existing) => {
                debug!("Tracker {} renamed from {} to {}", id, existing.name, name);
                existing.name = name;
                false
            }
            None => {
                debug!("Tracker {} ({}) added", id, name);
                self.trackers.insert(id, TrackedObject::new(id, name));
                true
            }
        }
    }

    /// Replaces the state of a registered tracker. Returns false for unknown ids.
    pub fn update_tracker(&mut self, id: u16, data: TrackerData) -> bool {
        match self.trackers.get_mut(&id) {
            Some(tracker) => {
                tracker.data = TrackerData {
                    tracker_id: id,
                    ..data
                };
                true
            }
            None => false,
        }
    }

    pub fn remove_tracker(&mut self, id: u16) -> Option<TrackedObject> {
        self.trackers.remove(&id)
    }

    /// Lowest unused id at or above `start_from`. Id 0 is never handed out.
    pub fn find_free_id(&self, start_from: u16) -> Option<u16> {
        (start_from.max(1)..=u16::MAX).find(|id| !self.trackers.contains_key(id))
    }

    pub fn get(&self, id: u16) -> Option<&TrackedObject> {
        self.trackers.get(&id)
    }

    pub fn snapshot(&self) -> Vec<TrackedObject> {
        self.trackers.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.trackers.clear();
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

/// A [`TrackerTable`] shared between the host and the sender.
#[derive(Debug, Clone, Default)]
pub struct SharedTrackerTable {
    inner: Arc<Mutex<TrackerTable>>,
}

impl SharedTrackerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the table. A panic in another holder does not make it unusable.
    pub fn lock(&self) -> MutexGuard<'_, TrackerTable> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TrackerStateProvider for SharedTrackerTable {
    fn trackers(&mut self) -> Vec<TrackedObject> {
        self.lock().snapshot()
    }
}
