//! Typed INFO and DATA packets built on the chunk codec
//!
//! ```text
//! INFO (0x6756)                         DATA (0x6755)
//! ├── 0x0000 packet header              ├── 0x0000 packet header
//! ├── 0x0001 system name                └── 0x0001 tracker list
//! └── 0x0002 tracker list                   └── <tracker id>
//!     └── <tracker id>                          ├── 0x0000 position
//!         └── 0x0000 tracker name               ├── 0x0001 speed
//!                                               ├── 0x0002 orientation
//!                                               ├── 0x0003 status
//!                                               ├── 0x0004 acceleration
//!                                               ├── 0x0005 target position
//!                                               └── 0x0006 timestamp
//! ```
//!
//! Only the packet header is mandatory. Every other child is optional and an
//! absent child leaves the matching field `None`. Unrecognised child ids are
//! skipped.
//!
//! A frame whose trackers do not fit in one root chunk is split into several
//! packets sharing the header `frame_id`, each with `frame_packet_count` set
//! to the number of parts (see [`DataPacket::split`]).

use crate::chunk::{decode_chunks, Chunk, CHUNK_HEADER_LEN, MAX_CHUNK_PAYLOAD};
use crate::error::{PsnError, Result};
use log::trace;
use serde::{Deserialize, Serialize};

pub const INFO_PACKET_ID: u16 = 0x6756;
pub const DATA_PACKET_ID: u16 = 0x6755;

/// Packet header child id, shared by INFO and DATA.
pub const PACKET_HEADER_ID: u16 = 0x0000;

pub const INFO_SYSTEM_NAME_ID: u16 = 0x0001;
pub const INFO_TRACKER_LIST_ID: u16 = 0x0002;
pub const INFO_TRACKER_NAME_ID: u16 = 0x0000;

pub const DATA_TRACKER_LIST_ID: u16 = 0x0001;
pub const DATA_TRACKER_POS_ID: u16 = 0x0000;
pub const DATA_TRACKER_SPEED_ID: u16 = 0x0001;
pub const DATA_TRACKER_ORI_ID: u16 = 0x0002;
pub const DATA_TRACKER_STATUS_ID: u16 = 0x0003;
pub const DATA_TRACKER_ACCEL_ID: u16 = 0x0004;
pub const DATA_TRACKER_TRGTPOS_ID: u16 = 0x0005;
pub const DATA_TRACKER_TIMESTAMP_ID: u16 = 0x0006;

pub const PACKET_HEADER_LEN: usize = 12;

/// Most packets one frame can span, bounded by `frame_packet_count`.
pub const MAX_FRAME_PACKETS: usize = u8::MAX as usize;
pub const VERSION_HIGH: u8 = 2;
pub const VERSION_LOW: u8 = 3;

/// Three IEEE-754 single precision components, as carried by vector sub-chunks.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Float3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Float3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn to_le_bytes(self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.x.to_le_bytes());
        out[4..8].copy_from_slice(&self.y.to_le_bytes());
        out[8..12].copy_from_slice(&self.z.to_le_bytes());
        out
    }

    fn from_le_bytes(bytes: &[u8]) -> Self {
        Self {
            x: f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            y: f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            z: f32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

impl From<(f32, f32, f32)> for Float3 {
    fn from((x, y, z): (f32, f32, f32)) -> Self {
        Self::new(x, y, z)
    }
}

impl From<Float3> for (f32, f32, f32) {
    fn from(v: Float3) -> Self {
        (v.x, v.y, v.z)
    }
}

/// Header carried by every INFO and DATA packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Microseconds since the sending system started.
    pub timestamp_usec: u64,
    pub version_high: u8,
    pub version_low: u8,
    /// Per-packet-kind counter, wraps at 255.
    pub frame_id: u8,
    /// Number of PSN packets making up this frame.
    pub frame_packet_count: u8,
}

impl PacketHeader {
    pub fn new(timestamp_usec: u64, frame_id: u8) -> Self {
        Self {
            timestamp_usec,
            version_high: VERSION_HIGH,
            version_low: VERSION_LOW,
            frame_id,
            frame_packet_count: 1,
        }
    }

    fn to_chunk(self) -> Chunk {
        let mut payload = Vec::with_capacity(PACKET_HEADER_LEN);
        payload.extend_from_slice(&self.timestamp_usec.to_le_bytes());
        payload.push(self.version_high);
        payload.push(self.version_low);
        payload.push(self.frame_id);
        payload.push(self.frame_packet_count);
        Chunk::leaf(PACKET_HEADER_ID, payload)
    }

    fn from_chunk(chunk: &Chunk) -> Result<Self> {
        let bytes = leaf_payload(chunk, PACKET_HEADER_LEN, "packet header")?;
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&bytes[0..8]);
        Ok(Self {
            timestamp_usec: u64::from_le_bytes(timestamp),
            version_high: bytes[8],
            version_low: bytes[9],
            frame_id: bytes[10],
            frame_packet_count: bytes[11],
        })
    }
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Tracker id to name mapping announced by INFO packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerInfo {
    pub tracker_id: u16,
    pub name: String,
}

impl TrackerInfo {
    pub fn new(tracker_id: u16, name: impl Into<String>) -> Self {
        Self {
            tracker_id,
            name: name.into(),
        }
    }
}

/// Per-tracker state carried by DATA packets.
///
/// `None` means the field was not reported in this packet, which is
/// different from a reported zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackerData {
    pub tracker_id: u16,
    pub position: Option<Float3>,
    pub speed: Option<Float3>,
    pub orientation: Option<Float3>,
    pub status: Option<f32>,
    pub acceleration: Option<Float3>,
    pub target_position: Option<Float3>,
    pub timestamp: Option<u64>,
}

impl TrackerData {
    pub fn new(tracker_id: u16) -> Self {
        Self {
            tracker_id,
            ..Default::default()
        }
    }

    pub fn with_position(mut self, position: impl Into<Float3>) -> Self {
        self.position = Some(position.into());
        self
    }

    pub fn with_speed(mut self, speed: impl Into<Float3>) -> Self {
        self.speed = Some(speed.into());
        self
    }

    pub fn with_orientation(mut self, orientation: impl Into<Float3>) -> Self {
        self.orientation = Some(orientation.into());
        self
    }

    pub fn with_status(mut self, status: f32) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_acceleration(mut self, acceleration: impl Into<Float3>) -> Self {
        self.acceleration = Some(acceleration.into());
        self
    }

    pub fn with_target_position(mut self, target_position: impl Into<Float3>) -> Self {
        self.target_position = Some(target_position.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Overwrites fields reported in `newer`, keeping the rest.
    pub fn merge(&mut self, newer: &TrackerData) {
        if newer.position.is_some() {
            self.position = newer.position;
        }
        if newer.speed.is_some() {
            self.speed = newer.speed;
        }
        if newer.orientation.is_some() {
            self.orientation = newer.orientation;
        }
        if newer.status.is_some() {
            self.status = newer.status;
        }
        if newer.acceleration.is_some() {
            self.acceleration = newer.acceleration;
        }
        if newer.target_position.is_some() {
            self.target_position = newer.target_position;
        }
        if newer.timestamp.is_some() {
            self.timestamp = newer.timestamp;
        }
    }

    fn to_chunk(&self) -> Chunk {
        let mut fields = Vec::new();
        let vectors = [
            (DATA_TRACKER_POS_ID, self.position),
            (DATA_TRACKER_SPEED_ID, self.speed),
            (DATA_TRACKER_ORI_ID, self.orientation),
        ];
        for (id, value) in vectors {
            if let Some(v) = value {
                fields.push(Chunk::leaf(id, v.to_le_bytes().to_vec()));
            }
        }
        if let Some(status) = self.status {
            fields.push(Chunk::leaf(
                DATA_TRACKER_STATUS_ID,
                status.to_le_bytes().to_vec(),
            ));
        }
        let vectors = [
            (DATA_TRACKER_ACCEL_ID, self.acceleration),
            (DATA_TRACKER_TRGTPOS_ID, self.target_position),
        ];
        for (id, value) in vectors {
            if let Some(v) = value {
                fields.push(Chunk::leaf(id, v.to_le_bytes().to_vec()));
            }
        }
        if let Some(timestamp) = self.timestamp {
            fields.push(Chunk::leaf(
                DATA_TRACKER_TIMESTAMP_ID,
                timestamp.to_le_bytes().to_vec(),
            ));
        }
        Chunk::container(self.tracker_id, fields)
    }

    fn from_chunk(chunk: &Chunk) -> Result<Self> {
        let mut data = TrackerData::new(chunk.id);
        for field in chunk.children() {
            match field.id {
                DATA_TRACKER_POS_ID => data.position = Some(float3_field(field, "position")?),
                DATA_TRACKER_SPEED_ID => data.speed = Some(float3_field(field, "speed")?),
                DATA_TRACKER_ORI_ID => {
                    data.orientation = Some(float3_field(field, "orientation")?)
                }
                DATA_TRACKER_STATUS_ID => {
                    let b = leaf_payload(field, 4, "status")?;
                    data.status = Some(f32::from_le_bytes([b[0], b[1], b[2], b[3]]));
                }
                DATA_TRACKER_ACCEL_ID => {
                    data.acceleration = Some(float3_field(field, "acceleration")?)
                }
                DATA_TRACKER_TRGTPOS_ID => {
                    data.target_position = Some(float3_field(field, "target position")?)
                }
                DATA_TRACKER_TIMESTAMP_ID => {
                    let b = leaf_payload(field, 8, "tracker timestamp")?;
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&b[0..8]);
                    data.timestamp = Some(u64::from_le_bytes(raw));
                }
                other => trace!("Skipping unknown tracker field {:#06x}", other),
            }
        }
        Ok(data)
    }
}

/// System name and tracker names, sent at a low rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoPacket {
    pub header: PacketHeader,
    pub system_name: Option<String>,
    pub trackers: Vec<TrackerInfo>,
}

impl InfoPacket {
    pub fn to_chunk(&self) -> Chunk {
        let mut children = vec![self.header.to_chunk()];
        if let Some(name) = &self.system_name {
            children.push(Chunk::leaf(INFO_SYSTEM_NAME_ID, name.as_bytes().to_vec()));
        }
        let trackers = self
            .trackers
            .iter()
            .map(|t| {
                Chunk::container(
                    t.tracker_id,
                    vec![Chunk::leaf(INFO_TRACKER_NAME_ID, t.name.as_bytes().to_vec())],
                )
            })
            .collect();
        children.push(Chunk::container(INFO_TRACKER_LIST_ID, trackers));
        Chunk::container(INFO_PACKET_ID, children)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.to_chunk().encode()
    }

    /// Splits the tracker list over as many INFO packets as needed so each
    /// fits in one root chunk. Every part repeats the header and system name.
    pub fn split(self) -> Result<Vec<InfoPacket>> {
        let mut fixed = CHUNK_HEADER_LEN + PACKET_HEADER_LEN + CHUNK_HEADER_LEN;
        if let Some(name) = &self.system_name {
            fixed += CHUNK_HEADER_LEN + name.len();
        }
        let budget = MAX_CHUNK_PAYLOAD.saturating_sub(fixed);

        let groups = group_by_size(self.trackers, budget, |t| {
            2 * CHUNK_HEADER_LEN + t.name.len()
        })?;
        let header = PacketHeader {
            frame_packet_count: groups.len() as u8,
            ..self.header
        };

        Ok(groups
            .into_iter()
            .map(|trackers| InfoPacket {
                header,
                system_name: self.system_name.clone(),
                trackers,
            })
            .collect())
    }

    fn from_chunk(root: &Chunk) -> Result<Self> {
        let mut header = None;
        let mut system_name = None;
        let mut trackers = Vec::new();

        for child in root.children() {
            match child.id {
                PACKET_HEADER_ID => header = Some(PacketHeader::from_chunk(child)?),
                INFO_SYSTEM_NAME_ID => system_name = Some(string_field(child, "system name")?),
                INFO_TRACKER_LIST_ID => {
                    for tracker in child.children() {
                        let name = match tracker.child(INFO_TRACKER_NAME_ID) {
                            Some(name) => string_field(name, "tracker name")?,
                            None => String::new(),
                        };
                        trackers.push(TrackerInfo::new(tracker.id, name));
                    }
                }
                other => trace!("Skipping unknown INFO chunk {:#06x}", other),
            }
        }

        Ok(Self {
            header: header.ok_or_else(|| PsnError::malformed(0, "INFO packet without header"))?,
            system_name,
            trackers,
        })
    }
}

/// Tracker states for one frame, sent at a high rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    pub header: PacketHeader,
    pub trackers: Vec<TrackerData>,
}

impl DataPacket {
    pub fn to_chunk(&self) -> Chunk {
        let trackers = self.trackers.iter().map(TrackerData::to_chunk).collect();
        Chunk::container(
            DATA_PACKET_ID,
            vec![
                self.header.to_chunk(),
                Chunk::container(DATA_TRACKER_LIST_ID, trackers),
            ],
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.to_chunk().encode()
    }

    /// Splits the tracker list over as many DATA packets as needed so each
    /// fits in one root chunk.
    ///
    /// All parts share the header, including `frame_id`, and carry the number
    /// of parts in `frame_packet_count`. A frame that fits comes back as a
    /// single packet with a count of 1. Fails if one tracker alone is too
    /// large or the frame would need more than [`MAX_FRAME_PACKETS`] parts.
    pub fn split(self) -> Result<Vec<DataPacket>> {
        let budget = MAX_CHUNK_PAYLOAD - (CHUNK_HEADER_LEN + PACKET_HEADER_LEN + CHUNK_HEADER_LEN);

        let groups = group_by_size(self.trackers, budget, |t| t.to_chunk().encoded_len())?;
        let header = PacketHeader {
            frame_packet_count: groups.len() as u8,
            ..self.header
        };

        Ok(groups
            .into_iter()
            .map(|trackers| DataPacket { header, trackers })
            .collect())
    }

    fn from_chunk(root: &Chunk) -> Result<Self> {
        let mut header = None;
        let mut trackers = Vec::new();

        for child in root.children() {
            match child.id {
                PACKET_HEADER_ID => header = Some(PacketHeader::from_chunk(child)?),
                DATA_TRACKER_LIST_ID => {
                    for tracker in child.children() {
                        trackers.push(TrackerData::from_chunk(tracker)?);
                    }
                }
                other => trace!("Skipping unknown DATA chunk {:#06x}", other),
            }
        }

        Ok(Self {
            header: header.ok_or_else(|| PsnError::malformed(0, "DATA packet without header"))?,
            trackers,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Info,
    Data,
}

/// A decoded PSN packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    Info(InfoPacket),
    Data(DataPacket),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Info(_) => PacketKind::Info,
            Packet::Data(_) => PacketKind::Data,
        }
    }

    pub fn header(&self) -> &PacketHeader {
        match self {
            Packet::Info(info) => &info.header,
            Packet::Data(data) => &data.header,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Packet::Info(info) => info.encode(),
            Packet::Data(data) => data.encode(),
        }
    }
}

/// Encodes an INFO packet announcing `system_name` and the tracker names.
pub fn encode_info_packet(
    header: PacketHeader,
    system_name: &str,
    trackers: &[TrackerInfo],
) -> Result<Vec<u8>> {
    InfoPacket {
        header,
        system_name: Some(system_name.to_string()),
        trackers: trackers.to_vec(),
    }
    .encode()
}

/// Encodes a DATA packet carrying `trackers` for frame `frame_id`.
pub fn encode_data_packet(
    frame_id: u8,
    timestamp_usec: u64,
    trackers: &[TrackerData],
) -> Result<Vec<u8>> {
    DataPacket {
        header: PacketHeader::new(timestamp_usec, frame_id),
        trackers: trackers.to_vec(),
    }
    .encode()
}

/// Decodes one logical PSN packet.
///
/// The buffer must hold exactly one root chunk, which must be a container
/// with the INFO or DATA id.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet> {
    let mut roots = decode_chunks(bytes)?;
    if roots.len() != 1 {
        return Err(PsnError::malformed(
            0,
            format!("expected one root chunk, found {}", roots.len()),
        ));
    }
    let root = roots.remove(0);

    match root.id {
        INFO_PACKET_ID | DATA_PACKET_ID if !root.has_subchunks() => Err(PsnError::malformed(
            0,
            format!("root chunk {:#06x} has no sub-chunks", root.id),
        )),
        INFO_PACKET_ID => Ok(Packet::Info(InfoPacket::from_chunk(&root)?)),
        DATA_PACKET_ID => Ok(Packet::Data(DataPacket::from_chunk(&root)?)),
        id => Err(PsnError::UnknownPacketType { id }),
    }
}

/// Packs `items` in order into groups whose sizes sum to at most `budget`.
/// Always returns at least one group.
fn group_by_size<T>(
    items: Vec<T>,
    budget: usize,
    size_of: impl Fn(&T) -> usize,
) -> Result<Vec<Vec<T>>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    let mut used = 0;

    for item in items {
        let size = size_of(&item);
        if size > budget {
            return Err(PsnError::Encoding {
                context: "tracker chunk",
                length: size,
                limit: budget,
            });
        }
        if used + size > budget {
            groups.push(std::mem::take(&mut current));
            used = 0;
        }
        used += size;
        current.push(item);
    }
    groups.push(current);

    if groups.len() > MAX_FRAME_PACKETS {
        return Err(PsnError::Encoding {
            context: "frame packet count",
            length: groups.len(),
            limit: MAX_FRAME_PACKETS,
        });
    }
    Ok(groups)
}

fn leaf_payload<'a>(chunk: &'a Chunk, min_len: usize, what: &str) -> Result<&'a [u8]> {
    match chunk.payload() {
        Some(bytes) if bytes.len() >= min_len => Ok(bytes),
        Some(bytes) => Err(PsnError::malformed(
            0,
            format!("{} needs {} bytes, got {}", what, min_len, bytes.len()),
        )),
        None => Err(PsnError::malformed(
            0,
            format!("{} must be a raw chunk", what),
        )),
    }
}

fn float3_field(chunk: &Chunk, what: &str) -> Result<Float3> {
    leaf_payload(chunk, 12, what).map(Float3::from_le_bytes)
}

fn string_field(chunk: &Chunk, what: &str) -> Result<String> {
    leaf_payload(chunk, 0, what).map(|b| String::from_utf8_lossy(b).into_owned())
}
