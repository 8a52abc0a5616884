//! Sender network layer: packet scheduling, fragmentation and emission

use crate::config::{SendRate, SenderConfig};
use crate::provider::{TrackedObject, TrackerStateProvider};
use crate::utils::timestamp_usec;
use log::{debug, error, info, trace, warn};
use psn_protocol::{
    DataPacket, Fragmenter, InfoPacket, PacketHeader, PsnError, Result, TrackerData, TrackerInfo,
};
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Stopped,
    Sending,
}

/// Send counters. A frame split over several PSN packets counts each packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    pub info_packets: u64,
    pub data_packets: u64,
    pub datagrams_sent: u64,
    pub send_failures: u64,
    pub encode_failures: u64,
}

/// Builds the INFO packet announcing `trackers` under `system_name`.
pub fn build_info_packet(
    header: PacketHeader,
    system_name: &str,
    trackers: &[TrackedObject],
) -> InfoPacket {
    InfoPacket {
        header,
        system_name: Some(system_name.to_string()),
        trackers: trackers
            .iter()
            .map(|t| TrackerInfo::new(t.id, t.name.clone()))
            .collect(),
    }
}

/// Builds the DATA packet carrying the state of `trackers`.
pub fn build_data_packet(header: PacketHeader, trackers: &[TrackedObject]) -> DataPacket {
    DataPacket {
        header,
        trackers: trackers
            .iter()
            .map(|t| TrackerData {
                tracker_id: t.id,
                ..t.data.clone()
            })
            .collect(),
    }
}

/// Next deadline after one that just fired. Falls back to `now + interval`
/// when the host fell behind, so missed sends are not bunched up.
fn advance(deadline: Instant, interval: Duration, now: Instant) -> Instant {
    let next = deadline + interval;
    if next <= now {
        now + interval
    } else {
        next
    }
}

/// PSN sender
///
/// Owns one UDP socket while sending. The host calls [`Sender::tick`] from its
/// own loop; INFO and DATA packets go out whenever their interval has elapsed.
pub struct Sender {
    config: SenderConfig,
    socket: Option<UdpSocket>,
    destination: SocketAddr,
    provider: Option<Box<dyn TrackerStateProvider>>,
    fragmenter: Fragmenter,

    started_at: Instant,
    next_info: Instant,
    next_data: Instant,

    info_frame_id: u8,
    data_frame_id: u8,
    transport_frame_id: u32,

    stats: SenderStats,
}

impl Sender {
    pub fn new(config: SenderConfig) -> Result<Self> {
        config.validate()?;
        let now = Instant::now();
        Ok(Self {
            fragmenter: Fragmenter::new(config.mtu)?,
            destination: SocketAddr::V4(SocketAddrV4::new(config.group, config.port)),
            config,
            socket: None,
            provider: None,
            started_at: now,
            next_info: now,
            next_data: now,
            info_frame_id: 0,
            data_frame_id: 0,
            transport_frame_id: 0,
            stats: SenderStats::default(),
        })
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    pub fn state(&self) -> SenderState {
        if self.socket.is_some() {
            SenderState::Sending
        } else {
            SenderState::Stopped
        }
    }

    pub fn is_sending(&self) -> bool {
        self.state() == SenderState::Sending
    }

    /// Starts sending with the configured destination and intervals.
    pub fn start_with<P>(&mut self, provider: P) -> Result<()>
    where
        P: TrackerStateProvider + 'static,
    {
        let config = self.config.clone();
        self.start(
            config.group,
            config.port,
            config.info_interval,
            config.data_rate,
            provider,
        )
    }

    /// Opens the socket and begins sending to `group:port`.
    ///
    /// The first `tick` after a successful start sends both an INFO and a DATA
    /// packet. Must be called from within a Tokio runtime.
    pub fn start<P>(
        &mut self,
        group: Ipv4Addr,
        port: u16,
        info_interval: Duration,
        data_rate: impl Into<SendRate>,
        provider: P,
    ) -> Result<()>
    where
        P: TrackerStateProvider + 'static,
    {
        if self.is_sending() {
            return Err(PsnError::invalid_state("sender is already sending"));
        }

        let config = SenderConfig {
            group,
            port,
            info_interval,
            data_rate: data_rate.into(),
            ..self.config.clone()
        };
        config.validate()?;

        tokio::runtime::Handle::try_current()
            .map_err(|_| PsnError::invalid_state("sender must be started inside a Tokio runtime"))?;

        let std_socket = bind_socket(&config)?;
        let socket = UdpSocket::from_std(std_socket).map_err(|e| PsnError::socket("register", e))?;

        let now = Instant::now();
        self.destination = SocketAddr::V4(SocketAddrV4::new(config.group, config.port));
        self.fragmenter = Fragmenter::new(config.mtu)?;
        self.started_at = now;
        self.next_info = now;
        self.next_data = now;
        self.provider = Some(Box::new(provider));
        self.socket = Some(socket);

        info!(
            "PSN sender '{}' sending to {} (INFO every {:?}, DATA {:?})",
            config.system_name, self.destination, config.info_interval, config.data_rate
        );
        self.config = config;
        Ok(())
    }

    /// Closes the socket and releases the provider. Safe to call at any time.
    pub fn stop(&mut self) {
        if self.socket.take().is_some() {
            self.provider = None;
            info!("PSN sender stopped");
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|socket| socket.local_addr().ok())
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// One send step.
    ///
    /// Sends an INFO frame and/or a DATA frame if their deadlines have
    /// passed and returns how many frames went out. A failed send is not
    /// retried until the next deadline; the first failure is returned.
    pub async fn tick(&mut self, now: Instant) -> Result<usize> {
        if !self.is_sending() {
            return Ok(0);
        }

        let mut sent = 0;
        let mut first_error = None;

        if now >= self.next_info {
            self.next_info = advance(self.next_info, self.config.info_interval, now);
            match self.send_info(now).await {
                Ok(()) => sent += 1,
                Err(e) => first_error = Some(e),
            }
        }

        let data_due = match self.config.data_rate.interval() {
            None => true,
            Some(interval) if now >= self.next_data => {
                self.next_data = advance(self.next_data, interval, now);
                true
            }
            Some(_) => false,
        };

        if data_due {
            match self.send_data(now).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }

    /// Sends an INFO frame now, outside the schedule.
    pub async fn send_info(&mut self, now: Instant) -> Result<()> {
        let trackers = self.pull_trackers()?;
        let header = PacketHeader::new(timestamp_usec(self.started_at, now), self.info_frame_id);
        self.info_frame_id = self.info_frame_id.wrapping_add(1);

        let encoded = build_info_packet(header, &self.config.system_name, &trackers)
            .split()
            .and_then(|parts| {
                parts
                    .iter()
                    .map(InfoPacket::encode)
                    .collect::<Result<Vec<_>>>()
            });
        let parts = self.encode(encoded, "INFO")?;

        for part in &parts {
            self.emit(part).await?;
            self.stats.info_packets += 1;
        }
        trace!(
            "Sent INFO with {} trackers in {} packets",
            trackers.len(),
            parts.len()
        );
        Ok(())
    }

    /// Sends a DATA frame now, outside the schedule.
    ///
    /// Trackers that do not fit in one PSN packet are spread over several
    /// packets sharing the frame id.
    pub async fn send_data(&mut self, now: Instant) -> Result<()> {
        let trackers = self.pull_trackers()?;
        let header = PacketHeader::new(timestamp_usec(self.started_at, now), self.data_frame_id);
        self.data_frame_id = self.data_frame_id.wrapping_add(1);

        let encoded = build_data_packet(header, &trackers)
            .split()
            .and_then(|parts| {
                parts
                    .iter()
                    .map(DataPacket::encode)
                    .collect::<Result<Vec<_>>>()
            });
        let parts = self.encode(encoded, "DATA")?;

        for part in &parts {
            self.emit(part).await?;
            self.stats.data_packets += 1;
        }
        trace!(
            "Sent DATA frame {} with {} trackers in {} packets",
            header.frame_id,
            trackers.len(),
            parts.len()
        );
        Ok(())
    }

    fn pull_trackers(&mut self) -> Result<Vec<TrackedObject>> {
        match self.provider.as_mut() {
            Some(provider) => Ok(provider.trackers()),
            None => Err(PsnError::invalid_state("sender is not sending")),
        }
    }

    fn encode<T>(&mut self, encoded: Result<T>, kind: &str) -> Result<T> {
        encoded.map_err(|e| {
            self.stats.encode_failures += 1;
            error!("Failed to encode {} packet: {}", kind, e);
            e
        })
    }

    async fn emit(&mut self, packet: &[u8]) -> Result<()> {
        let frame_id = self.transport_frame_id;
        self.transport_frame_id = self.transport_frame_id.wrapping_add(1);

        let datagrams = self.fragmenter.fragment(frame_id, packet).map_err(|e| {
            self.stats.encode_failures += 1;
            e
        })?;

        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| PsnError::invalid_state("sender is not sending"))?;

        for datagram in &datagrams {
            if let Err(e) = socket.send_to(datagram, self.destination).await {
                self.stats.send_failures += 1;
                warn!("Failed to send to {}: {}", self.destination, e);
                return Err(PsnError::socket("send", e));
            }
            self.stats.datagrams_sent += 1;
        }

        if datagrams.len() > 1 {
            debug!("Frame {} sent as {} datagrams", frame_id, datagrams.len());
        }
        Ok(())
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }
}

fn bind_socket(config: &SenderConfig) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| PsnError::socket("create", e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| PsnError::socket("SO_REUSEADDR", e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| PsnError::socket("set_nonblocking", e))?;

    if config.group.is_multicast() {
        socket
            .set_multicast_ttl_v4(config.multicast_ttl)
            .map_err(|e| PsnError::socket("IP_MULTICAST_TTL", e))?;
        socket
            .set_multicast_loop_v4(config.multicast_loopback)
            .map_err(|e| PsnError::socket("IP_MULTICAST_LOOP", e))?;
        if !config.interface.is_unspecified() {
            socket
                .set_multicast_if_v4(&config.interface)
                .map_err(|e| PsnError::socket("IP_MULTICAST_IF", e))?;
        }
    }

    let bind_addr = SocketAddrV4::new(config.interface, 0);
    socket
        .bind(&bind_addr.into())
        .map_err(|e| PsnError::socket("bind", e))?;

    Ok(socket.into())
}
