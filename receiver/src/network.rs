use crate::config::{ReceiverConfig, RECEIVE_BUFFER_LEN};
use crate::registry::{SharedRegistry, TrackerRegistry, TrackerRegistryEntry};
use log::{debug, info, trace, warn};
use psn_protocol::{decode_packet, Packet, PacketKind, PsnError, Reassembler, Result};
use serde::Serialize;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Stopped,
    Listening,
}

/// Diagnostic counters. Every dropped datagram, frame or packet lands in exactly one of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub malformed_datagrams: u64,
    pub reassembly_conflicts: u64,
    pub expired_frames: u64,
    /// Incomplete frames pushed out when the reassembly table was full.
    pub evicted_frames: u64,
    pub decode_failures: u64,
    pub unknown_packet_types: u64,
    pub info_packets: u64,
    pub data_packets: u64,
    pub trackers_evicted: u64,
    pub receive_errors: u64,
}

/// A decoded packet and the address it came from, as pushed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPacket {
    pub source: SocketAddr,
    pub packet: Packet,
}

struct Membership {
    group: Ipv4Addr,
    interface: Ipv4Addr,
}

/// PSN receiver
///
/// Owns one UDP socket while listening. The host drives it by calling
/// [`Receiver::tick`] from its own loop; nothing runs in the background.
pub struct Receiver {
    config: ReceiverConfig,
    socket: Option<UdpSocket>,
    membership: Option<Membership>,
    reassembler: Reassembler,
    registry: SharedRegistry,
    stats: ReceiverStats,
    buffer: Vec<u8>,
    subscribers: Vec<mpsc::UnboundedSender<ReceivedPacket>>,
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reassembler: Reassembler::new(config.reassembly_timeout, config.max_pending_frames),
            registry: TrackerRegistry::shared(config.staleness_timeout),
            config,
            socket: None,
            membership: None,
            stats: ReceiverStats::default(),
            buffer: vec![0u8; RECEIVE_BUFFER_LEN],
            subscribers: Vec::new(),
        })
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn state(&self) -> ReceiverState {
        if self.socket.is_some() {
            ReceiverState::Listening
        } else {
            ReceiverState::Stopped
        }
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ReceiverState::Listening
    }

    /// Starts listening on the configured group, port and interface.
    pub fn listen(&mut self) -> Result<()> {
        let (group, port, interface) = (self.config.group, self.config.port, self.config.interface);
        self.start(group, port, interface)
    }

    /// Binds the socket and joins `group` on `interface`.
    ///
    /// A non-multicast `group` is bound directly as a unicast address. Must be
    /// called from within a Tokio runtime. Bind and join failures are returned
    /// as [`PsnError::Socket`] and leave the receiver stopped.
    pub fn start(&mut self, group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> Result<()> {
        if self.is_listening() {
            return Err(PsnError::invalid_state("receiver is already listening"));
        }

        let config = ReceiverConfig {
            group,
            port,
            interface,
            ..self.config.clone()
        };
        config.validate()?;

        tokio::runtime::Handle::try_current()
            .map_err(|_| PsnError::invalid_state("receiver must be started inside a Tokio runtime"))?;

        let std_socket = bind_socket(&config)?;
        let socket = UdpSocket::from_std(std_socket).map_err(|e| PsnError::socket("register", e))?;

        match socket.local_addr() {
            Ok(addr) if config.is_multicast() => {
                info!("PSN receiver listening on {} (group {})", addr, config.group)
            }
            Ok(addr) => info!("PSN receiver listening on {}", addr),
            Err(_) => info!("PSN receiver listening on {}:{}", config.group, config.port),
        }

        self.membership = config.is_multicast().then_some(Membership {
            group: config.group,
            interface: config.interface,
        });
        self.reassembler = Reassembler::new(config.reassembly_timeout, config.max_pending_frames);
        self.config = config;
        self.socket = Some(socket);
        Ok(())
    }

    /// Leaves the group, closes the socket and drops pending fragments.
    ///
    /// Safe to call at any time. Known trackers stay in the registry.
    pub fn stop(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };

        if let Some(membership) = self.membership.take() {
            if let Err(e) =
                SockRef::from(&socket).leave_multicast_v4(&membership.group, &membership.interface)
            {
                warn!("Failed to leave group {}: {}", membership.group, e);
            }
        }

        drop(socket);
        self.reassembler.clear();
        info!("PSN receiver stopped");
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|socket| socket.local_addr().ok())
    }

    /// One receive-and-process step.
    ///
    /// Reads up to `max_datagrams_per_tick` datagrams, waiting at most
    /// `poll_timeout` for each, then runs the maintenance pass. Returns the
    /// number of datagrams read. A stopped receiver reads nothing.
    pub async fn tick(&mut self, now: Instant) -> Result<usize> {
        if !self.is_listening() {
            return Ok(0);
        }

        let mut read = 0;
        while read < self.config.max_datagrams_per_tick {
            let Some((len, source)) = self.recv_once().await else {
                break;
            };
            read += 1;

            let buffer = std::mem::take(&mut self.buffer);
            self.handle_datagram(source, &buffer[..len], now).await;
            self.buffer = buffer;
        }

        self.maintain(now).await;
        Ok(read)
    }

    async fn recv_once(&mut self) -> Option<(usize, SocketAddr)> {
        let socket = self.socket.as_ref()?;
        match timeout(self.config.poll_timeout, socket.recv_from(&mut self.buffer)).await {
            Ok(Ok(received)) => Some(received),
            Ok(Err(e)) => {
                warn!("Error receiving datagram: {}", e);
                self.stats.receive_errors += 1;
                None
            }
            Err(_) => None,
        }
    }

    /// Routes one datagram through reassembly and decoding into the registry.
    ///
    /// Returns the kind of packet this datagram completed, if any. Failures
    /// are counted and dropped.
    pub async fn handle_datagram(
        &mut self,
        source: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) -> Option<PacketKind> {
        self.stats.datagrams_received += 1;
        self.stats.bytes_received += datagram.len() as u64;

        let evicted_before = self.reassembler.stats().evicted;
        let accepted = self.reassembler.accept(source, datagram, now);
        self.stats.evicted_frames += self.reassembler.stats().evicted - evicted_before;

        let bytes = match accepted {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                match e {
                    PsnError::ReassemblyConflict { .. } => self.stats.reassembly_conflicts += 1,
                    _ => self.stats.malformed_datagrams += 1,
                }
                debug!("Dropped datagram from {}: {}", source, e);
                return None;
            }
        };

        let packet = match decode_packet(&bytes) {
            Ok(packet) => packet,
            Err(e) => {
                match e {
                    PsnError::UnknownPacketType { .. } => self.stats.unknown_packet_types += 1,
                    _ => self.stats.decode_failures += 1,
                }
                debug!("Dropped packet from {}: {}", source, e);
                return None;
            }
        };

        let kind = packet.kind();
        {
            let mut registry = self.registry.write().await;
            match &packet {
                Packet::Info(info) => {
                    let named = registry.apply_info(info, source, now);
                    self.stats.info_packets += 1;
                    trace!("INFO from {}: {} trackers", source, named);
                }
                Packet::Data(data) => {
                    let updated = registry.apply_data(data, source, now);
                    self.stats.data_packets += 1;
                    trace!(
                        "DATA frame {} from {}: {} trackers",
                        data.header.frame_id,
                        source,
                        updated
                    );
                }
            }
        }

        self.publish(source, packet);
        Some(kind)
    }

    /// Registers a channel that receives every packet decoded from now on.
    ///
    /// Packets are pushed after the registry has been updated, in decode
    /// order. Dropping the returned receiver unsubscribes it.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ReceivedPacket> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn publish(&mut self, source: SocketAddr, packet: Packet) {
        if self.subscribers.is_empty() {
            return;
        }

        let event = ReceivedPacket { source, packet };
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Expires stale fragment buffers and tracker entries. Returns the evicted tracker ids.
    pub async fn maintain(&mut self, now: Instant) -> Vec<u16> {
        self.stats.expired_frames += self.reassembler.sweep(now) as u64;

        let evicted = self.registry.write().await.evict_stale(now);
        if !evicted.is_empty() {
            debug!("Evicted stale trackers {:?}", evicted);
            self.stats.trackers_evicted += evicted.len() as u64;
        }
        evicted
    }

    /// Snapshot of every known tracker, ordered by id.
    pub async fn list_trackers(&self) -> Vec<TrackerRegistryEntry> {
        self.registry.read().await.snapshot()
    }

    pub async fn get_tracker(&self, id: u16) -> Option<TrackerRegistryEntry> {
        self.registry.read().await.get(id)
    }

    /// Handle for reading the registry from other tasks.
    pub fn registry(&self) -> SharedRegistry {
        SharedRegistry::clone(&self.registry)
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn pending_frames(&self) -> usize {
        self.reassembler.pending()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_socket(config: &ReceiverConfig) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| PsnError::socket("create", e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| PsnError::socket("SO_REUSEADDR", e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| PsnError::socket("set_nonblocking", e))?;

    if config.is_multicast() {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| PsnError::socket("bind", e))?;
        socket
            .join_multicast_v4(&config.group, &config.interface)
            .map_err(|e| PsnError::socket("IP_ADD_MEMBERSHIP", e))?;
        socket
            .set_multicast_loop_v4(config.multicast_loopback)
            .map_err(|e| PsnError::socket("IP_MULTICAST_LOOP", e))?;
    } else {
        if config.multicast_loopback {
            warn!(
                "{} is not a multicast address, multicast loopback does not apply",
                config.group
            );
        }
        let bind_addr = SocketAddrV4::new(config.group, config.port);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| PsnError::socket("bind", e))?;
    }

    Ok(socket.into())
}
