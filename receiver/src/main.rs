use clap::Parser;
use log::{debug, error, info};
use psn_protocol::{Packet, TrackerData, DEFAULT_MULTICAST_GROUP, DEFAULT_PORT};
use psn_receiver::{Receiver, ReceiverConfig, TrackerRegistryEntry};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Multicast group to join, or a unicast address to bind
    #[arg(short = 'g', long, default_value_t = DEFAULT_MULTICAST_GROUP)]
    group: Ipv4Addr,

    /// UDP port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Local interface address used for the multicast join
    #[arg(short = 'i', long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    interface: Ipv4Addr,

    /// Do not receive datagrams sent from this host
    #[arg(long)]
    no_loopback: bool,

    /// Seconds without updates before a tracker is dropped
    #[arg(short = 's', long, default_value = "2.0")]
    staleness: f64,

    /// Receive tick interval in milliseconds
    #[arg(short = 't', long, default_value = "10")]
    tick_ms: u64,

    /// Print interval in milliseconds
    #[arg(long, default_value = "1000")]
    print_ms: u64,

    /// Print tracker snapshots as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct TrackerLine<'a> {
    id: u16,
    name: Option<&'a str>,
    system_name: Option<&'a str>,
    source: String,
    frame_id: u8,
    age_ms: u128,
    data: Option<&'a TrackerData>,
}

impl<'a> TrackerLine<'a> {
    fn new(entry: &'a TrackerRegistryEntry, now: Instant) -> Self {
        Self {
            id: entry.id,
            name: entry.name.as_deref(),
            system_name: entry.system_name.as_deref(),
            source: entry.source.to_string(),
            frame_id: entry.frame_id,
            age_ms: now.saturating_duration_since(entry.last_seen).as_millis(),
            data: entry.last_data.as_ref(),
        }
    }
}

fn print_trackers(trackers: &[TrackerRegistryEntry], json: bool) {
    let now = Instant::now();

    if json {
        for entry in trackers {
            match serde_json::to_string(&TrackerLine::new(entry, now)) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to serialize tracker {}: {}", entry.id, e),
            }
        }
        return;
    }

    println!("{} trackers", trackers.len());
    for entry in trackers {
        let position = entry
            .last_data
            .as_ref()
            .and_then(|data| data.position)
            .map(|p| format!("({:.3}, {:.3}, {:.3})", p.x, p.y, p.z))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  [{:>5}] {:<20} pos {:<32} from {}",
            entry.id,
            entry.name.as_deref().unwrap_or("?"),
            position,
            entry.source
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ReceiverConfig {
        group: args.group,
        port: args.port,
        interface: args.interface,
        multicast_loopback: !args.no_loopback,
        staleness_timeout: Duration::from_secs_f64(args.staleness.max(0.001)),
        ..Default::default()
    };

    info!("Starting PSN receiver...");
    info!("Group: {}:{} on {}", config.group, config.port, config.interface);

    let mut receiver = Receiver::new(config)?;
    receiver.listen()?;
    let mut packets = receiver.subscribe();

    let mut tick_interval = interval(Duration::from_millis(args.tick_ms.max(1)));
    let mut print_interval = interval(Duration::from_millis(args.print_ms.max(1)));

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                if let Err(e) = receiver.tick(Instant::now()).await {
                    error!("Receive tick failed: {}", e);
                }
            }

            Some(event) = packets.recv() => {
                match event.packet {
                    Packet::Info(info) => debug!(
                        "INFO from {} ({}): {} trackers",
                        event.source,
                        info.system_name.as_deref().unwrap_or("unnamed"),
                        info.trackers.len()
                    ),
                    Packet::Data(data) => debug!(
                        "DATA frame {} part of {} from {}: {} trackers",
                        data.header.frame_id,
                        data.header.frame_packet_count,
                        event.source,
                        data.trackers.len()
                    ),
                }
            }

            _ = print_interval.tick() => {
                let trackers = receiver.list_trackers().await;
                print_trackers(&trackers, args.json);
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    let stats = receiver.stats();
    receiver.stop();
    info!(
        "Received {} datagrams, {} INFO and {} DATA packets, {} dropped",
        stats.datagrams_received,
        stats.info_packets,
        stats.data_packets,
        stats.malformed_datagrams
            + stats.reassembly_conflicts
            + stats.expired_frames
            + stats.evicted_frames
            + stats.decode_failures
            + stats.unknown_packet_types
    );

    Ok(())
}
