use clap::Parser;
use log::{error, info, warn};
use psn_protocol::{TrackerData, DEFAULT_MULTICAST_GROUP, DEFAULT_PORT};
use psn_sender::{SendRate, Sender, SenderConfig, SharedTrackerTable};
use rand::Rng;
use std::net::Ipv4Addr;
use std::time::Instant;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Broadcasts a set of trackers moving in circles.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Destination multicast group or unicast address
    #[arg(short = 'g', long, default_value_t = DEFAULT_MULTICAST_GROUP)]
    group: Ipv4Addr,

    /// Destination UDP port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Outgoing interface address for multicast
    #[arg(short = 'i', long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    interface: Ipv4Addr,

    /// System name announced in INFO packets
    #[arg(short = 'n', long, default_value = "PSN Sender")]
    name: String,

    /// Number of simulated trackers
    #[arg(short = 'c', long, default_value = "4")]
    trackers: u16,

    /// DATA packets per second
    #[arg(short = 'r', long, default_value = "60")]
    rate: u32,

    /// Multicast time-to-live
    #[arg(long, default_value = "1")]
    ttl: u32,

    /// Do not loop multicast back to this host
    #[arg(long)]
    no_loopback: bool,

    /// Orbit radius in metres
    #[arg(long, default_value = "2.0")]
    radius: f32,
}

struct Orbit {
    id: u16,
    phase: f32,
    speed: f32,
    height: f32,
}

impl Orbit {
    fn state(&self, radius: f32, t: f32) -> TrackerData {
        let angle = self.phase + self.speed * t;
        let (sin, cos) = angle.sin_cos();
        TrackerData::new(self.id)
            .with_position((radius * cos, self.height, radius * sin))
            .with_speed((-radius * self.speed * sin, 0.0, radius * self.speed * cos))
            .with_orientation((0.0, -angle.to_degrees(), 0.0))
            .with_acceleration((
                -radius * self.speed * self.speed * cos,
                0.0,
                -radius * self.speed * self.speed * sin,
            ))
            .with_status(1.0)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let data_rate = SendRate::from_hz(args.rate).ok_or("rate must be at least 1 Hz")?;
    let config = SenderConfig {
        group: args.group,
        port: args.port,
        interface: args.interface,
        system_name: args.name.clone(),
        data_rate,
        multicast_ttl: args.ttl,
        multicast_loopback: !args.no_loopback,
        ..Default::default()
    };

    let table = SharedTrackerTable::new();
    let mut rng = rand::thread_rng();
    let orbits: Vec<Orbit> = (1..=args.trackers)
        .map(|id| Orbit {
            id,
            phase: rng.gen_range(0.0..std::f32::consts::TAU),
            speed: rng.gen_range(0.2..1.0),
            height: rng.gen_range(0.5..2.0),
        })
        .collect();

    {
        let mut trackers = table.lock();
        for orbit in &orbits {
            trackers.add_tracker(orbit.id, format!("Tracker {}", orbit.id));
        }
    }

    info!("Starting PSN sender '{}'...", config.system_name);
    info!("Sending {} trackers at {} Hz to {}:{}", args.trackers, args.rate, config.group, config.port);

    let mut sender = Sender::new(config)?;
    sender.start_with(table.clone())?;

    let started = Instant::now();
    let mut tick_interval = interval(Duration::from_millis(1));
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report_interval = interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                let now = Instant::now();
                let t = now.duration_since(started).as_secs_f32();
                {
                    let mut trackers = table.lock();
                    for orbit in &orbits {
                        trackers.update_tracker(orbit.id, orbit.state(args.radius, t));
                    }
                }

                if let Err(e) = sender.tick(now).await {
                    if e.is_recoverable() {
                        warn!("Send failed, retrying on next tick: {}", e);
                    } else {
                        error!("Send failed: {}", e);
                    }
                }
            }

            _ = report_interval.tick() => {
                let stats = sender.stats();
                info!(
                    "Sent {} INFO and {} DATA packets in {} datagrams ({} failures)",
                    stats.info_packets,
                    stats.data_packets,
                    stats.datagrams_sent,
                    stats.send_failures + stats.encode_failures
                );
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    sender.stop();
    Ok(())
}
