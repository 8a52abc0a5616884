//! Throughput checks for the PSN codec and transport layers

use psn_protocol::{
    decode_chunks, decode_packet, encode_data_packet, Chunk, Fragmenter, Reassembler, TrackerData,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

fn full_trackers(count: u16) -> Vec<TrackerData> {
    (1..=count)
        .map(|id| {
            let f = id as f32;
            TrackerData::new(id)
                .with_position((f, f * 0.5, -f))
                .with_speed((0.1, 0.2, 0.3))
                .with_orientation((0.0, f, 0.0))
                .with_status(1.0)
                .with_acceleration((0.0, -9.81, 0.0))
                .with_target_position((f, 0.0, f))
                .with_timestamp(id as u64 * 1000)
        })
        .collect()
}

/// Benchmarks DATA packet encoding
#[test]
fn benchmark_data_encoding() {
    let trackers = full_trackers(100);
    let iterations = 2_000;
    let start = Instant::now();

    let mut total = 0;
    for frame in 0..iterations {
        total += encode_data_packet(frame as u8, frame as u64, &trackers)
            .unwrap()
            .len();
    }

    let duration = start.elapsed();
    println!(
        "DATA encoding: {} packets ({} bytes) in {:?} ({:.2} μs/packet)",
        iterations,
        total,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration < Duration::from_secs(10));
}

/// Benchmarks DATA packet decoding
#[test]
fn benchmark_data_decoding() {
    let bytes = encode_data_packet(1, 0, &full_trackers(100)).unwrap();
    let iterations = 2_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let packet = decode_packet(&bytes).unwrap();
        assert_eq!(packet.header().frame_id, 1);
    }

    let duration = start.elapsed();
    println!(
        "DATA decoding: {} packets of {} bytes in {:?} ({:.2} μs/packet)",
        iterations,
        bytes.len(),
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration < Duration::from_secs(10));
}

/// Benchmarks fragmentation and reassembly of near-maximum packets
#[test]
fn benchmark_fragment_reassembly() {
    let bytes = encode_data_packet(1, 0, &full_trackers(250)).unwrap();
    let fragmenter = Fragmenter::default();
    let mut reassembler = Reassembler::default();
    let source: SocketAddr = "10.0.0.1:56565".parse().unwrap();

    let iterations: u32 = 2_000;
    let start = Instant::now();

    for frame_id in 0..iterations {
        let datagrams = fragmenter.fragment(frame_id, &bytes).unwrap();
        let mut completed = None;
        for datagram in datagrams.iter().rev() {
            completed = reassembler.accept(source, datagram, start).unwrap();
        }
        assert_eq!(completed.map(|packet| packet.len()), Some(bytes.len()));
    }

    let duration = start.elapsed();
    println!(
        "Fragment/reassemble: {} frames of {} bytes in {:?} ({:.2} μs/frame)",
        iterations,
        bytes.len(),
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(reassembler.pending(), 0);
    assert!(duration < Duration::from_secs(10));
}

/// Benchmarks rejection of maximally nested input
#[test]
fn benchmark_deep_nesting_rejection() {
    let mut chunk = Chunk::leaf(1, vec![0u8; 4]);
    for depth in 0..64 {
        chunk = Chunk::container(depth, vec![chunk]);
    }
    let bytes = chunk.encode().unwrap();

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        assert!(decode_chunks(&bytes).is_err());
    }

    let duration = start.elapsed();
    println!(
        "Deep nesting rejection: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration < Duration::from_secs(5));
}
