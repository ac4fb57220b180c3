//! Performance benchmarks for the hot paths of the RCON client

use client::correlator::parse_player_line;
use client::roster::Roster;
use shared::codec::{command_packet, parse_frame, split_response, Packet, Reassembler};
use shared::ObservedPlayer;
use std::time::{Duration, Instant};

fn observed_players(count: u32) -> Vec<ObservedPlayer> {
    (0..count)
        .map(|i| ObservedPlayer::new(i, &format!("{:08x}-uid", i), &format!("Player{}", i)))
        .collect()
}

/// Benchmarks frame building and checksum verification
#[test]
fn benchmark_frame_codec() {
    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let frame = command_packet((i % 256) as u8, "players");
        let _ = shared::codec::frame_payload(&frame).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Frame codec: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks reassembly of a large multipacket response
#[test]
fn benchmark_reassembly() {
    let listing: String = observed_players(100)
        .iter()
        .map(|p| format!("{}\n", p))
        .collect();
    let frames = split_response(7, listing.as_bytes(), 64);

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut reassembler = Reassembler::new();
        let mut complete = None;

        for frame in &frames {
            if let Ok(Packet::CommandFragment {
                sequence,
                total,
                index,
                data,
            }) = parse_frame(frame)
            {
                complete = reassembler.push(sequence, total, index, data);
            }
        }

        assert_eq!(complete.as_deref(), Some(listing.as_bytes()));
    }

    let duration = start.elapsed();
    println!(
        "Reassembly: {} iterations of {} fragments in {:?}",
        iterations,
        frames.len(),
        duration
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks parsing and merging a full 100 player listing
#[test]
fn benchmark_roster_merge() {
    let listing: Vec<String> = observed_players(100).iter().map(ToString::to_string).collect();
    let mut roster = Roster::new(Duration::from_secs(120));

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let observed: Vec<ObservedPlayer> = listing
            .iter()
            .filter_map(|line| parse_player_line(line))
            .collect();
        roster.merge(&observed, Instant::now());
    }

    let duration = start.elapsed();
    println!(
        "Roster merge: {} iterations of 100 players in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(roster.len(), 100);
    assert!(duration.as_millis() < 5000);
}
