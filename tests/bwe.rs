//! Controller behavior over emulated links.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vivace_bwe::{BandwidthController, Bitrate, BweConfig, DirectionState, SentPacketRecord};

mod common;
use common::{init_log, record_estimates, LinkConfig, Sim};

#[test]
pub fn startup_estimate_matches_received_bitrate() {
    init_log();

    let mut c = BandwidthController::default();
    let estimates = record_estimates(&mut c);

    // 20 packets of 1kB, 5ms apart.
    for seq in 0..20 {
        c.sent_packet(SentPacketRecord::media(seq, 1000, seq as u64 * 5_000));
    }

    // Constant 20ms delay, no loss.
    let packets: BTreeMap<u32, Option<u64>> = (0..20)
        .map(|seq| (seq, Some(seq as u64 * 5_000 + 20_000)))
        .collect();
    c.received_feedback(0, &packets, 150_000);

    // Startup interval is still open.
    assert!(estimates.lock().unwrap().is_empty());
    assert_eq!(c.estimated_bitrate(), Bitrate::kbps(512));
    assert_eq!(c.intervals().len(), 1);

    // Feedback for a packet sent after the startup interval resolves it.
    c.sent_packet(SentPacketRecord::media(20, 1000, 1_100_000));
    let packets: BTreeMap<u32, Option<u64>> = [(20, Some(1_120_000))].into();
    c.received_feedback(1, &packets, 1_150_000);

    let achieved = 1_600_000.0;
    let estimate = c.estimated_bitrate().as_f64();
    assert!(
        (estimate - achieved).abs() / achieved < 0.1,
        "Estimate {} too far from {}",
        c.estimated_bitrate(),
        achieved
    );
    assert_eq!(c.available_bitrate(), c.estimated_bitrate());
    assert_eq!(estimates.lock().unwrap().as_slice(), &[c.estimated_bitrate()]);

    // Followed by a probing pair around the estimate.
    let intervals = c.intervals();
    assert_eq!(intervals.len(), 2);
    assert_eq!(intervals[0].start_us(), 1_100_000);
    assert_eq!(intervals[1].start_us(), 1_600_000);
    let mean = (intervals[0].target_bitrate().as_f64() + intervals[1].target_bitrate().as_f64()) / 2.0;
    assert!((mean - estimate).abs() < 1.0);
}

#[test]
pub fn overshooting_sender_is_capped_at_link_capacity() {
    init_log();

    let capacity = Bitrate::mbps(1);
    let mut sim = Sim::new(
        BandwidthController::default(),
        LinkConfig::new().capacity(capacity),
    );
    let estimates = record_estimates(&mut sim.controller);

    // An encoder that always sends 50% above what it is asked for.
    sim.run(|c| c.target_bitrate() * 1.5, 2_500_000, |_| {});

    let estimates = estimates.lock().unwrap();
    assert!(estimates.len() >= 2, "Expected startup and probe estimates");
    for e in estimates.iter() {
        assert!(
            e.as_f64() <= capacity.as_f64() * 1.1,
            "Estimate {} above link capacity {}",
            e,
            capacity
        );
    }
    assert_eq!(sim.controller.state(), DirectionState::OverShoot);
}

#[test]
pub fn clean_link_keeps_estimate_near_sending_rate() {
    init_log();

    let mut sim = Sim::new(BandwidthController::default(), LinkConfig::new());
    let estimates = record_estimates(&mut sim.controller);

    sim.run(|c| c.target_bitrate(), 5_000_000, |_| {});

    let estimates = estimates.lock().unwrap();
    assert!(estimates.len() >= 3);
    for e in estimates.iter() {
        assert!(
            *e >= Bitrate::kbps(400) && *e <= Bitrate::kbps(800),
            "Estimate {} drifted",
            e
        );
    }
}

#[test]
pub fn loss_lowers_estimate() {
    init_log();

    let mut clean = Sim::new(BandwidthController::default(), LinkConfig::new());
    clean.run(|c| c.target_bitrate(), 5_000_000, |_| {});

    let mut lossy = Sim::new(
        BandwidthController::default(),
        LinkConfig::new().loss_every(10),
    );
    lossy.run(|c| c.target_bitrate(), 5_000_000, |_| {});

    assert!(
        lossy.controller.estimated_bitrate() < clean.controller.estimated_bitrate(),
        "lossy {} clean {}",
        lossy.controller.estimated_bitrate(),
        clean.controller.estimated_bitrate()
    );
}

#[test]
pub fn estimate_stays_within_bounds() {
    init_log();

    let config = BweConfig::new();
    let (min, max) = (config.min_bitrate(), config.max_bitrate());
    let mut c = config.build();
    let mut rng = StdRng::seed_from_u64(42);

    let mut now = 0_u64;
    let mut pending: Vec<(u32, u64)> = Vec::new();
    let mut last_report = BTreeMap::new();

    for seq in 0..5_000_u32 {
        now += rng.random_range(0..20_000);
        let size = rng.random_range(50..1500);
        let record = match rng.random_range(0..10) {
            0 => SentPacketRecord::retransmission(seq, size, now),
            1 => SentPacketRecord::probing(seq, size, now),
            _ => SentPacketRecord::media(seq, size, now),
        };
        c.sent_packet(record);
        pending.push((seq, now));

        if rng.random_bool(0.01) {
            c.update_rtt(now, rng.random_range(0..300));
        }

        if rng.random_bool(0.1) {
            let mut report = BTreeMap::new();
            for (seq, sent) in pending.drain(..) {
                let arrival = if rng.random_bool(0.1) {
                    None
                } else {
                    Some(sent + rng.random_range(5_000..400_000))
                };
                report.insert(seq, arrival);
            }
            // Sequence numbers that were never sent.
            report.insert(seq + 1_000_000, Some(now));

            c.received_feedback(0, &report, now + rng.random_range(0..300_000));
            assert!(
                c.estimated_bitrate() >= min && c.estimated_bitrate() <= max,
                "Estimate {} out of bounds",
                c.estimated_bitrate()
            );

            // Duplicate delivery of the previous report.
            c.received_feedback(0, &last_report, now);
            assert!(c.estimated_bitrate() >= min && c.estimated_bitrate() <= max);

            last_report = report;
        }
    }
}

#[test]
pub fn inverted_bounds_from_config_file_do_not_panic() {
    init_log();

    let config: BweConfig =
        serde_json::from_str(r#"{ "min_bitrate": 500000.0, "max_bitrate": 200000.0 }"#).unwrap();
    let mut c = config.build();
    let estimates = record_estimates(&mut c);

    // No feedback, the startup interval and the following pair time out.
    for seq in 0..400 {
        c.sent_packet(SentPacketRecord::media(seq, 1200, seq as u64 * 10_000));
    }

    let estimates = estimates.lock().unwrap();
    assert!(estimates.len() >= 2);
    assert!(estimates.iter().all(|e| *e == Bitrate::kbps(500)));
}

#[test]
pub fn ledger_is_bounded_without_feedback() {
    init_log();

    let mut c = BandwidthController::default();
    let estimates = record_estimates(&mut c);

    // 1Mbit/s of 1200 byte packets for 10s, all feedback lost.
    let gap = 9_600;
    let mut max_pending = 0;
    for seq in 0..(10_000_000 / gap) as u32 {
        c.sent_packet(SentPacketRecord::media(seq, 1200, seq as u64 * gap));
        max_pending = max_pending.max(c.stats().pending_packets);
    }

    // Startup (1s) or a probe pair (2 x 500ms) plus 750ms of feedback timeout.
    assert!(max_pending <= 200, "Ledger grew to {}", max_pending);

    // Re-estimated on every timeout, without any feedback the floor is all we know.
    assert!(estimates.lock().unwrap().len() >= 4);
    assert_eq!(c.estimated_bitrate(), Bitrate::kbps(128));
}
