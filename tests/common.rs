#![allow(unused)]
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, Once};

use vivace_bwe::{BandwidthController, Bitrate, SentPacketRecord};

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}

/// Collects every bitrate handed to the listener.
pub fn record_estimates(controller: &mut BandwidthController) -> Arc<Mutex<Vec<Bitrate>>> {
    let estimates = Arc::new(Mutex::new(Vec::new()));
    let sink = estimates.clone();
    controller.set_listener(move |bitrate: Bitrate| {
        sink.lock().unwrap().push(bitrate);
    });
    estimates
}

/// Configuration of the emulated bottleneck.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// Bottleneck capacity, `None` for unlimited.
    pub capacity: Option<Bitrate>,
    /// One-way propagation delay.
    pub latency_us: u64,
    /// Drop every n-th packet.
    pub loss_every: Option<u32>,
}

impl LinkConfig {
    pub fn new() -> Self {
        LinkConfig {
            capacity: None,
            latency_us: 20_000,
            loss_every: None,
        }
    }

    pub fn capacity(mut self, v: Bitrate) -> Self {
        self.capacity = Some(v);
        self
    }

    pub fn latency_us(mut self, v: u64) -> Self {
        self.latency_us = v;
        self
    }

    pub fn loss_every(mut self, n: u32) -> Self {
        self.loss_every = Some(n);
        self
    }
}

/// FIFO bottleneck with a fixed propagation delay, producing transport-wide feedback.
pub struct Link {
    config: LinkConfig,
    /// When the bottleneck is free to serialize the next packet.
    busy_until_us: u64,
    sent: u32,
    /// `(seq, arrival time, received)` in send order.
    in_flight: VecDeque<(u32, u64, bool)>,
    feedback_count: u8,
}

impl Link {
    pub fn new(config: LinkConfig) -> Self {
        Link {
            config,
            busy_until_us: 0,
            sent: 0,
            in_flight: VecDeque::new(),
            feedback_count: 0,
        }
    }

    pub fn send(&mut self, seq: u32, size: u32, send_time_us: u64) {
        self.sent += 1;

        let lost = self
            .config
            .loss_every
            .is_some_and(|n| n > 0 && self.sent % n == 0);

        let start = send_time_us.max(self.busy_until_us);
        let serialize_us = match self.config.capacity {
            Some(c) => (size as f64 * 8.0 * 1_000_000.0 / c.as_f64()) as u64,
            None => 0,
        };
        let done = start + serialize_us;
        if !lost {
            self.busy_until_us = done;
        }

        self.in_flight
            .push_back((seq, done + self.config.latency_us, !lost));
    }

    /// Feedback for every packet that arrived (or would have) by `now_us`.
    pub fn feedback(&mut self, now_us: u64) -> Option<(u8, BTreeMap<u32, Option<u64>>)> {
        let mut packets = BTreeMap::new();
        while let Some(&(seq, arrival, received)) = self.in_flight.front() {
            if arrival > now_us {
                break;
            }
            self.in_flight.pop_front();
            packets.insert(seq, received.then_some(arrival));
        }

        if packets.is_empty() {
            return None;
        }

        let count = self.feedback_count;
        self.feedback_count = self.feedback_count.wrapping_add(1);
        Some((count, packets))
    }
}

/// Paced sender pushing fixed size packets through a [`Link`] into a controller.
pub struct Sim {
    pub controller: BandwidthController,
    pub link: Link,
    pub now_us: u64,
    pub seq: u32,
    pub packet_size: u32,
    pub feedback_interval_us: u64,
    next_feedback_us: u64,
}

impl Sim {
    pub fn new(controller: BandwidthController, link: LinkConfig) -> Self {
        Sim {
            controller,
            link: Link::new(link),
            now_us: 0,
            seq: 0,
            packet_size: 1200,
            feedback_interval_us: 100_000,
            next_feedback_us: 100_000,
        }
    }

    /// Send at `rate` for `duration_us`, delivering feedback on schedule.
    ///
    /// `check` is called after every feedback report.
    pub fn run(
        &mut self,
        rate: impl Fn(&BandwidthController) -> Bitrate,
        duration_us: u64,
        mut check: impl FnMut(&BandwidthController),
    ) {
        let end = self.now_us + duration_us;
        while self.now_us < end {
            let record = SentPacketRecord::media(self.seq, self.packet_size, self.now_us);
            self.controller.sent_packet(record);
            self.link.send(self.seq, self.packet_size, self.now_us);
            self.seq += 1;

            let bitrate = rate(&self.controller).as_f64().max(1.0);
            let gap = (self.packet_size as f64 * 8.0 * 1_000_000.0 / bitrate) as u64;
            self.now_us += gap.max(1);

            while self.now_us >= self.next_feedback_us {
                let at = self.next_feedback_us;
                if let Some((count, packets)) = self.link.feedback(at) {
                    self.controller.received_feedback(count, &packets, at);
                    check(&self.controller);
                }
                self.next_feedback_us += self.feedback_interval_us;
            }
        }
    }
}
