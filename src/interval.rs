//! Monitor intervals: fixed send-time windows run at one target bitrate.

use std::fmt;

use crate::ledger::PacketKind;
use crate::{Bitrate, DataSize};

const UTILITY_EXPONENT: f64 = 0.9;
const DELAY_GRADIENT_COEFFICIENT: f64 = 900.0;
const LOSS_COEFFICIENT: f64 = 11.35;

/// Byte totals split by packet class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ByteCounts {
    /// All bytes.
    pub total: DataSize,
    /// Media bytes.
    pub media: DataSize,
    /// Retransmitted bytes.
    pub rtx: DataSize,
    /// Probing bytes.
    pub probing: DataSize,
}

impl ByteCounts {
    fn add(&mut self, size: DataSize, kind: PacketKind) {
        self.total += size;
        match kind {
            PacketKind::Media => self.media += size,
            PacketKind::Retransmission => self.rtx += size,
            PacketKind::Probing => self.probing += size,
        }
    }

    /// Everything except retransmissions.
    pub fn effective(&self) -> DataSize {
        self.total.saturating_sub(self.rtx)
    }
}

/// First and last timestamp seen, `None` until the first sample.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Span {
    first: Option<u64>,
    last: Option<u64>,
}

impl Span {
    fn update(&mut self, t: u64) {
        self.first = Some(self.first.map_or(t, |f| f.min(t)));
        self.last = Some(self.last.map_or(t, |l| l.max(t)));
    }

    fn micros(&self) -> u64 {
        match (self.first, self.last) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        }
    }
}

/// A delay observation: send time and the change in one-way delay since the previous packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DelaySample {
    send_time_us: u64,
    delay_delta_us: i64,
}

/// A fixed window `[start, start + duration]` of send time, tagged with the bitrate the sender
/// was asked to use during it.
///
/// Packets are attributed by send time. Once feedback arrives for a packet sent after the end
/// of the window, the window is considered fully resolved and its statistics are frozen.
#[derive(Debug, Clone)]
pub struct MonitorInterval {
    target_bitrate: Bitrate,
    start_us: u64,
    duration_us: u64,
    sent_span: Span,
    recv_span: Span,
    sent: ByteCounts,
    received: ByteCounts,
    total_sent_packets: u32,
    total_feedbacked_packets: u32,
    lost_packets: u32,
    deltas: Vec<DelaySample>,
    feedback_collection_done: bool,
}

impl MonitorInterval {
    /// Create an interval starting at `start_us` (relative to the first sent packet).
    pub fn new(target_bitrate: Bitrate, start_us: u64, duration_us: u64) -> Self {
        MonitorInterval {
            target_bitrate,
            start_us,
            duration_us,
            sent_span: Span::default(),
            recv_span: Span::default(),
            sent: ByteCounts::default(),
            received: ByteCounts::default(),
            total_sent_packets: 0,
            total_feedbacked_packets: 0,
            lost_packets: 0,
            deltas: Vec::new(),
            feedback_collection_done: false,
        }
    }

    /// Account a sent packet. Returns `false` if it was sent outside the window.
    pub fn sent_packet(&mut self, send_time_us: u64, size: DataSize, kind: PacketKind) -> bool {
        if send_time_us < self.start_us || send_time_us > self.end_us() {
            return false;
        }

        self.sent_span.update(send_time_us);
        self.sent.add(size, kind);
        self.total_sent_packets = self.total_sent_packets.saturating_add(1);

        true
    }

    /// Account feedback for a packet. `recv_time_us` is `None` for a lost packet.
    ///
    /// Feedback for a packet sent after the window marks the interval as done and is rejected.
    pub fn feedback(
        &mut self,
        send_time_us: u64,
        recv_time_us: Option<u64>,
        size: DataSize,
        delay_delta_us: i64,
        kind: PacketKind,
    ) -> bool {
        if send_time_us < self.start_us {
            return false;
        }
        if send_time_us > self.end_us() {
            if !self.feedback_collection_done {
                trace!(
                    start = self.start_us,
                    end = self.end_us(),
                    "Monitor interval feedback collection done"
                );
            }
            self.feedback_collection_done = true;
            return false;
        }

        self.total_feedbacked_packets = self.total_feedbacked_packets.saturating_add(1);

        match recv_time_us {
            Some(recv) => {
                self.recv_span.update(recv);
                self.received.add(size, kind);
                self.deltas.push(DelaySample {
                    send_time_us,
                    delay_delta_us,
                });
            }
            None => {
                self.lost_packets = self.lost_packets.saturating_add(1);
            }
        }

        true
    }

    /// The bitrate the sender was asked to use.
    pub fn target_bitrate(&self) -> Bitrate {
        self.target_bitrate
    }

    /// Window start, microseconds relative to the first sent packet.
    pub fn start_us(&self) -> u64 {
        self.start_us
    }

    /// Window length in microseconds.
    pub fn duration_us(&self) -> u64 {
        self.duration_us
    }

    /// Window end (inclusive).
    pub fn end_us(&self) -> u64 {
        self.start_us.saturating_add(self.duration_us)
    }

    /// Whether feedback has been seen for a packet sent after the window.
    pub fn is_feedback_collection_done(&self) -> bool {
        self.feedback_collection_done
    }

    /// Sent byte totals.
    pub fn sent_bytes(&self) -> ByteCounts {
        self.sent
    }

    /// Received (acknowledged) byte totals.
    pub fn received_bytes(&self) -> ByteCounts {
        self.received
    }

    /// Number of packets sent in the window.
    pub fn total_sent_packets(&self) -> u32 {
        self.total_sent_packets
    }

    /// Number of packets we got feedback for, received or lost.
    pub fn total_feedbacked_packets(&self) -> u32 {
        self.total_feedbacked_packets
    }

    /// Number of packets reported lost.
    pub fn lost_packets(&self) -> u32 {
        self.lost_packets
    }

    /// All sent bytes over the sent span.
    pub fn sent_bitrate(&self) -> Bitrate {
        self.sent.total.over_micros(self.sent_span.micros())
    }

    /// Sent bitrate excluding retransmissions.
    pub fn sent_effective_bitrate(&self) -> Bitrate {
        self.sent.effective().over_micros(self.sent_span.micros())
    }

    /// Sent media bitrate.
    pub fn sent_media_bitrate(&self) -> Bitrate {
        self.sent.media.over_micros(self.sent_span.micros())
    }

    /// Sent probing bitrate.
    pub fn sent_probing_bitrate(&self) -> Bitrate {
        self.sent.probing.over_micros(self.sent_span.micros())
    }

    /// Sent retransmission bitrate.
    pub fn sent_rtx_bitrate(&self) -> Bitrate {
        self.sent.rtx.over_micros(self.sent_span.micros())
    }

    /// All received bytes over the receive span.
    pub fn received_bitrate(&self) -> Bitrate {
        self.received.total.over_micros(self.recv_span.micros())
    }

    /// Received bitrate excluding retransmissions.
    pub fn received_effective_bitrate(&self) -> Bitrate {
        self.received
            .effective()
            .over_micros(self.recv_span.micros())
    }

    /// Received media bitrate.
    pub fn received_media_bitrate(&self) -> Bitrate {
        self.received.media.over_micros(self.recv_span.micros())
    }

    /// Received probing bitrate.
    pub fn received_probing_bitrate(&self) -> Bitrate {
        self.received.probing.over_micros(self.recv_span.micros())
    }

    /// Received retransmission bitrate.
    pub fn received_rtx_bitrate(&self) -> Bitrate {
        self.received.rtx.over_micros(self.recv_span.micros())
    }

    /// Fraction of feedbacked packets reported lost.
    pub fn loss_rate(&self) -> f64 {
        if self.total_feedbacked_packets == 0 {
            return 0.0;
        }
        self.lost_packets as f64 / self.total_feedbacked_packets as f64
    }

    /// Slope of the delay deltas over send time, by least squares.
    pub fn delay_gradient(&self) -> f64 {
        if self.deltas.is_empty() {
            return 0.0;
        }

        let n = self.deltas.len() as f64;
        let (sum_x, sum_y) = self.deltas.iter().fold((0.0, 0.0), |acc, d| {
            (
                acc.0 + d.send_time_us as f64,
                acc.1 + d.delay_delta_us as f64,
            )
        });

        let avg_x = sum_x / n;
        let avg_y = sum_y / n;

        let (numerator, denominator) = self.deltas.iter().fold((0.0, 0.0), |acc, d| {
            let x = d.send_time_us as f64 - avg_x;
            let y = d.delay_delta_us as f64 - avg_y;
            (acc.0 + x * y, acc.1 + x * x)
        });

        if denominator == 0.0 {
            return 0.0;
        }

        numerator / denominator
    }

    /// Vivace utility: rewards throughput, penalizes growing delay and loss.
    pub fn vivace_utility(&self) -> f64 {
        let rate = self.sent_effective_bitrate().as_f64();
        vivace_utility(rate, self.delay_gradient(), self.loss_rate())
    }
}

pub(crate) fn vivace_utility(rate: f64, delay_gradient: f64, loss_rate: f64) -> f64 {
    rate.powf(UTILITY_EXPONENT)
        - DELAY_GRADIENT_COEFFICIENT * delay_gradient * rate
        - LOSS_COEFFICIENT * loss_rate * rate
}

impl fmt::Display for MonitorInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{} target={} sent={} recv={} loss={:.3} done={}]",
            self.start_us,
            self.end_us(),
            self.target_bitrate,
            self.sent_bitrate(),
            self.received_bitrate(),
            self.loss_rate(),
            self.feedback_collection_done
        )
    }
}
