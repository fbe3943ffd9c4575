//! Vivace style bandwidth estimation driven by transport-wide feedback.
//!
//! The controller runs experiments: a pair of monitor intervals is sent at slightly different
//! bitrates, and once feedback for both has been collected, the difference in their utility
//! tells whether more or less bitrate pays off. The first interval after startup is a single,
//! longer window that just measures what the network delivers.
//!
//! Independently of the utility gradient, growth of the one-way delay beyond the baseline round
//! trip switches the next experiment to an asymmetric recovery pair that drains the queue.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::dump::{BweDump, DumpLine};
use crate::interval::MonitorInterval;
use crate::ledger::{SendLedger, SentPacketRecord};
use crate::macros::{log_accumulated_delay, log_available_bitrate, log_bitrate_estimate};
use crate::macros::{log_delay_gradient, log_loss, log_vivace_utility};
use crate::rtt::RttTracker;
use crate::{Bitrate, BitrateListener, BweConfig, BweError, BweStats, DataSize};

/// Bitrate change per unit of utility gradient, before confidence scaling.
const RATE_CHANGE_SCALE: f64 = 100.0;

/// Delay growth, in ms, tolerated on top of the scaled min RTT before recovering.
const DELAY_GROWTH_MARGIN_MS: f64 = 10.0;
const DELAY_GROWTH_FACTOR: f64 = 1.5;

/// Direction decided by the last estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DirectionState {
    /// Utility grows with bitrate.
    #[default]
    Increase,
    /// Utility shrinks with bitrate.
    Decrease,
    /// The sender pushed more than both probes asked for. Transient, does not count towards
    /// consecutive changes.
    OverShoot,
}

impl fmt::Display for DirectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectionState::Increase => write!(f, "increase"),
            DirectionState::Decrease => write!(f, "decrease"),
            DirectionState::OverShoot => write!(f, "overshoot"),
        }
    }
}

/// Send-side bandwidth estimator.
///
/// Feed it every packet sent with a transport-wide sequence number through
/// [`BandwidthController::sent_packet()`] and every parsed transport-wide feedback report
/// through [`BandwidthController::received_feedback()`]. Read the result with
/// [`BandwidthController::estimated_bitrate()`] and
/// [`BandwidthController::available_bitrate()`], or register a [`BitrateListener`].
///
/// The controller has no internal synchronization. All calls are expected from the thread
/// that owns the send and feedback path; none of them block.
pub struct BandwidthController {
    config: BweConfig,

    /// Current estimate.
    bandwidth_estimation: Bitrate,

    /// Estimate minus the share used by retransmissions.
    available_rate: Bitrate,

    rtt: RttTracker,

    /// Accumulated growth of the one-way delay since the first packet, in microseconds.
    accumulate_delta: i64,

    consecutive_changes: u32,
    state: DirectionState,
    /// Last non-overshoot direction, used to count consecutive changes.
    last_direction: Option<DirectionState>,

    /// One startup interval, then always a pair.
    intervals: Vec<MonitorInterval>,

    ledger: SendLedger,

    /// Local time of the first sent packet. All interval times are relative to this.
    first_sent_us: Option<u64>,
    /// Remote time of the first received packet.
    first_recv_us: Option<u64>,
    prev_sent_us: u64,
    prev_recv_us: u64,

    rng: fastrand::Rng,
    listener: Option<Box<dyn BitrateListener + Send>>,
    dump: Option<BweDump>,
}

impl BandwidthController {
    /// Create a controller from a config.
    pub fn new(config: BweConfig) -> Self {
        let config = config.normalized();
        let rtt = RttTracker::new(config.min_rtt_window_us);
        let initial = config.initial_bitrate;

        BandwidthController {
            config,
            bandwidth_estimation: initial,
            available_rate: initial,
            rtt,
            accumulate_delta: 0,
            consecutive_changes: 0,
            state: DirectionState::Increase,
            last_direction: None,
            intervals: Vec::with_capacity(2),
            ledger: SendLedger::new(),
            first_sent_us: None,
            first_recv_us: None,
            prev_sent_us: 0,
            prev_recv_us: 0,
            rng: fastrand::Rng::new(),
            listener: None,
            dump: None,
        }
    }

    /// Register the observer of new estimates, replacing any previous one.
    pub fn set_listener(&mut self, listener: impl BitrateListener + Send + 'static) {
        self.listener = Some(Box::new(listener));
    }

    /// Remove the observer.
    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    /// The config this controller was created with.
    pub fn config(&self) -> &BweConfig {
        &self.config
    }

    /// Start writing one line per processed feedback entry to `path`.
    ///
    /// Any dump already in progress is closed first.
    pub fn dump(&mut self, path: impl AsRef<Path>) -> Result<(), BweError> {
        if self.dump.is_some() {
            self.stop_dump()?;
        }

        let dump = match BweDump::create(path.as_ref()) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to open BWE dump {}: {}", path.as_ref().display(), e);
                return Err(e.into());
            }
        };

        info!("Dumping BWE stats to {}", dump.path().display());
        self.dump = Some(dump);
        Ok(())
    }

    /// Stop an ongoing dump and flush it to disk.
    pub fn stop_dump(&mut self) -> Result<(), BweError> {
        let dump = self.dump.take().ok_or(BweError::DumpNotActive)?;
        info!("Stop dumping BWE stats to {}", dump.path().display());
        dump.close()?;
        Ok(())
    }

    /// Whether a dump is in progress.
    pub fn is_dumping(&self) -> bool {
        self.dump.is_some()
    }

    /// Record a packet sent with a transport-wide sequence number.
    pub fn sent_packet(&mut self, record: SentPacketRecord) {
        let first_sent_us = match self.first_sent_us {
            Some(v) => v,
            None => {
                let startup = MonitorInterval::new(
                    self.config.initial_bitrate,
                    0,
                    self.config.startup_duration_us,
                );
                debug!("Create startup interval {}", startup);
                self.intervals.clear();
                self.intervals.push(startup);
                self.first_sent_us = Some(record.send_time_us);
                record.send_time_us
            }
        };

        let sent = record.send_time_us.saturating_sub(first_sent_us);
        let size = record.data_size();
        let kind = record.kind;

        for mi in &mut self.intervals {
            mi.sent_packet(sent, size, kind);
        }

        self.ledger.insert(record);

        let timeout = self.intervals.last().map(|last| {
            last.end_us()
                .saturating_add(self.rtt.rtt() as u64 * 1000)
                .saturating_add(self.config.feedback_timeout_us)
        });

        if timeout.is_some_and(|t| sent > t) {
            debug!(sent, "No feedback for monitor intervals in time, re-estimating");
            self.estimate();
            self.create_intervals(sent);
        }

        if let Some(front) = self.intervals.first() {
            let cutoff = first_sent_us.saturating_add(front.start_us());
            self.ledger.prune_before(cutoff);
        }
    }

    /// Process one transport-wide feedback report.
    ///
    /// * `feedback_packet_count` the feedback packet counter of the report.
    /// * `packets` transport-wide sequence number to remote arrival time in microseconds,
    ///   `None` for packets reported as not received.
    /// * `now_us` local arrival time of the report, same clock as the send times.
    pub fn received_feedback(
        &mut self,
        feedback_packet_count: u8,
        packets: &BTreeMap<u32, Option<u64>>,
        now_us: u64,
    ) {
        let Some((last_seq, _)) = packets.last_key_value() else {
            return;
        };
        let Some(first_sent_us) = self.first_sent_us else {
            trace!("Feedback before any packet was sent");
            return;
        };

        // RTT lower bound proxy, from the newest packet in the report only.
        if let Some(record) = self.ledger.get(*last_seq) {
            let rtt = now_us.saturating_sub(record.send_time_us) / 1000;
            self.rtt.add_sample(now_us, rtt.min(u32::MAX as u64) as u32);
        }

        for (&seq, &recv_time_us) in packets {
            // Stays in the ledger until the next intervals are created, so that a packet
            // completing the current ones is replayed into them.
            let Some(record) = self.ledger.get(seq).cloned() else {
                trace!(seq, "Feedback for unknown or pruned packet");
                continue;
            };

            let sent = record.send_time_us.saturating_sub(first_sent_us);
            let recv = match recv_time_us {
                Some(t) => {
                    let first = *self.first_recv_us.get_or_insert(t);
                    t.saturating_sub(first)
                }
                None => 0,
            };

            let delta_sent = sent as i64 - self.prev_sent_us as i64;
            let (delta_recv, delta) = if recv_time_us.is_some() {
                let delta_recv = recv as i64 - self.prev_recv_us as i64;
                (delta_recv, delta_recv - delta_sent)
            } else {
                (0, 0)
            };

            self.accumulate_delta = self.accumulate_delta.saturating_add(delta);
            if self.accumulate_delta < 0 {
                self.accumulate_delta = self.rtt.min_rtt().unwrap_or(0) as i64 / 1000;
            }

            let recv_rel = recv_time_us.map(|_| recv);
            let size = record.data_size();
            for mi in &mut self.intervals {
                mi.feedback(sent, recv_rel, size, delta, record.kind);
            }

            let all_done = !self.intervals.is_empty()
                && self
                    .intervals
                    .iter()
                    .all(|mi| mi.is_feedback_collection_done());

            if all_done {
                self.estimate();
                self.create_intervals(sent);
            }

            self.ledger.take(seq);

            if recv_time_us.is_some() {
                self.prev_sent_us = sent;
                self.prev_recv_us = recv;
            }

            if self.dump.is_some() {
                let line = DumpLine {
                    feedback_time_us: now_us,
                    seq,
                    feedback_num: feedback_packet_count,
                    size: record.size,
                    sent_us: sent,
                    recv_us: recv,
                    delta_sent_us: delta_sent,
                    delta_recv_us: delta_recv,
                    delta_us: delta,
                    estimate: self.bandwidth_estimation,
                    target: self.target_bitrate(),
                    available: self.available_rate,
                    rtt_ms: self.rtt.rtt(),
                    marker: record.marker,
                    rtx: record.is_rtx(),
                    probing: record.is_probing(),
                };
                self.write_dump(&line);
            }
        }

        log_accumulated_delay!(self.accumulate_delta);
    }

    /// RTT measured from RTCP sender/receiver reports.
    pub fn update_rtt(&mut self, now_us: u64, rtt_ms: u32) {
        trace!(now_us, rtt_ms, "Update RTT");
        self.rtt.update_rtt(now_us, rtt_ms);
    }

    /// The current bandwidth estimate.
    ///
    /// Before the first estimation this is the configured initial bitrate.
    pub fn estimated_bitrate(&self) -> Bitrate {
        self.bandwidth_estimation
    }

    /// The estimate with the share used by retransmissions removed.
    pub fn available_bitrate(&self) -> Bitrate {
        self.available_rate
    }

    /// The bitrate the sender should currently be sending at to run the ongoing experiment.
    ///
    /// When the interval in progress is not being delivered at its target and the round trip
    /// has grown past the baseline, the received bitrate scaled by `min_rtt / estimated_rtt`
    /// is returned instead.
    pub fn target_bitrate(&self) -> Bitrate {
        let Some(mi) = self
            .intervals
            .iter()
            .find(|mi| !mi.is_feedback_collection_done())
        else {
            return self.bandwidth_estimation;
        };

        let target = mi.target_bitrate();

        if let Some((min_rtt, estimated_rtt)) = self.elevated_rtt() {
            let received = mi.received_bitrate();
            if !received.is_zero() && received < target {
                return received * (min_rtt / estimated_rtt);
            }
        }

        target
    }

    /// Last RTT from RTCP reports in milliseconds, 0 if none.
    pub fn rtt(&self) -> u32 {
        self.rtt.rtt()
    }

    /// Windowed minimum RTT in milliseconds.
    pub fn min_rtt(&self) -> Option<u32> {
        self.rtt.min_rtt()
    }

    /// Minimum RTT plus the accumulated one-way delay growth, in milliseconds.
    pub fn estimated_rtt(&self) -> Option<u32> {
        let min_rtt = self.rtt.min_rtt()?;
        let growth = (self.accumulate_delta.max(0) / 1000).min(u32::MAX as i64) as u32;
        Some(min_rtt.saturating_add(growth))
    }

    /// Direction chosen by the last estimation.
    pub fn state(&self) -> DirectionState {
        self.state
    }

    /// The live monitor intervals.
    pub fn intervals(&self) -> &[MonitorInterval] {
        &self.intervals
    }

    /// Snapshot of the controller state.
    pub fn stats(&self) -> BweStats {
        BweStats {
            estimate: self.bandwidth_estimation,
            available: self.available_rate,
            target: self.target_bitrate(),
            rtt_ms: self.rtt.rtt(),
            min_rtt_ms: self.rtt.min_rtt(),
            accumulated_delay_us: self.accumulate_delta,
            state: self.state,
            consecutive_changes: self.consecutive_changes,
            pending_packets: self.ledger.len(),
            intervals: self.intervals.len(),
        }
    }

    /// Forget everything learnt so far. The config, listener and any dump are kept.
    pub fn reset(&mut self) {
        debug!("Reset bandwidth controller");
        let listener = self.listener.take();
        let dump = self.dump.take();
        *self = Self::new(self.config.clone());
        self.listener = listener;
        self.dump = dump;
    }

    /// Compute a new estimate from the live intervals.
    fn estimate(&mut self) {
        let intervals = std::mem::take(&mut self.intervals);

        let estimate = match intervals.as_slice() {
            [] => None,
            [startup] => {
                debug!("Estimate from startup interval {}", startup);
                let received = startup.received_bitrate();
                Some((
                    received.clamp(self.config.min_bitrate, self.config.max_bitrate),
                    true,
                ))
            }
            [mi0, mi1, ..] => Some((self.estimate_from_probes(mi0, mi1), false)),
        };

        self.intervals = intervals;

        let Some((estimate, is_startup)) = estimate else {
            return;
        };

        self.available_rate = self.rtx_adjusted(estimate);
        self.bandwidth_estimation = if is_startup {
            estimate
        } else {
            self.available_rate
        };

        debug!(
            "New estimate: {} available: {} state: {}",
            self.bandwidth_estimation, self.available_rate, self.state
        );

        self.notify();
    }

    fn estimate_from_probes(&mut self, mi0: &MonitorInterval, mi1: &MonitorInterval) -> Bitrate {
        let utility0 = mi0.vivace_utility();
        let utility1 = mi1.vivace_utility();
        log_vivace_utility!(utility0, utility1);
        log_delay_gradient!(mi0.delay_gradient(), mi1.delay_gradient());

        let sent0 = mi0.sent_effective_bitrate();
        let sent1 = mi1.sent_effective_bitrate();
        let bitrate0 = sent0.max(mi0.target_bitrate());
        let bitrate1 = sent1.max(mi1.target_bitrate());

        let target = if bitrate0.is_zero() || bitrate1.is_zero() {
            bitrate0 + bitrate1
        } else {
            (bitrate0 + bitrate1) * 0.5
        };

        let bitrate_diff = bitrate0.as_f64() - bitrate1.as_f64();
        let gradient = if bitrate_diff == 0.0 {
            0.0
        } else {
            (utility0 - utility1) / bitrate_diff
        };

        if target > mi0.target_bitrate().max(mi1.target_bitrate()) {
            self.state = DirectionState::OverShoot;
            let estimate = sent0
                .max(sent1)
                .min(mi0.received_bitrate().max(mi1.received_bitrate()));
            debug!(
                "Overshoot target: {} estimate: {} probes: {} {}",
                target, estimate, mi0, mi1
            );
            return estimate;
        }

        let direction = if gradient > 0.0 {
            DirectionState::Increase
        } else {
            DirectionState::Decrease
        };

        if self.last_direction == Some(direction) {
            self.consecutive_changes = self.consecutive_changes.saturating_add(1);
        } else {
            self.consecutive_changes = 0;
        }
        self.last_direction = Some(direction);
        self.state = direction;

        let loss = mi0.loss_rate().max(mi1.loss_rate());
        log_loss!(loss);

        let estimate = probe_estimate(
            target,
            gradient,
            self.consecutive_changes,
            loss,
            self.config.min_bitrate,
            self.config.max_bitrate,
        );

        debug!(
            "{} x{} gradient: {:.6} target: {} loss: {:.3} estimate: {}",
            direction, self.consecutive_changes, gradient, target, loss, estimate
        );

        estimate
    }

    /// Replace the live intervals with the next experiment starting at `now_us`.
    fn create_intervals(&mut self, now_us: u64) {
        let sign = if self.rng.bool() { 1.0 } else { -1.0 };
        let estimate = self.bandwidth_estimation;
        let step = (estimate * self.config.probe_step_ratio).max(self.config.min_probe_step);
        let probe_duration = self.config.probe_duration_us;

        let (first, second) = if let Some((min_rtt, estimated_rtt)) = self.elevated_rtt() {
            let scaled = step * (min_rtt / estimated_rtt);
            (
                MonitorInterval::new(
                    (estimate - step).max(Bitrate::ZERO),
                    now_us,
                    probe_duration,
                ),
                MonitorInterval::new(
                    estimate + scaled,
                    now_us.saturating_add(probe_duration),
                    self.config.recovery_duration_us,
                ),
            )
        } else {
            (
                MonitorInterval::new(
                    (estimate + step * sign).max(Bitrate::ZERO),
                    now_us,
                    probe_duration,
                ),
                MonitorInterval::new(
                    (estimate - step * sign).max(Bitrate::ZERO),
                    now_us.saturating_add(probe_duration),
                    probe_duration,
                ),
            )
        };

        debug!("Create monitor intervals {} {}", first, second);

        self.intervals.clear();
        self.intervals.push(first);
        self.intervals.push(second);

        let first_sent_us = self.first_sent_us.unwrap_or(0);
        for record in &self.ledger {
            let sent = record.send_time_us.saturating_sub(first_sent_us);
            for mi in &mut self.intervals {
                mi.sent_packet(sent, record.data_size(), record.kind);
            }
        }
    }

    /// `(min_rtt, estimated_rtt)` in ms if the one-way delay has grown well past the min RTT.
    fn elevated_rtt(&self) -> Option<(f64, f64)> {
        let min_rtt = self.rtt.min_rtt()? as f64;
        if self.accumulate_delta <= 0 {
            return None;
        }
        let growth = self.accumulate_delta as f64 / 1000.0;
        if growth <= DELAY_GROWTH_MARGIN_MS + DELAY_GROWTH_FACTOR * min_rtt {
            return None;
        }
        Some((min_rtt, min_rtt + growth))
    }

    /// Remove the retransmission share of the sent traffic from `bitrate`.
    fn rtx_adjusted(&self, bitrate: Bitrate) -> Bitrate {
        let (media, rtx) = self
            .intervals
            .iter()
            .fold((DataSize::ZERO, DataSize::ZERO), |(media, rtx), mi| {
                let sent = mi.sent_bytes();
                (media + sent.media, rtx + sent.rtx)
            });

        let adjusted = if rtx == DataSize::ZERO {
            bitrate
        } else {
            bitrate * (media / (media + rtx))
        };

        adjusted.clamp(self.config.min_bitrate, self.config.max_bitrate)
    }

    fn notify(&mut self) {
        log_bitrate_estimate!(self.bandwidth_estimation.as_f64());
        log_available_bitrate!(self.available_rate.as_f64());

        if let Some(listener) = &mut self.listener {
            listener.on_target_bitrate_requested(self.bandwidth_estimation);
        }
    }

    fn write_dump(&mut self, line: &DumpLine) {
        let Some(dump) = &mut self.dump else {
            return;
        };
        if let Err(e) = dump.write(line) {
            warn!("Failed to write BWE dump {}: {}", dump.path().display(), e);
            self.dump = None;
        }
    }
}

impl Default for BandwidthController {
    fn default() -> Self {
        Self::new(BweConfig::default())
    }
}

impl fmt::Debug for BandwidthController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BandwidthController")
            .field("bandwidth_estimation", &self.bandwidth_estimation)
            .field("available_rate", &self.available_rate)
            .field("state", &self.state)
            .field("consecutive_changes", &self.consecutive_changes)
            .field("accumulate_delta", &self.accumulate_delta)
            .field("intervals", &self.intervals)
            .field("ledger", &self.ledger.len())
            .finish()
    }
}

/// Move `target` along the utility gradient, then clamp and dampen by loss.
///
/// The step grows with the number of consecutive moves in the same direction, but never more
/// than doubles the target.
fn probe_estimate(
    target: Bitrate,
    gradient: f64,
    consecutive_changes: u32,
    loss: f64,
    min: Bitrate,
    max: Bitrate,
) -> Bitrate {
    let confidence = 1.0 + (consecutive_changes as f64 + 1.0).ln();
    let rate_change = gradient * confidence * RATE_CHANGE_SCALE;
    let estimate = target + Bitrate::from(rate_change.min(target.as_f64()));

    estimate.clamp(min, max) * (1.0 - loss.clamp(0.0, 1.0))
}
