//! Statistics snapshot.

use serde::Serialize;

use crate::{Bitrate, DirectionState};

/// Snapshot of the controller, see
/// [`BandwidthController::stats()`][crate::BandwidthController::stats].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BweStats {
    /// Current bandwidth estimate.
    pub estimate: Bitrate,
    /// Estimate with the share used by retransmissions removed.
    pub available: Bitrate,
    /// Bitrate the sender is currently asked to probe at.
    pub target: Bitrate,
    /// Last RTCP round trip time in milliseconds.
    pub rtt_ms: u32,
    /// Windowed minimum round trip time in milliseconds.
    pub min_rtt_ms: Option<u32>,
    /// Accumulated one-way delay growth in microseconds.
    pub accumulated_delay_us: i64,
    /// Direction chosen by the last estimation.
    pub state: DirectionState,
    /// How many estimations in a row went in the same direction.
    pub consecutive_changes: u32,
    /// Sent packets still awaiting feedback.
    pub pending_packets: usize,
    /// Number of live monitor intervals.
    pub intervals: usize,
}
