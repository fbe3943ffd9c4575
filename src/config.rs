use serde::{Deserialize, Serialize};

use crate::Bitrate;

/// Customized config for creating a [`BandwidthController`][crate::BandwidthController].
///
/// ```
/// use vivace_bwe::{BandwidthController, BweConfig, Bitrate};
///
/// let controller = BweConfig::new()
///     .set_initial_bitrate(Bitrate::kbps(800))
///     .set_max_bitrate(Bitrate::mbps(20))
///     .build();
/// ```
///
/// Configs implement [`Clone`] to help create multiple controllers, and can be deserialized
/// with serde. Missing fields take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BweConfig {
    pub(crate) initial_bitrate: Bitrate,
    pub(crate) min_bitrate: Bitrate,
    pub(crate) max_bitrate: Bitrate,
    pub(crate) startup_duration_us: u64,
    pub(crate) probe_duration_us: u64,
    pub(crate) recovery_duration_us: u64,
    pub(crate) feedback_timeout_us: u64,
    pub(crate) probe_step_ratio: f64,
    pub(crate) min_probe_step: Bitrate,
    pub(crate) min_rtt_window_us: u64,
}

impl BweConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        BweConfig::default()
    }

    /// Target bitrate of the startup monitor interval. Also the estimate reported before the
    /// first estimation has run.
    ///
    /// Defaults to 512kbit/s.
    pub fn initial_bitrate(&self) -> Bitrate {
        self.initial_bitrate
    }

    /// Set the initial bitrate.
    pub fn set_initial_bitrate(mut self, v: Bitrate) -> Self {
        self.initial_bitrate = v;
        self
    }

    /// Lower bound of the estimate. Defaults to 128kbit/s.
    pub fn min_bitrate(&self) -> Bitrate {
        self.min_bitrate
    }

    /// Set the lower bound of the estimate.
    ///
    /// If this is above the current upper bound, the upper bound is raised to match.
    pub fn set_min_bitrate(mut self, v: Bitrate) -> Self {
        self.min_bitrate = v;
        if self.max_bitrate < v {
            self.max_bitrate = v;
        }
        self
    }

    /// Upper bound of the estimate. Defaults to 100Mbit/s.
    pub fn max_bitrate(&self) -> Bitrate {
        self.max_bitrate
    }

    /// Set the upper bound of the estimate.
    ///
    /// If this is below the current lower bound, the lower bound is lowered to match.
    pub fn set_max_bitrate(mut self, v: Bitrate) -> Self {
        self.max_bitrate = v;
        if self.min_bitrate > v {
            self.min_bitrate = v;
        }
        self
    }

    /// Length of the startup monitor interval in microseconds. Defaults to 1s.
    pub fn startup_duration_us(&self) -> u64 {
        self.startup_duration_us
    }

    /// Set the length of the startup monitor interval.
    pub fn set_startup_duration_us(mut self, v: u64) -> Self {
        self.startup_duration_us = v;
        self
    }

    /// Length of each interval of a probing pair in microseconds. Defaults to 500ms.
    pub fn probe_duration_us(&self) -> u64 {
        self.probe_duration_us
    }

    /// Set the length of each probing interval.
    pub fn set_probe_duration_us(mut self, v: u64) -> Self {
        self.probe_duration_us = v;
        self
    }

    /// Length of the second interval of a recovery pair in microseconds. Defaults to 250ms.
    pub fn recovery_duration_us(&self) -> u64 {
        self.recovery_duration_us
    }

    /// Set the length of the second recovery interval.
    pub fn set_recovery_duration_us(mut self, v: u64) -> Self {
        self.recovery_duration_us = v;
        self
    }

    /// How long past the end of the last interval (plus RTT) we wait for feedback before
    /// forcing a new estimate. Defaults to 750ms.
    pub fn feedback_timeout_us(&self) -> u64 {
        self.feedback_timeout_us
    }

    /// Set the feedback timeout.
    pub fn set_feedback_timeout_us(mut self, v: u64) -> Self {
        self.feedback_timeout_us = v;
        self
    }

    /// Fraction of the current estimate used as probing step. Defaults to 0.05.
    pub fn probe_step_ratio(&self) -> f64 {
        self.probe_step_ratio
    }

    /// Set the probing step ratio.
    pub fn set_probe_step_ratio(mut self, v: f64) -> Self {
        self.probe_step_ratio = v;
        self
    }

    /// Smallest probing step. Defaults to 4kbit/s.
    pub fn min_probe_step(&self) -> Bitrate {
        self.min_probe_step
    }

    /// Set the smallest probing step.
    pub fn set_min_probe_step(mut self, v: Bitrate) -> Self {
        self.min_probe_step = v;
        self
    }

    /// How far back in time, in microseconds, the min-RTT tracker looks. Defaults to 10s.
    ///
    /// Samples are bucketed to 100ms.
    pub fn min_rtt_window_us(&self) -> u64 {
        self.min_rtt_window_us
    }

    /// Set the min-RTT window.
    pub fn set_min_rtt_window_us(mut self, v: u64) -> Self {
        self.min_rtt_window_us = v;
        self
    }

    /// Create a [`BandwidthController`][crate::BandwidthController] from this config.
    pub fn build(self) -> crate::BandwidthController {
        crate::BandwidthController::new(self)
    }

    /// Restore `min <= max`, which deserialization does not enforce.
    ///
    /// Like [`BweConfig::set_min_bitrate()`], an inverted pair raises the upper bound.
    pub(crate) fn normalized(mut self) -> Self {
        if self.min_bitrate > self.max_bitrate {
            warn!(
                "BWE min bitrate {} above max bitrate {}, raising max",
                self.min_bitrate, self.max_bitrate
            );
            self.max_bitrate = self.min_bitrate;
        }
        self
    }
}

impl Default for BweConfig {
    fn default() -> Self {
        Self {
            initial_bitrate: Bitrate::kbps(512),
            min_bitrate: Bitrate::kbps(128),
            max_bitrate: Bitrate::mbps(100),
            startup_duration_us: 1_000_000,
            probe_duration_us: 500_000,
            recovery_duration_us: 250_000,
            feedback_timeout_us: 750_000,
            probe_step_ratio: 0.05,
            min_probe_step: Bitrate::kbps(4),
            min_rtt_window_us: 10_000_000,
        }
    }
}
