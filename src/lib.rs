//! Send-side bandwidth estimation for RTP, driven by transport-wide congestion control
//! feedback.
//!
//! The estimator follows the [PCC Vivace][vivace] approach: instead of inferring congestion
//! from a delay trend alone, it continuously runs small experiments. Sending time is split into
//! *monitor intervals*, each asking the sender for a slightly different bitrate. When feedback
//! for a pair of intervals is complete, a utility function rewarding throughput and penalizing
//! delay growth and loss is evaluated for both, and the estimate moves along the utility
//! gradient.
//!
//! This is a Sans I/O implementation. The [`BandwidthController`] has no threads, timers or
//! sockets. Time is passed in by the caller, as microseconds, with every event.
//!
//! # Usage
//!
//! ```
//! use std::collections::BTreeMap;
//! use vivace_bwe::{BandwidthController, Bitrate, SentPacketRecord};
//!
//! let mut bwe = BandwidthController::default();
//!
//! // Every RTP packet carrying a transport-wide sequence number.
//! for seq in 0..20 {
//!     let send_time_us = seq as u64 * 5_000;
//!     bwe.sent_packet(SentPacketRecord::media(seq, 1_000, send_time_us));
//! }
//!
//! // A parsed transport-wide feedback report: sequence number to remote arrival time.
//! let packets: BTreeMap<u32, Option<u64>> = (0..20)
//!     .map(|seq| (seq, Some(seq as u64 * 5_000 + 20_000)))
//!     .collect();
//! bwe.received_feedback(0, &packets, 150_000);
//!
//! // Until the startup interval is resolved, the initial bitrate is reported.
//! assert_eq!(bwe.estimated_bitrate(), Bitrate::kbps(512));
//! ```
//!
//! # Threading
//!
//! The controller is meant to be owned by the single task that sends packets and processes
//! feedback. A registered [`BitrateListener`] is called synchronously from within
//! [`BandwidthController::received_feedback()`] and [`BandwidthController::sent_packet()`].
//!
//! [vivace]: https://www.usenix.org/conference/nsdi18/presentation/dong

#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![allow(clippy::manual_range_contains)]
#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

use thiserror::Error;

mod bandwidth;
pub use bandwidth::{Bitrate, DataSize};

mod config;
pub use config::BweConfig;

mod controller;
pub use controller::{BandwidthController, DirectionState};

mod dump;

mod interval;
pub use interval::{ByteCounts, MonitorInterval};

mod ledger;
pub use ledger::{PacketKind, SentPacketRecord};

mod listener;
pub use listener::BitrateListener;

mod macros;

mod rtt;

mod stats;
pub use stats::BweStats;

/// Errors from the bandwidth estimation.
///
/// Estimation itself never fails. Errors only come from side channels such as the stats dump.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BweError {
    /// IO errors from the stats dump file.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// [`BandwidthController::stop_dump()`] without a dump in progress.
    #[error("No BWE dump in progress")]
    DumpNotActive,
}

/// Log a CSV-like stat to stdout. Useful for plotting estimator behavior.
#[allow(unused_macros)]
macro_rules! log_stat {
    ($name:expr, $($arg:expr),+) => {
        #[cfg(feature = "_internal_dont_use_log_stats")]
        {
            use std::time::SystemTime;
            use std::io::{self, Write};

            let now = SystemTime::now();
            let since_epoch = now.duration_since(SystemTime::UNIX_EPOCH).unwrap();
            let unix_time_ms = since_epoch.as_millis();
            let mut lock = io::stdout().lock();
            write!(lock, "{} ", $name).expect("Failed to write to stdout");

            $(
                write!(lock, "{},", $arg).expect("Failed to write to stdout");
            )+
            writeln!(lock, "{}", unix_time_ms).expect("Failed to write to stdout");
        }
    };
}
pub(crate) use log_stat;
