use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

/// A data rate expressed as bits per second(bps).
///
/// Internally the value is tracked as a floating point number for accuracy in the presence of
/// repeated calculations that can yield decimal values.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bitrate(f64);

impl Bitrate {
    /// Zero bits per second.
    pub const ZERO: Self = Self::new(0);

    /// Create a bitrate from bits per second.
    pub const fn new(bps: u64) -> Self {
        Bitrate(bps as f64)
    }

    /// Create a bitrate from kilobits per second.
    pub const fn kbps(kbps: u64) -> Self {
        Self::new(kbps * 10_u64.pow(3))
    }

    /// Create a bitrate from megabits per second.
    pub const fn mbps(mbps: u64) -> Self {
        Self::new(mbps * 10_u64.pow(6))
    }

    /// The bitrate as a floating point bits per second value.
    pub fn as_f64(&self) -> f64 {
        self.0
    }

    /// The bitrate rounded up to whole bits per second.
    pub fn as_u64(&self) -> u64 {
        if self.0 <= 0.0 {
            return 0;
        }
        self.0.ceil() as u64
    }

    /// The bitrate rounded up and saturated to `u32`.
    pub fn as_u32(&self) -> u32 {
        self.as_u64().min(u32::MAX as u64) as u32
    }

    /// Clamp this bitrate to the given bounds.
    pub fn clamp(&self, min: Self, max: Self) -> Self {
        Self(self.0.clamp(min.0, max.0))
    }

    /// The smaller of two bitrates.
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    /// The larger of two bitrates.
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// Whether this bitrate is zero (or negative).
    pub fn is_zero(&self) -> bool {
        self.0 <= 0.0
    }
}

impl From<u64> for Bitrate {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<u32> for Bitrate {
    fn from(value: u32) -> Self {
        Self::new(value as u64)
    }
}

impl From<f64> for Bitrate {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl Mul<f64> for Bitrate {
    type Output = Bitrate;

    fn mul(self, rhs: f64) -> Self::Output {
        Bitrate(self.0 * rhs)
    }
}

impl Add<Bitrate> for Bitrate {
    type Output = Bitrate;

    fn add(self, rhs: Bitrate) -> Self::Output {
        Bitrate(self.0 + rhs.0)
    }
}

impl Sub<Bitrate> for Bitrate {
    type Output = Bitrate;

    fn sub(self, rhs: Bitrate) -> Self::Output {
        Bitrate(self.0 - rhs.0)
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = self.0;
        if rate < 1.0 {
            return write!(f, "{rate}bit/s");
        }
        let log = rate.log10().floor() as u64;

        match log {
            0..=2 => write!(f, "{rate}bit/s"),
            3..=5 => write!(f, "{:.3}kbit/s", rate / 10.0_f64.powf(3.0)),
            6..=8 => write!(f, "{:.3}Mbit/s", rate / 10.0_f64.powf(6.0)),
            9..=11 => write!(f, "{:.3}Gbit/s", rate / 10.0_f64.powf(9.0)),
            12.. => write!(f, "{:.3}Tbit/s", rate / 10.0_f64.powf(12.0)),
        }
    }
}

/// An amount of data in bytes.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DataSize(u64);

impl DataSize {
    /// No data.
    pub const ZERO: Self = DataSize::bytes(0);

    /// Create a data size from a number of bytes.
    pub const fn bytes(bytes: u64) -> DataSize {
        Self(bytes)
    }

    /// The size in bytes.
    pub fn as_bytes(&self) -> u64 {
        self.0
    }

    /// The size in bytes as a float.
    pub fn as_bytes_f64(&self) -> f64 {
        self.0 as f64
    }

    /// Subtract without wrapping below zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// The rate at which this much data is transferred over `us` microseconds.
    ///
    /// Returns [`Bitrate::ZERO`] for a zero length span.
    pub fn over_micros(self, us: u64) -> Bitrate {
        if us == 0 {
            return Bitrate::ZERO;
        }
        Bitrate::from(self.as_bytes_f64() * 8_000_000.0 / us as f64)
    }
}

impl From<u32> for DataSize {
    fn from(value: u32) -> Self {
        Self(value as u64)
    }
}

impl From<usize> for DataSize {
    fn from(value: usize) -> Self {
        Self(value as u64)
    }
}

impl Div<DataSize> for DataSize {
    type Output = f64;

    fn div(self, rhs: DataSize) -> Self::Output {
        if rhs.0 == 0 {
            return 0.0;
        }
        self.as_bytes_f64() / rhs.as_bytes_f64()
    }
}

impl AddAssign<DataSize> for DataSize {
    fn add_assign(&mut self, rhs: DataSize) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Add<DataSize> for DataSize {
    type Output = DataSize;

    fn add(self, rhs: DataSize) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sum<DataSize> for DataSize {
    fn sum<I: Iterator<Item = DataSize>>(iter: I) -> Self {
        iter.fold(DataSize::ZERO, |acc, s| acc + s)
    }
}

impl fmt::Display for DataSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.0 as f64;
        if self.0 == 0 {
            return write!(f, "0B");
        }
        let log = size.log10().floor() as u64;

        match log {
            0..=2 => write!(f, "{size}B"),
            3..=5 => write!(f, "{:.3}kB", size / 10.0_f64.powf(3.0)),
            6..=8 => write!(f, "{:.3}MB", size / 10.0_f64.powf(6.0)),
            9..=11 => write!(f, "{:.3}GB", size / 10.0_f64.powf(9.0)),
            12.. => write!(f, "{:.3}TB", size / 10.0_f64.powf(12.0)),
        }
    }
}
