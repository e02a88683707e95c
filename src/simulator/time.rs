use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Simulated clock value in milliseconds since the start of a replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct VirtualTime(pub u64);

/// Span of simulated time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Duration(pub u64);

impl VirtualTime {
    pub const ZERO: VirtualTime = VirtualTime(0);
    pub const MAX: VirtualTime = VirtualTime(u64::MAX);

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn from_millis(millis: u64) -> Self {
        VirtualTime(millis)
    }

    pub fn from_secs(secs: u64) -> Self {
        VirtualTime(secs * 1000)
    }

    /// Elapsed time since `earlier`, zero if `earlier` lies in the future.
    pub fn saturating_since(&self, earlier: VirtualTime) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for VirtualTime {
    type Output = VirtualTime;

    fn add(self, rhs: Duration) -> Self::Output {
        VirtualTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<Duration> for VirtualTime {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub<VirtualTime> for VirtualTime {
    type Output = Duration;

    fn sub(self, rhs: VirtualTime) -> Self::Output {
        Duration(self.0 - rhs.0)
    }
}

/// Formats as `[d:]hh:mm:ss,fff`, the day prefix only when non-zero.
impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0 % 1000;
        let total_secs = self.0 / 1000;
        let secs = total_secs % 60;
        let mins = (total_secs / 60) % 60;
        let hours = (total_secs / 3600) % 24;
        let days = total_secs / 86_400;
        if days > 0 {
            write!(f, "{}:", days)?;
        }
        write!(f, "{:02}:{:02}:{:02},{:03}", hours, mins, secs, millis)
    }
}

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub fn from_millis(millis: u64) -> Self {
        Duration(millis)
    }

    pub fn from_secs(secs: u64) -> Self {
        Duration(secs * 1000)
    }

    /// Rounds a sampled value in seconds to whole milliseconds.
    /// Negative and non-finite samples clamp to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration((secs * 1000.0).round() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Self::Output {
        Duration(self.0.saturating_add(rhs.0))
    }
}
