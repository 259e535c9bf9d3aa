// Callwrap
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// A validated, non-negative, finite delay or window length.
///
/// `Duration` is already non-negative; the fallible constructors exist for
/// hosts that carry timings as signed milliseconds or float seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Interval(Duration);

impl Interval {
    pub const ZERO: Interval = Interval(Duration::ZERO);

    /// Validates a signed millisecond count
    ///
    /// # Arguments
    /// - `name`: Parameter name reported in the error
    /// - `millis`: Requested length, rejected if negative
    pub fn from_millis(name: &'static str, millis: i64) -> ConfigResult<Self> {
        if millis < 0 {
            return Err(ConfigError::NegativeDuration { name, value: millis });
        }
        Ok(Self(Duration::from_millis(millis as u64)))
    }

    /// Validates a float second count, rejecting NaN, infinities and negatives
    pub fn from_secs_f64(name: &'static str, secs: f64) -> ConfigResult<Self> {
        Duration::try_from_secs_f64(secs).map(Self).map_err(|_| ConfigError::NonFiniteDuration {
            name,
            value: secs.to_string(),
        })
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for Interval {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl From<Interval> for Duration {
    fn from(interval: Interval) -> Self {
        interval.0
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}
