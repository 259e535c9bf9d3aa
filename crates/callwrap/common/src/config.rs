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

//! Default timings for debouncers and throttlers

use std::time::Duration;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::interval::Interval;

pub const DEBOUNCE_ENV: &str = "CALLWRAP_DEBOUNCE_MS";
pub const THROTTLE_ENV: &str = "CALLWRAP_THROTTLE_MS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapConfig {
    pub debounce_delay: Interval,
    pub throttle_window: Interval,
}

impl Default for WrapConfig {
    fn default() -> Self {
        Self {
            debounce_delay: Interval::from(Duration::from_millis(100)),
            throttle_window: Interval::from(Duration::from_millis(100)),
        }
    }
}

impl WrapConfig {
    /// Reads overrides from the environment.
    ///
    /// Unset variables keep their defaults. Unparsable or negative values
    /// are rejected rather than ignored.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(DEBOUNCE_ENV) {
            config.debounce_delay = parse_millis(DEBOUNCE_ENV, "debounce delay", &raw)?;
        }

        if let Some(raw) = lookup(THROTTLE_ENV) {
            config.throttle_window = parse_millis(THROTTLE_ENV, "throttle window", &raw)?;
        }

        debug!(debounce = %config.debounce_delay, throttle = %config.throttle_window, "Loaded wrapper config");
        Ok(config)
    }
}

fn parse_millis(var: &str, name: &'static str, raw: &str) -> ConfigResult<Interval> {
    let millis = raw.trim().parse::<i64>().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: raw.to_string(),
    })?;
    Interval::from_millis(name, millis)
}
