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

//! Error taxonomy shared by every wrapper.

use std::fmt;

/// Raised while building a wrapper. Never raised at call time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be non-negative, got {value}ms")]
    NegativeDuration { name: &'static str, value: i64 },

    #[error("{name} must be a finite non-negative duration, got {value}")]
    NonFiniteDuration { name: &'static str, value: String },

    #[error("no timer provider configured for {0}")]
    MissingTimer(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },
}

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// The argument list could not be turned into a cache key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("argument list cannot be serialized into a cache key: {0}")]
    Unserializable(String),
}

impl serde::ser::Error for KeyError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Unserializable(msg.to_string())
    }
}

/// Failure of a memoized call.
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("wrapped function failed: {0}")]
    Function(E),
}

impl<E> CallError<E> {
    /// Returns the wrapped function's own error, if that is what failed.
    pub fn into_function_error(self) -> Option<E> {
        match self {
            Self::Function(e) => Some(e),
            Self::Key(_) => None,
        }
    }
}

/// Timer provider errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    #[error("no tokio runtime is available on this thread")]
    NoRuntime,
}

/// One subscriber that failed during an emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberFailure {
    /// Raw id of the failing subscription
    pub subscription: u64,
    /// Rendered error or panic message
    pub message: String,
    pub panicked: bool,
}

impl fmt::Display for SubscriberFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.panicked {
            write!(f, "subscriber #{} panicked: {}", self.subscription, self.message)
        } else {
            write!(f, "subscriber #{} failed: {}", self.subscription, self.message)
        }
    }
}

/// Errors collected from every failing subscriber of a single emit.
///
/// Produced only after all subscribers in the snapshot have run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} of {delivered} subscriber(s) for event '{event}' failed", failures.len())]
pub struct EmitError {
    pub event: String,
    /// Number of subscribers invoked, failing ones included
    pub delivered: usize,
    pub failures: Vec<SubscriberFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::NegativeDuration { name: "delay", value: -5 };
        assert_eq!(err.to_string(), "delay must be non-negative, got -5ms");

        let err = ConfigError::MissingTimer("debouncer");
        assert!(err.to_string().contains("debouncer"));
    }

    #[test]
    fn test_call_error_unwraps_function_error() {
        let err: CallError<&str> = CallError::Function("boom");
        assert_eq!(err.to_string(), "wrapped function failed: boom");
        assert_eq!(err.into_function_error(), Some("boom"));

        let err: CallError<&str> = KeyError::Unserializable("socket".into()).into();
        assert!(err.into_function_error().is_none());
    }

    #[test]
    fn test_emit_error_summary() {
        let err = EmitError {
            event: "saved".into(),
            delivered: 3,
            failures: vec![SubscriberFailure {
                subscription: 1,
                message: "disk full".into(),
                panicked: false,
            }],
        };
        assert_eq!(err.to_string(), "1 of 3 subscriber(s) for event 'saved' failed");
        assert_eq!(err.failures[0].to_string(), "subscriber #1 failed: disk full");
    }
}
