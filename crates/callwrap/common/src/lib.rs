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

//! Shared building blocks for the callwrap wrappers: errors, validated
//! intervals, cache keys, timer providers and configuration.

pub mod config;
pub mod error;
pub mod interval;
pub mod key;
pub mod timer;

pub use config::WrapConfig;
pub use error::{CallError, ConfigError, ConfigResult, EmitError, KeyError, SubscriberFailure, TimerError};
pub use interval::Interval;
pub use key::{ArgValue, Args, CacheKey};
pub use timer::{ManualTimer, TimerAction, TimerProvider, TimerState, TimerToken, TokioTimer};
