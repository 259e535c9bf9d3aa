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

//! Function wrappers with private state: memoization, debouncing and
//! throttling, plus a named-event dispatcher and composition helpers.
//!
//! Timed wrappers take their clock from a
//! [`TimerProvider`](callwrap_common::TimerProvider): [`TokioTimer`] in async
//! services, [`ManualTimer`] where time should only move when told to.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use callwrap_core::{ManualTimer, debounce, memoize};
//!
//! let square = memoize(|n: &u64| n * n);
//! assert_eq!(square.call(&5).unwrap(), 25);
//!
//! let timer = Arc::new(ManualTimer::new());
//! let debounced = debounce(|msg: String| { println!("{msg}"); Ok(()) }, Duration::from_millis(100), timer.clone());
//! debounced.call("first".into());
//! debounced.call("second".into());
//! assert_eq!(timer.advance(Duration::from_millis(100)), 1);
//! ```

use std::any::Any;

pub mod compose;
pub mod debounce;
pub mod events;
pub mod memoize;
pub mod throttle;

pub use callwrap_common::{
    ArgValue, Args, CacheKey, CallError, ConfigError, ConfigResult, EmitError, Interval, KeyError, ManualTimer,
    SubscriberFailure, TimerError, TimerProvider, TimerToken, TokioTimer, WrapConfig, args,
};
pub use compose::{Pipeline, Stage, chain, compose, partial, pipe};
pub use debounce::{Debouncer, DebouncerBuilder, debounce};
pub use events::{Callback, EventDispatcher, Subscription, SubscriptionId};
pub use memoize::{MemoStats, Memoized, memoize, try_memoize};
pub use throttle::{ThrottleState, ThrottleStats, Throttled, ThrottledBuilder, throttle};

/// Renders a panic payload caught with `catch_unwind`
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
