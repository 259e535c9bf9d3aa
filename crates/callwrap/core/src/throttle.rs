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

//! Leading-edge throttling

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use callwrap_common::{ConfigError, ConfigResult, Interval, TimerProvider, WrapConfig};
use parking_lot::Mutex;
use tracing::trace;

type ThrottleFn<A, R> = Box<dyn Fn(A) -> R + Send + Sync>;

/// Throttle window state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    /// The next call runs immediately
    Ready,
    /// Calls are dropped until the window timer clears it
    Cooldown,
}

/// Fired/dropped counters for one throttler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleStats {
    pub fired: u64,
    pub dropped: u64,
}

#[derive(Debug)]
struct ThrottleShared {
    state: Mutex<ThrottleState>,
    fired: AtomicU64,
    dropped: AtomicU64,
}

/// Rate-limited wrapper around `Fn(A) -> R`.
///
/// The first call runs immediately and opens a cooldown window. Calls inside
/// the window are discarded, never queued or replayed. The window opens
/// before the function runs, so a failing call still consumes it, and once
/// open it always runs to completion.
pub struct Throttled<A, R> {
    func: ThrottleFn<A, R>,
    shared: Arc<ThrottleShared>,
    timer: Arc<dyn TimerProvider>,
    window: Duration,
}

/// Wraps `func` with the given window. Use [`Throttled::builder`] for validated millisecond input.
pub fn throttle<A, R, F>(func: F, window: Duration, timer: Arc<dyn TimerProvider>) -> Throttled<A, R>
where
    F: Fn(A) -> R + Send + Sync + 'static,
{
    Throttled::from_parts(Box::new(func), window, timer)
}

impl<A, R> Throttled<A, R> {
    pub fn builder<F>(func: F) -> ThrottledBuilder<A, R>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        ThrottledBuilder {
            func: Box::new(func),
            window: Ok(WrapConfig::default().throttle_window),
            timer: None,
        }
    }

    fn from_parts(func: ThrottleFn<A, R>, window: Duration, timer: Arc<dyn TimerProvider>) -> Self {
        Self {
            func,
            shared: Arc::new(ThrottleShared {
                state: Mutex::new(ThrottleState::Ready),
                fired: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            timer,
            window,
        }
    }

    /// Runs the function if the window is clear, otherwise drops `args`
    ///
    /// # Returns
    /// `Some` with the function's result on the triggering call, `None` when dropped
    pub fn call(&self, args: A) -> Option<R> {
        {
            let mut state = self.shared.state.lock();
            if *state == ThrottleState::Cooldown {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Dropped throttled call");
                return None;
            }
            *state = ThrottleState::Cooldown;
        }

        let shared = Arc::downgrade(&self.shared);
        self.timer.schedule(
            self.window,
            Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    *shared.state.lock() = ThrottleState::Ready;
                    trace!("Throttle window closed");
                }
            }),
        );

        self.shared.fired.fetch_add(1, Ordering::Relaxed);
        Some((self.func)(args))
    }

    pub fn state(&self) -> ThrottleState {
        *self.shared.state.lock()
    }

    pub fn is_cooling_down(&self) -> bool {
        self.state() == ThrottleState::Cooldown
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            fired: self.shared.fired.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl<A, R> fmt::Debug for Throttled<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttled")
            .field("window", &self.window)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Configures a [`Throttled`] wrapper
pub struct ThrottledBuilder<A, R> {
    func: ThrottleFn<A, R>,
    window: ConfigResult<Interval>,
    timer: Option<Arc<dyn TimerProvider>>,
}

impl<A, R> ThrottledBuilder<A, R> {
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Ok(Interval::from(window));
        self
    }

    /// Signed milliseconds; negative values fail at [`build`](Self::build)
    pub fn window_millis(mut self, millis: i64) -> Self {
        self.window = Interval::from_millis("throttle window", millis);
        self
    }

    pub fn config(mut self, config: &WrapConfig) -> Self {
        self.window = Ok(config.throttle_window);
        self
    }

    pub fn timer(mut self, timer: Arc<dyn TimerProvider>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn build(self) -> ConfigResult<Throttled<A, R>> {
        let window = self.window?;
        let timer = self.timer.ok_or(ConfigError::MissingTimer("throttler"))?;
        Ok(Throttled::from_parts(self.func, window.as_duration(), timer))
    }
}
