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

//! Deferred execution contract used by the debouncer and throttler.
//!
//! Two providers ship with the crate: [`TokioTimer`] runs actions on the
//! ambient tokio runtime, [`ManualTimer`] runs them on an explicitly advanced
//! virtual clock.

mod manual;
mod tokio_timer;

pub use manual::ManualTimer;
pub use tokio_timer::TokioTimer;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

/// Work deferred by a [`TimerProvider`]
pub type TimerAction = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle of a scheduled action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Scheduled,
    Cancelled,
    Fired,
}

const SCHEDULED: u8 = 0;
const CANCELLED: u8 = 1;
const FIRED: u8 = 2;

/// Handle to a scheduled action
///
/// # Thread Safety
/// State transitions are a single compare-exchange, so exactly one of
/// cancel and fire wins.
#[derive(Debug, Clone)]
pub struct TimerToken {
    id: u64,
    state: Arc<AtomicU8>,
}

impl TimerToken {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            state: Arc::new(AtomicU8::new(SCHEDULED)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TimerState {
        match self.state.load(Ordering::Acquire) {
            SCHEDULED => TimerState::Scheduled,
            CANCELLED => TimerState::Cancelled,
            _ => TimerState::Fired,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TimerState::Cancelled
    }

    /// Marks the token cancelled. Returns false if it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(SCHEDULED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claims the right to run the action. Providers call this right before running it.
    pub(crate) fn try_fire(&self) -> bool {
        self.state
            .compare_exchange(SCHEDULED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Host facility that defers an action and allows cancelling it.
///
/// Implementations must never run `action` inline from `schedule`, even for
/// a zero delay, and `cancel` after the action ran must be a no-op.
pub trait TimerProvider: Send + Sync {
    /// Runs `action` once `delay` has elapsed, unless cancelled first
    fn schedule(&self, delay: Duration, action: TimerAction) -> TimerToken;

    /// Prevents the action behind `token` from running
    fn cancel(&self, token: &TimerToken) {
        token.cancel();
    }
}

impl<T: TimerProvider + ?Sized> TimerProvider for Arc<T> {
    fn schedule(&self, delay: Duration, action: TimerAction) -> TimerToken {
        (**self).schedule(delay, action)
    }

    fn cancel(&self, token: &TimerToken) {
        (**self).cancel(token)
    }
}

/// Per-provider token id source
#[derive(Debug, Default)]
pub(crate) struct TokenIds(AtomicU64);

impl TokenIds {
    pub(crate) fn next(&self) -> TimerToken {
        TimerToken::new(self.0.fetch_add(1, Ordering::Relaxed))
    }
}
