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

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::{TimerAction, TimerProvider, TimerToken, TokenIds};

struct ManualState {
    now: Duration,
    /// Keyed by (deadline, token id) so equal deadlines run in scheduling order
    queue: BTreeMap<(Duration, u64), (TimerToken, TimerAction)>,
}

/// Virtual clock timer.
///
/// Nothing runs until the owner calls [`advance`](Self::advance) or
/// [`run_until_idle`](Self::run_until_idle). Actions run on the calling
/// thread, outside the internal lock, so they may schedule or cancel further
/// actions.
pub struct ManualTimer {
    ids: TokenIds,
    state: Mutex<ManualState>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self {
            ids: TokenIds::default(),
            state: Mutex::new(ManualState {
                now: Duration::ZERO,
                queue: BTreeMap::new(),
            }),
        }
    }

    /// Virtual time elapsed since creation
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of actions still waiting to run
    pub fn pending(&self) -> usize {
        self.state.lock().queue.values().filter(|(token, _)| !token.is_cancelled()).count()
    }

    /// Moves the clock forward by `by`, running every action that falls due,
    /// in deadline order. Returns the number of actions run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let fired = self.drain(Some(target));
        let mut state = self.state.lock();
        if state.now < target {
            state.now = target;
        }
        fired
    }

    /// Runs every queued action, jumping the clock to each deadline in turn.
    ///
    /// Does not return while actions keep scheduling new ones.
    pub fn run_until_idle(&self) -> usize {
        self.drain(None)
    }

    fn drain(&self, until: Option<Duration>) -> usize {
        let mut fired = 0;
        loop {
            let next = {
                let mut state = self.state.lock();
                let due = match (state.queue.keys().next(), until) {
                    (Some((deadline, _)), Some(limit)) => *deadline <= limit,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if !due {
                    break;
                }
                state.queue.pop_first().map(|((deadline, _), entry)| {
                    state.now = state.now.max(deadline);
                    entry
                })
            };

            if let Some((token, action)) = next
                && token.try_fire()
            {
                trace!(token = token.id(), "Running manual timer action");
                action();
                fired += 1;
            }
        }
        fired
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTimer")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

impl TimerProvider for ManualTimer {
    fn schedule(&self, delay: Duration, action: TimerAction) -> TimerToken {
        let token = self.ids.next();
        let mut state = self.state.lock();
        let deadline = state.now + delay;
        state.queue.insert((deadline, token.id()), (token.clone(), action));
        token
    }

    fn cancel(&self, token: &TimerToken) {
        if token.cancel() {
            self.state.lock().queue.retain(|_, (queued, _)| queued.id() != token.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_action(counter: &Arc<AtomicUsize>) -> TimerAction {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_zero_delay_is_deferred() {
        let timer = ManualTimer::new();
        let counter = Arc::new(AtomicUsize::new(0));

        timer.schedule(Duration::ZERO, counter_action(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert_eq!(timer.advance(Duration::ZERO), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_runs_in_deadline_order() {
        let timer = ManualTimer::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, delay) in [("late", 30), ("early", 10), ("tie", 10)] {
            let order = order.clone();
            timer.schedule(Duration::from_millis(delay), Box::new(move || order.lock().push(label)));
        }

        timer.advance(Duration::from_millis(20));
        assert_eq!(*order.lock(), vec!["early", "tie"]);
        assert_eq!(timer.now(), Duration::from_millis(20));

        timer.advance(Duration::from_millis(10));
        assert_eq!(*order.lock(), vec!["early", "tie", "late"]);
    }

    #[test]
    fn test_cancel_prevents_run() {
        let timer = ManualTimer::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let token = timer.schedule(Duration::from_millis(5), counter_action(&counter));
        timer.cancel(&token);
        assert_eq!(timer.pending(), 0);

        timer.advance(Duration::from_millis(10));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // Cancelling again after the deadline is harmless
        timer.cancel(&token);
    }

    #[test]
    fn test_actions_can_schedule_more_work() {
        let timer = Arc::new(ManualTimer::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_timer = timer.clone();
        let inner_counter = counter.clone();
        timer.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                inner_timer.schedule(Duration::from_millis(5), counter_action(&inner_counter));
            }),
        );

        assert_eq!(timer.advance(Duration::from_millis(20)), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_until_idle_jumps_clock() {
        let timer = ManualTimer::new();
        let counter = Arc::new(AtomicUsize::new(0));
        timer.schedule(Duration::from_secs(60), counter_action(&counter));

        assert_eq!(timer.run_until_idle(), 1);
        assert_eq!(timer.now(), Duration::from_secs(60));
    }
}
