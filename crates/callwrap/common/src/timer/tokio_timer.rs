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

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use super::{TimerAction, TimerProvider, TimerState, TimerToken, TokenIds};
use crate::error::TimerError;

/// Timer backed by tokio tasks.
///
/// Each scheduled action is a task sleeping for its delay. Cancelling aborts
/// the task; dropping the timer aborts everything still in flight.
#[derive(Debug)]
pub struct TokioTimer {
    handle: Handle,
    ids: TokenIds,
    tasks: Arc<DashMap<u64, AbortHandle>>,
}

impl TokioTimer {
    /// Binds to the runtime of the calling context
    pub fn try_current() -> Result<Self, TimerError> {
        Handle::try_current().map(Self::with_handle).map_err(|_| TimerError::NoRuntime)
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            ids: TokenIds::default(),
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Number of spawned actions that have neither run nor been cancelled
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }
}

impl TimerProvider for TokioTimer {
    fn schedule(&self, delay: Duration, action: TimerAction) -> TimerToken {
        let token = self.ids.next();
        let id = token.id();
        let task_token = token.clone();
        let tasks = self.tasks.clone();

        // The spawned task always yields at least once, so zero delays are deferred too
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            // Settle the token before dropping the handle so `schedule` sees it either way
            let fire = task_token.try_fire();
            tasks.remove(&id);
            if fire {
                trace!(token = id, "Running timer action");
                action();
            }
        });
        self.tasks.insert(id, join.abort_handle());

        // The task may have finished before its handle was recorded
        if token.state() != TimerState::Scheduled {
            self.tasks.remove(&id);
        }
        token
    }

    fn cancel(&self, token: &TimerToken) {
        if token.cancel() {
            debug!(token = token.id(), "Cancelled timer action");
        }
        if let Some((_, handle)) = self.tasks.remove(&token.id()) {
            handle.abort();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_action(counter: &Arc<AtomicUsize>) -> TimerAction {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_requires_runtime() {
        assert_eq!(TokioTimer::try_current().unwrap_err(), TimerError::NoRuntime);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let timer = TokioTimer::try_current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        timer.schedule(Duration::from_millis(100), counter_action(&counter));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(timer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_not_inline() {
        let timer = TokioTimer::try_current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        timer.schedule(Duration::ZERO, counter_action(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_and_after_fire() {
        let timer = TokioTimer::try_current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let cancelled = timer.schedule(Duration::from_millis(10), counter_action(&counter));
        let fired = timer.schedule(Duration::from_millis(10), counter_action(&counter));
        timer.cancel(&cancelled);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(fired.state(), TimerState::Fired);

        timer.cancel(&fired);
        assert_eq!(fired.state(), TimerState::Fired);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_zero_delay_burst_leaves_no_handles() {
        let timer = TokioTimer::try_current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..500 {
            timer.schedule(Duration::ZERO, counter_action(&counter));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) < 500 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(timer.in_flight(), 0);
    }
}
