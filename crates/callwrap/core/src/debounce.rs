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

//! Trailing-edge debouncing
//!
//! A burst of calls, each arriving less than the delay after the previous
//! one, collapses into a single invocation that runs one delay after the last
//! call with that call's arguments.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use callwrap_common::{ConfigError, ConfigResult, Interval, TimerProvider, TimerToken, WrapConfig};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::panic_message;

type DebounceFn<A> = Box<dyn Fn(A) -> anyhow::Result<()> + Send + Sync>;
type ErrorSink = Box<dyn Fn(anyhow::Error) + Send + Sync>;

/// The one outstanding invocation, tagged so a superseded timer action can
/// recognise itself as stale.
#[derive(Debug)]
struct Pending {
    token: TimerToken,
    generation: u64,
}

struct DebounceShared<A> {
    func: DebounceFn<A>,
    on_error: Option<ErrorSink>,
    pending: Mutex<Option<Pending>>,
    fired: AtomicU64,
}

impl<A> DebounceShared<A> {
    fn fire(&self, generation: u64, args: A) {
        {
            let mut pending = self.pending.lock();
            match pending.as_ref() {
                Some(current) if current.generation == generation => *pending = None,
                _ => {
                    trace!(generation, "Skipping superseded debounce invocation");
                    return;
                }
            }
        }

        self.fired.fetch_add(1, Ordering::Relaxed);
        debug!(generation, "Firing debounced invocation");

        let outcome = catch_unwind(AssertUnwindSafe(|| (self.func)(args)))
            .unwrap_or_else(|panic| Err(anyhow::anyhow!("debounced function panicked: {}", panic_message(&*panic))));

        if let Err(err) = outcome {
            match &self.on_error {
                Some(sink) => sink(err),
                None => error!(error = %err, "Debounced function failed and no error handler is installed"),
            }
        }
    }
}

/// Debounced wrapper around `Fn(A)`.
///
/// The wrapped function's result is not returned to callers; failures go to
/// the handler given to [`DebouncerBuilder::on_error`], or to the `tracing`
/// error log when none is set. Dropping the debouncer cancels any pending
/// invocation.
pub struct Debouncer<A> {
    shared: Arc<DebounceShared<A>>,
    timer: Arc<dyn TimerProvider>,
    delay: Duration,
    generation: AtomicU64,
}

/// Wraps `func` with the given delay. See [`Debouncer::builder`] for error handlers.
pub fn debounce<A, F>(func: F, delay: Duration, timer: Arc<dyn TimerProvider>) -> Debouncer<A>
where
    A: Send + 'static,
    F: Fn(A) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Debouncer::from_parts(Box::new(func), None, delay, timer)
}

impl<A: Send + 'static> Debouncer<A> {
    pub fn builder<F>(func: F) -> DebouncerBuilder<A>
    where
        F: Fn(A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        DebouncerBuilder {
            func: Box::new(func),
            delay: Ok(WrapConfig::default().debounce_delay),
            timer: None,
            on_error: None,
        }
    }

    fn from_parts(func: DebounceFn<A>, on_error: Option<ErrorSink>, delay: Duration, timer: Arc<dyn TimerProvider>) -> Self {
        Self {
            shared: Arc::new(DebounceShared {
                func,
                on_error,
                pending: Mutex::new(None),
                fired: AtomicU64::new(0),
            }),
            timer,
            delay,
            generation: AtomicU64::new(0),
        }
    }

    /// Replaces any pending invocation with one for `args`, due one delay from now
    pub fn call(&self, args: A) {
        // Held across schedule so the new action cannot observe the old slot
        let mut pending = self.shared.pending.lock();
        if let Some(previous) = pending.take() {
            self.timer.cancel(&previous.token);
            trace!(generation = previous.generation, "Cancelled superseded debounce invocation");
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let shared: Weak<DebounceShared<A>> = Arc::downgrade(&self.shared);
        let token = self.timer.schedule(
            self.delay,
            Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.fire(generation, args);
                }
            }),
        );
        debug!(generation, delay_ms = self.delay.as_millis() as u64, "Scheduled debounced invocation");
        *pending = Some(Pending { token, generation });
    }
}

impl<A> Debouncer<A> {
    /// Drops the pending invocation, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        match self.shared.pending.lock().take() {
            Some(previous) => {
                self.timer.cancel(&previous.token);
                debug!(generation = previous.generation, "Cancelled debounced invocation");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.shared.pending.lock().is_some()
    }

    /// Number of times the wrapped function has run
    pub fn fire_count(&self) -> u64 {
        self.shared.fired.load(Ordering::Relaxed)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<A> Drop for Debouncer<A> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<A> fmt::Debug for Debouncer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("pending", &self.is_pending())
            .field("fired", &self.fire_count())
            .finish()
    }
}

/// Configures a [`Debouncer`]. Validation happens in [`build`](Self::build).
pub struct DebouncerBuilder<A> {
    func: DebounceFn<A>,
    delay: ConfigResult<Interval>,
    timer: Option<Arc<dyn TimerProvider>>,
    on_error: Option<ErrorSink>,
}

impl<A: Send + 'static> DebouncerBuilder<A> {
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Ok(Interval::from(delay));
        self
    }

    /// Signed milliseconds; negative values fail at [`build`](Self::build)
    pub fn delay_millis(mut self, millis: i64) -> Self {
        self.delay = Interval::from_millis("debounce delay", millis);
        self
    }

    pub fn config(mut self, config: &WrapConfig) -> Self {
        self.delay = Ok(config.debounce_delay);
        self
    }

    pub fn timer(mut self, timer: Arc<dyn TimerProvider>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Receives every error or panic from the wrapped function
    pub fn on_error<F>(mut self, sink: F) -> Self
    where
        F: Fn(anyhow::Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(sink));
        self
    }

    pub fn build(self) -> ConfigResult<Debouncer<A>> {
        let delay = self.delay?;
        let timer = self.timer.ok_or(ConfigError::MissingTimer("debouncer"))?;
        Ok(Debouncer::from_parts(self.func, self.on_error, delay.as_duration(), timer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callwrap_common::{ManualTimer, TokioTimer};

    const DELAY: Duration = Duration::from_millis(100);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn recording(timer: &Arc<ManualTimer>) -> (Debouncer<&'static str>, Arc<Mutex<Vec<(&'static str, Duration)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let clock = timer.clone();
        let debouncer = debounce(
            move |msg: &'static str| {
                sink.lock().push((msg, clock.now()));
                Ok(())
            },
            DELAY,
            timer.clone(),
        );
        (debouncer, seen)
    }

    #[test]
    fn test_burst_fires_once_with_last_arguments() {
        let timer = Arc::new(ManualTimer::new());
        let (debouncer, seen) = recording(&timer);

        debouncer.call("First");
        timer.advance(ms(20));
        debouncer.call("Second");
        timer.advance(ms(20));
        debouncer.call("Third");

        timer.advance(ms(99));
        assert!(seen.lock().is_empty());
        assert!(debouncer.is_pending());

        timer.advance(ms(1));
        assert_eq!(*seen.lock(), vec![("Third", ms(140))]);
        assert_eq!(debouncer.fire_count(), 1);
        assert!(!debouncer.is_pending());

        timer.advance(ms(500));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_calls_spaced_by_half_delay() {
        let timer = Arc::new(ManualTimer::new());
        let (debouncer, seen) = recording(&timer);

        debouncer.call("t");
        timer.advance(DELAY / 2);
        debouncer.call("t+d/2");
        timer.advance(DELAY / 2);
        debouncer.call("t+d");

        timer.advance(DELAY - ms(1));
        assert!(seen.lock().is_empty());
        timer.advance(ms(1));
        assert_eq!(*seen.lock(), vec![("t+d", DELAY * 2)]);
    }

    #[test]
    fn test_reusable_after_firing() {
        let timer = Arc::new(ManualTimer::new());
        let (debouncer, seen) = recording(&timer);

        debouncer.call("a");
        timer.advance(DELAY);
        debouncer.call("b");
        timer.advance(DELAY);

        let labels: Vec<_> = seen.lock().iter().map(|(label, _)| *label).collect();
        assert_eq!(labels, vec!["a", "b"]);
    }

    #[test]
    fn test_zero_delay_still_deferred() {
        let timer = Arc::new(ManualTimer::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let debouncer = debounce(
            move |n: u32| {
                sink.lock().push(n);
                Ok(())
            },
            Duration::ZERO,
            timer.clone(),
        );

        debouncer.call(1);
        debouncer.call(2);
        assert!(seen.lock().is_empty());

        timer.advance(Duration::ZERO);
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_drop_cancels_pending_invocation() {
        let timer = Arc::new(ManualTimer::new());
        let (debouncer, seen) = recording(&timer);

        debouncer.call("never");
        drop(debouncer);

        assert_eq!(timer.pending(), 0);
        timer.advance(DELAY * 2);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_explicit_cancel() {
        let timer = Arc::new(ManualTimer::new());
        let (debouncer, seen) = recording(&timer);

        assert!(!debouncer.cancel());
        debouncer.call("dropped");
        assert!(debouncer.cancel());
        timer.advance(DELAY);
        assert!(seen.lock().is_empty());
        assert_eq!(debouncer.fire_count(), 0);
    }

    #[test]
    fn test_errors_reach_error_handler() {
        let timer = Arc::new(ManualTimer::new());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();

        let debouncer = Debouncer::builder(|n: i32| {
            if n < 0 {
                anyhow::bail!("negative input {n}");
            }
            if n == 0 {
                panic!("zero is not allowed");
            }
            Ok(())
        })
        .delay(DELAY)
        .timer(timer.clone())
        .on_error(move |err| sink.lock().push(err.to_string()))
        .build()
        .unwrap();

        debouncer.call(-3);
        timer.advance(DELAY);
        debouncer.call(0);
        timer.advance(DELAY);
        debouncer.call(7);
        timer.advance(DELAY);

        let errors = errors.lock();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], "negative input -3");
        assert!(errors[1].contains("zero is not allowed"));
        assert_eq!(debouncer.fire_count(), 3);
    }

    #[test]
    fn test_errors_without_handler_are_logged() {
        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl std::io::Write for Captured {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();

        let timer = Arc::new(ManualTimer::new());
        let debouncer = debounce(|_: ()| anyhow::bail!("index unavailable"), DELAY, timer.clone());

        tracing::subscriber::with_default(subscriber, || {
            debouncer.call(());
            assert_eq!(timer.advance(DELAY), 1);
        });
        assert_eq!(debouncer.fire_count(), 1);

        let output = String::from_utf8_lossy(&captured.0.lock()).into_owned();
        let line = output
            .lines()
            .find(|line| line.contains("no error handler is installed"))
            .unwrap_or_else(|| panic!("missing error log in:\n{output}"));
        assert!(line.contains("ERROR"));
        assert!(line.contains("index unavailable"));
    }

    #[test]
    fn test_builder_validation() {
        let timer = Arc::new(ManualTimer::new());

        let err = Debouncer::builder(|_: ()| Ok(())).delay_millis(-5).timer(timer.clone()).build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::NegativeDuration {
                name: "debounce delay",
                value: -5
            }
        );

        let err = Debouncer::builder(|_: ()| Ok(())).delay(DELAY).build().unwrap_err();
        assert_eq!(err, ConfigError::MissingTimer("debouncer"));

        let config = WrapConfig {
            debounce_delay: Interval::from(ms(250)),
            ..WrapConfig::default()
        };
        let debouncer = Debouncer::builder(|_: ()| Ok(())).config(&config).timer(timer).build().unwrap();
        assert_eq!(debouncer.delay(), ms(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_burst() {
        let timer: Arc<dyn TimerProvider> = Arc::new(TokioTimer::try_current().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let debouncer = debounce(
            move |n: u32| {
                sink.lock().push(n);
                Ok(())
            },
            DELAY,
            timer,
        );

        for n in 1..=3 {
            debouncer.call(n);
            tokio::time::sleep(ms(50)).await;
        }
        assert!(seen.lock().is_empty());

        tokio::time::sleep(ms(60)).await;
        assert_eq!(*seen.lock(), vec![3]);
    }
}
