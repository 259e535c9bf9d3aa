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

//! Named-event publish/subscribe
//!
//! # Failure policy
//! A subscriber that returns `Err` or panics does not stop the emit: every
//! remaining subscriber still runs, and the failures are returned together
//! as an [`EmitError`] once the whole snapshot has been dispatched.
//!
//! # Snapshot semantics
//! `emit` copies the subscriber list when it starts. Subscribers added or
//! removed while an emit is running, including from inside a subscriber,
//! only affect later emits.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use callwrap_common::{EmitError, SubscriberFailure};
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::panic_message;

/// Subscriber callback for payloads of type `P`
pub type Callback<P> = Arc<dyn Fn(&P) -> anyhow::Result<()> + Send + Sync>;

/// A unique identifier for a registration within one dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Handle returned by [`EventDispatcher::on`], used to unsubscribe.
///
/// A handle only ever matches registrations of the dispatcher that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    dispatcher: u64,
    event: String,
    id: SubscriptionId,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

struct Registration<P> {
    id: SubscriptionId,
    callback: Callback<P>,
    once: bool,
}

impl<P> Clone for Registration<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: self.callback.clone(),
            once: self.once,
        }
    }
}

/// Identity allocator for dispatchers; holds no registry state
static DISPATCHER_IDS: AtomicU64 = AtomicU64::new(0);

/// Registry mapping event names to ordered subscriber lists
pub struct EventDispatcher<P> {
    instance: u64,
    registry: RwLock<HashMap<String, Vec<Registration<P>>>>,
    next_id: AtomicU64,
}

impl<P> EventDispatcher<P> {
    pub fn new() -> Self {
        Self {
            instance: DISPATCHER_IDS.fetch_add(1, Ordering::Relaxed),
            registry: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Appends `callback` to the subscribers of `event`
    pub fn on<F>(&self, event: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&P) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(event.into(), Arc::new(callback), false)
    }

    /// Like [`on`](Self::on), but the subscription is removed when it is first delivered
    pub fn once<F>(&self, event: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&P) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(event.into(), Arc::new(callback), true)
    }

    fn register(&self, event: String, callback: Callback<P>, once: bool) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry.write();
        registry.entry(event.clone()).or_default().push(Registration { id, callback, once });
        debug!(event = %event, subscription = id.0, once, "Registered subscriber");
        Subscription {
            dispatcher: self.instance,
            event,
            id,
        }
    }

    /// Removes the registration behind `subscription`.
    ///
    /// Returns false, without error, when it was already removed or was
    /// issued by another dispatcher.
    pub fn off(&self, subscription: &Subscription) -> bool {
        if subscription.dispatcher != self.instance {
            debug!(event = %subscription.event, subscription = subscription.id.0, "Ignored subscription from another dispatcher");
            return false;
        }
        let mut registry = self.registry.write();
        let Some(subscribers) = registry.get_mut(&subscription.event) else {
            return false;
        };
        let Some(index) = subscribers.iter().position(|r| r.id == subscription.id) else {
            return false;
        };
        subscribers.remove(index);
        if subscribers.is_empty() {
            registry.remove(&subscription.event);
        }
        debug!(event = %subscription.event, subscription = subscription.id.0, "Removed subscriber");
        true
    }

    /// Delivers `payload` to every subscriber of `event`, in registration order
    ///
    /// # Returns
    /// The number of subscribers invoked. Zero subscribers is not an error.
    ///
    /// # Errors
    /// [`EmitError`] listing every subscriber that failed or panicked, after
    /// all of them have run
    pub fn emit(&self, event: &str, payload: &P) -> Result<usize, EmitError> {
        let snapshot = self.snapshot(event);
        if snapshot.is_empty() {
            trace!(event, "Emit with no subscribers");
            return Ok(0);
        }

        let mut failures = Vec::new();
        for registration in &snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| (registration.callback)(payload)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => SubscriberFailure {
                    subscription: registration.id.0,
                    message: format!("{err:#}"),
                    panicked: false,
                },
                Err(panic) => SubscriberFailure {
                    subscription: registration.id.0,
                    message: panic_message(&*panic),
                    panicked: true,
                },
            };
            warn!(event, %failure, "Subscriber failed");
            failures.push(failure);
        }

        let delivered = snapshot.len();
        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(EmitError {
                event: event.to_string(),
                delivered,
                failures,
            })
        }
    }

    /// Copies the subscriber list and claims any one-shot subscribers in it.
    ///
    /// One-shot registrations are removed under the write lock, so a
    /// concurrent emit can never deliver them a second time.
    fn snapshot(&self, event: &str) -> Vec<Registration<P>> {
        let snapshot: Vec<Registration<P>> = self.registry.read().get(event).cloned().unwrap_or_default();
        if !snapshot.iter().any(|r| r.once) {
            return snapshot;
        }

        let mut claimed = HashSet::new();
        {
            let mut registry = self.registry.write();
            if let Some(subscribers) = registry.get_mut(event) {
                subscribers.retain(|r| {
                    let claim = r.once && snapshot.iter().any(|s| s.id == r.id);
                    if claim {
                        claimed.insert(r.id);
                    }
                    !claim
                });
                if subscribers.is_empty() {
                    registry.remove(event);
                }
            }
        }

        snapshot.into_iter().filter(|r| !r.once || claimed.contains(&r.id)).collect()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.registry.read().get(event).map_or(0, Vec::len)
    }

    /// Names of events with at least one subscriber, sorted
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Removes every subscriber of `event`, returning how many there were
    pub fn clear(&self, event: &str) -> usize {
        self.registry.write().remove(event).map_or(0, |subscribers| subscribers.len())
    }
}

impl<P> Default for EventDispatcher<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for EventDispatcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read();
        let counts: HashMap<&str, usize> = registry.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("EventDispatcher").field("subscribers", &counts).finish()
    }
}
