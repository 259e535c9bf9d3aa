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

//! Result caching for pure functions

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use callwrap_common::{CacheKey, CallError};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

type MemoFn<A, R, E> = Box<dyn Fn(&A) -> Result<R, E> + Send + Sync>;

/// Hit/miss counters for one memoizer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStats {
    pub hits: u64,
    pub misses: u64,
}

/// A pure function wrapped with a private result cache.
///
/// Results are keyed by [`CacheKey::of`] the argument value and computed at
/// most once per key. Failed computations are not cached. Entries live as
/// long as the wrapper; there is no eviction.
///
/// # Concurrency
/// The cache lock is held while the function runs, so concurrent callers
/// with the same arguments still trigger a single computation. The function
/// must therefore not call back into the same memoizer.
pub struct Memoized<A, R, E = Infallible> {
    func: MemoFn<A, R, E>,
    cache: Mutex<HashMap<CacheKey, R>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Wraps an infallible pure function
pub fn memoize<A, R, F>(func: F) -> Memoized<A, R, Infallible>
where
    F: Fn(&A) -> R + Send + Sync + 'static,
{
    try_memoize(move |args: &A| Ok(func(args)))
}

/// Wraps a fallible pure function. Errors are returned to the caller and never cached.
pub fn try_memoize<A, R, E, F>(func: F) -> Memoized<A, R, E>
where
    F: Fn(&A) -> Result<R, E> + Send + Sync + 'static,
{
    Memoized {
        func: Box::new(func),
        cache: Mutex::new(HashMap::new()),
        hits: AtomicU64::new(0),
        misses: AtomicU64::new(0),
    }
}

impl<A, R, E> Memoized<A, R, E>
where
    A: Serialize,
    R: Clone,
{
    /// Returns the cached result for `args`, computing it on first use
    ///
    /// # Errors
    /// - [`CallError::Key`] if `args` cannot be serialized; the function is not run
    /// - [`CallError::Function`] if the function fails; nothing is stored
    pub fn call(&self, args: &A) -> Result<R, CallError<E>> {
        let key = CacheKey::of(args)?;
        let mut cache = self.cache.lock();

        if let Some(hit) = cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(?key, "Memo cache hit");
            return Ok(hit.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(?key, "Memo cache miss");
        let value = (self.func)(args).map_err(CallError::Function)?;
        cache.insert(key, value.clone());
        Ok(value)
    }

    /// Whether a result for `args` is already cached
    pub fn contains(&self, args: &A) -> bool {
        CacheKey::of(args).is_ok_and(|key| self.cache.lock().contains_key(&key))
    }
}

impl<A, R, E> Memoized<A, R, E> {
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// Drops every cached result. Counters are kept.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> MemoStats {
        MemoStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<A, R, E> fmt::Debug for Memoized<A, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("entries", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}
