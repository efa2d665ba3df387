//! Versioned handle over an immutable index snapshot.
//!
//! Readers load the current generation with a single atomic pointer read and
//! keep it alive for as long as they hold the `Arc`. Writers build a new
//! value off to the side, then publish it in one swap. Builds are serialized
//! by an async mutex; readers never wait on them.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::MutexGuard;
use tracing::info;

/// One published generation.
#[derive(Debug)]
pub struct Generation<T> {
    pub number: u64,
    pub built_at: DateTime<Utc>,
    pub value: T,
}

/// Exclusive right to build the next generation.
///
/// Dropping the guard without publishing abandons the number; the next
/// build gets a fresh one.
pub struct BuildGuard<'a> {
    number: u64,
    _lock: MutexGuard<'a, ()>,
}

impl BuildGuard<'_> {
    pub fn number(&self) -> u64 {
        self.number
    }
}

pub struct GenerationHandle<T> {
    current: ArcSwapOption<Generation<T>>,
    next_number: AtomicU64,
    build_lock: tokio::sync::Mutex<()>,
    retired: Mutex<Vec<Arc<Generation<T>>>>,
}

impl<T> Default for GenerationHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GenerationHandle<T> {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            next_number: AtomicU64::new(1),
            build_lock: tokio::sync::Mutex::new(()),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Current generation, if any has been published.
    pub fn current(&self) -> Option<Arc<Generation<T>>> {
        self.current.load_full()
    }

    /// Number of the current generation, 0 when nothing is published.
    pub fn generation(&self) -> u64 {
        self.current.load_full().map(|g| g.number).unwrap_or(0)
    }

    /// Wait for any in-flight build, then reserve the next generation number.
    pub async fn begin_build(&self) -> BuildGuard<'_> {
        let lock = self.build_lock.lock().await;
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        BuildGuard {
            number,
            _lock: lock,
        }
    }

    /// Publish `value` as the guard's generation, retiring the previous one.
    pub fn publish(
        &self,
        guard: BuildGuard<'_>,
        built_at: DateTime<Utc>,
        value: T,
    ) -> Arc<Generation<T>> {
        self.install(guard.number, built_at, value)
    }

    /// Install a generation restored from disk without a build.
    ///
    /// Later builds are numbered after it.
    pub fn restore(&self, number: u64, built_at: DateTime<Utc>, value: T) -> Arc<Generation<T>> {
        self.next_number.fetch_max(number + 1, Ordering::SeqCst);
        self.install(number, built_at, value)
    }

    fn install(&self, number: u64, built_at: DateTime<Utc>, value: T) -> Arc<Generation<T>> {
        let generation = Arc::new(Generation {
            number,
            built_at,
            value,
        });
        let previous = self.current.swap(Some(Arc::clone(&generation)));
        if let Some(old) = previous {
            info!(from = old.number, to = number, "Swapped active generation");
            self.retired.lock().push(old);
        } else {
            info!(generation = number, "Activated first generation");
        }
        generation
    }

    /// Remove and return retired generations no reader still holds.
    pub fn take_reclaimable(&self) -> Vec<Arc<Generation<T>>> {
        let mut retired = self.retired.lock();
        let (free, held): (Vec<_>, Vec<_>) = retired
            .drain(..)
            .partition(|g| Arc::strong_count(g) == 1);
        *retired = held;
        free
    }

    /// Number of retired generations still awaiting reclamation.
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }
}
