//! Fingerprint cache with single-flight computation.
//!
//! For any fingerprint at most one computation runs at a time. Callers that
//! arrive while it is running block until it finishes and receive the same
//! result, success or failure. Only successes are stored; a failed or
//! panicked computation leaves no entry, so the next caller retries.

use crate::domain::error::IndicatorError;
use crate::domain::fingerprint::Fingerprint;
use crate::domain::series::Series;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Time source for expiry. Injected so tests can move time forward.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *lock(&self.now)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub series: Arc<Series>,
    pub computed_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.computed_at) >= self.ttl
    }
}

/// How a `get_or_compute` call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOutcome {
    /// A live entry was returned.
    Hit,
    /// This caller ran the computation.
    Miss,
    /// This caller waited on another caller's computation.
    Joined,
}

impl std::fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Joined => "joined",
        })
    }
}

pub type FlightResult = Result<Arc<Series>, IndicatorError>;

#[derive(Default)]
struct Flight {
    result: Mutex<Option<FlightResult>>,
    done: Condvar,
}

impl Flight {
    fn wait(&self) -> FlightResult {
        let mut guard = lock(&self.result);
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = self.done.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn publish(&self, result: FlightResult) {
        *lock(&self.result) = Some(result);
        self.done.notify_all();
    }
}

enum Slot {
    Ready(CacheEntry),
    InFlight(Arc<Flight>),
}

enum Lookup {
    Hit(Arc<Series>),
    Join(Arc<Flight>),
    Lead(Arc<Flight>),
}

pub struct FingerprintCache {
    slots: Mutex<HashMap<Fingerprint, Slot>>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FingerprintCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintCache")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .field("entries", &self.len())
            .finish()
    }
}

impl FingerprintCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self::with_clock(ttl, capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the live entry for `fingerprint`, or run `compute` exactly once
    /// across all concurrent callers and share its result.
    pub fn get_or_compute<F>(&self, fingerprint: Fingerprint, compute: F) -> (FlightResult, CacheOutcome)
    where
        F: FnOnce() -> Result<Series, IndicatorError>,
    {
        let lookup = {
            let mut slots = lock(&self.slots);
            let now = self.clock.now();
            match slots.get(&fingerprint) {
                Some(Slot::Ready(entry)) if !entry.is_expired(now) => {
                    Lookup::Hit(Arc::clone(&entry.series))
                }
                Some(Slot::InFlight(flight)) => Lookup::Join(Arc::clone(flight)),
                _ => {
                    let flight = Arc::new(Flight::default());
                    slots.insert(fingerprint, Slot::InFlight(Arc::clone(&flight)));
                    Lookup::Lead(flight)
                }
            }
        };

        match lookup {
            Lookup::Hit(series) => (Ok(series), CacheOutcome::Hit),
            Lookup::Join(flight) => {
                tracing::debug!(fingerprint = %fingerprint.short(), "waiting on in-flight computation");
                (flight.wait(), CacheOutcome::Joined)
            }
            Lookup::Lead(flight) => {
                let guard = FlightGuard {
                    cache: self,
                    fingerprint,
                    flight,
                    finished: false,
                };
                let result = compute().map(Arc::new);
                guard.finish(result.clone());
                (result, CacheOutcome::Miss)
            }
        }
    }

    /// Live entry without computing.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<Series>> {
        let slots = lock(&self.slots);
        match slots.get(fingerprint) {
            Some(Slot::Ready(entry)) if !entry.is_expired(self.clock.now()) => {
                Some(Arc::clone(&entry.series))
            }
            _ => None,
        }
    }

    /// Drop the stored entry for `fingerprint`. A computation in flight is
    /// left alone.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let mut slots = lock(&self.slots);
        if matches!(slots.get(fingerprint), Some(Slot::Ready(_))) {
            slots.remove(fingerprint);
            true
        } else {
            false
        }
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut slots = lock(&self.slots);
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready(entry) => !entry.is_expired(now),
            Slot::InFlight(_) => true,
        });
        let purged = before - slots.len();
        if purged > 0 {
            tracing::debug!(purged, "purged expired cache entries");
        }
        purged
    }

    /// Drop every stored entry.
    pub fn clear(&self) {
        lock(&self.slots).retain(|_, slot| matches!(slot, Slot::InFlight(_)));
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self, fingerprint: Fingerprint, flight: &Arc<Flight>, result: &FlightResult) {
        let now = self.clock.now();
        let mut slots = lock(&self.slots);
        let ours = matches!(slots.get(&fingerprint), Some(Slot::InFlight(f)) if Arc::ptr_eq(f, flight));
        if !ours {
            return;
        }
        match result {
            Ok(series) => {
                self.make_room(&mut slots, now);
                slots.insert(
                    fingerprint,
                    Slot::Ready(CacheEntry {
                        fingerprint,
                        series: Arc::clone(series),
                        computed_at: now,
                        ttl: self.ttl,
                    }),
                );
            }
            Err(_) => {
                slots.remove(&fingerprint);
            }
        }
    }

    /// Evict until one more entry fits: expired entries first, then the oldest.
    fn make_room(&self, slots: &mut HashMap<Fingerprint, Slot>, now: Instant) {
        let ready = |slots: &HashMap<Fingerprint, Slot>| {
            slots.values().filter(|s| matches!(s, Slot::Ready(_))).count()
        };
        if ready(slots) < self.capacity {
            return;
        }
        slots.retain(|_, slot| match slot {
            Slot::Ready(entry) => !entry.is_expired(now),
            Slot::InFlight(_) => true,
        });
        while ready(slots) >= self.capacity {
            let oldest = slots
                .iter()
                .filter_map(|(fp, slot)| match slot {
                    Slot::Ready(entry) => Some((entry.computed_at, *fp)),
                    Slot::InFlight(_) => None,
                })
                .min();
            let Some((_, fp)) = oldest else { break };
            tracing::debug!(fingerprint = %fp.short(), "evicting oldest cache entry");
            slots.remove(&fp);
        }
    }
}

/// Publishes the leader's result to waiters. If the computation unwinds
/// before `finish`, waiters are released with a failure instead.
struct FlightGuard<'a> {
    cache: &'a FingerprintCache,
    fingerprint: Fingerprint,
    flight: Arc<Flight>,
    finished: bool,
}

impl FlightGuard<'_> {
    fn finish(mut self, result: FlightResult) {
        self.cache.store(self.fingerprint, &self.flight, &result);
        self.flight.publish(result);
        self.finished = true;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::error!(fingerprint = %self.fingerprint.short(), "indicator computation panicked");
        let failure = Err(IndicatorError::internal("computation panicked"));
        self.cache.store(self.fingerprint, &self.flight, &failure);
        self.flight.publish(failure);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("cache lock poisoned, recovering");
        poisoned.into_inner()
    })
}
