//! Time sources and the monotonic data-version clock.
//!
//! Every field change in the registry is stamped with a value from
//! [`VersionClock`]. Versions are derived from wall-clock milliseconds but
//! are guaranteed unique and strictly increasing even when the underlying
//! clock stalls or runs backwards, so clients can poll "everything newer
//! than version V" without ever missing or re-seeing an update.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "current time" in milliseconds since the Unix epoch.
///
/// Injected rather than read ambiently so the registry, trail, and version
/// logic can be driven deterministically in tests.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The real system clock.
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A hand-driven clock for tests: set or advance it explicitly.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Process-wide strictly-increasing 64-bit version counter.
///
/// `next()` issues `max(now_ms, last + 1)`: versions track wall time while
/// the clock advances, and fall back to simple increments when many versions
/// are issued within one tick or the clock regresses.
pub struct VersionClock {
    source: Arc<dyn TimeSource>,
    last: AtomicI64,
}

impl VersionClock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            last: AtomicI64::new(0),
        }
    }

    /// Issue the next version. Safe under concurrent callers; no two calls
    /// ever return the same value and later calls always return more.
    pub fn next(&self) -> i64 {
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = self.source.now_ms().max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => last = observed,
            }
        }
    }

    /// The most recently issued version, or 0 if none were issued yet.
    pub fn last_issued(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}
