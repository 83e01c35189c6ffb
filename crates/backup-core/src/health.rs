//! Health of the most recent backup run.
//!
//! Single writer (the run loop), many readers (metrics scrapes). Readers get a
//! copy of all three values taken under one lock, so they never see half of an
//! update.

use crate::time::Clock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Point-in-time copy of the health values.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// 1 if the last run succeeded, 0 if it failed (or nothing ran yet).
    pub state: u8,
    pub last_success_unix_time: i64,
    pub last_duration_ms: u64,
}

impl HealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.state == 1
    }
}

/// The mutable health record. Pure; callers supply the time.
#[derive(Debug, Clone, Default)]
pub struct HealthState {
    current: HealthSnapshot,
}

impl HealthState {
    pub fn record_failure(&mut self) {
        self.current.state = 0;
    }

    /// The success timestamp never moves backwards, even if the wall clock does.
    pub fn record_success(&mut self, duration_ms: u64, now_unix: i64) {
        self.current.state = 1;
        self.current.last_duration_ms = duration_ms;
        self.current.last_success_unix_time = self.current.last_success_unix_time.max(now_unix);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.current
    }
}

/// Write side used by the run loop, read side used by the metrics endpoint.
pub trait HealthReporter: Send + Sync {
    fn record_failure(&self);
    fn record_success(&self, duration_ms: u64);
    fn snapshot(&self) -> HealthSnapshot;
}

type Observer = Box<dyn Fn(HealthSnapshot) + Send + Sync>;

/// The one `HealthReporter` implementation. Exporters hook in through
/// [`SharedHealth::on_change`] instead of keeping their own copy.
pub struct SharedHealth {
    state: RwLock<HealthState>,
    clock: Arc<dyn Clock>,
    observer: Option<Observer>,
}

impl SharedHealth {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(HealthState::default()),
            clock,
            observer: None,
        }
    }

    /// `observer` sees every new snapshot while the write lock is still held.
    pub fn on_change(mut self, observer: impl Fn(HealthSnapshot) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Runs `f` under the read lock, so no update lands while it runs.
    pub fn read_with<R>(&self, f: impl FnOnce(HealthSnapshot) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(state.snapshot())
    }

    fn update(&self, apply: impl FnOnce(&mut HealthState)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut state);
        if let Some(observer) = &self.observer {
            observer(state.snapshot());
        }
    }
}

impl HealthReporter for SharedHealth {
    fn record_failure(&self) {
        self.update(HealthState::record_failure);
    }

    fn record_success(&self, duration_ms: u64) {
        let now = self.clock.now_unix();
        self.update(|state| state.record_success(duration_ms, now));
    }

    fn snapshot(&self) -> HealthSnapshot {
        self.read_with(|snapshot| snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::EpochMs;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct StepClock(AtomicI64);

    impl StepClock {
        fn set_unix(&self, secs: i64) {
            self.0.store(secs * 1000, Ordering::SeqCst);
        }
    }

    impl Clock for StepClock {
        fn now_ms(&self) -> EpochMs {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn starts_unhealthy_and_zeroed() {
        let s = HealthState::default().snapshot();
        assert_eq!(s, HealthSnapshot::default());
        assert!(!s.is_healthy());
    }

    #[test]
    fn failure_keeps_previous_success_values() {
        let mut h = HealthState::default();
        h.record_success(1_500, 100);
        h.record_failure();

        let s = h.snapshot();
        assert_eq!(s.state, 0);
        assert_eq!(s.last_success_unix_time, 100);
        assert_eq!(s.last_duration_ms, 1_500);
    }

    #[test]
    fn duration_reflects_latest_success_only() {
        let mut h = HealthState::default();
        h.record_success(900, 100);
        h.record_success(300, 200);
        assert_eq!(h.snapshot().last_duration_ms, 300);
    }

    #[test]
    fn success_timestamp_is_monotonic() {
        let clock = Arc::new(StepClock(AtomicI64::new(0)));
        let health = SharedHealth::new(clock.clone());

        let mut seen = Vec::new();
        for (secs, ok) in [(100, true), (90, true), (150, false), (140, true), (200, true)] {
            clock.set_unix(secs);
            if ok {
                health.record_success(10);
            } else {
                health.record_failure();
            }
            seen.push(health.snapshot().last_success_unix_time);
        }

        assert_eq!(seen, vec![100, 100, 100, 140, 200]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn observer_sees_every_update() {
        let clock = Arc::new(StepClock(AtomicI64::new(0)));
        clock.set_unix(50);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let health = SharedHealth::new(clock).on_change(move |s| sink.lock().unwrap().push(s));

        health.record_success(20);
        health.record_failure();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].state, 1);
        assert_eq!(seen[1].state, 0);
        assert_eq!(seen[1].last_duration_ms, 20);
        assert_eq!(seen[1].last_success_unix_time, 50);
    }
}
