//! Prometheus exposition of backup health.
//!
//! The gauges are an observer of `SharedHealth`: they are only set while its
//! write lock is held, and `encode` gathers under the read lock, so a scrape
//! never mixes values from two different runs.

use std::sync::Arc;

use anyhow::{Context, Result};
use backup_core::{Clock, HealthReporter, HealthSnapshot, SharedHealth};
use prometheus::{Encoder, Gauge, Registry, TextEncoder};

pub struct BackupMetrics {
    registry: Registry,
    health: SharedHealth,
}

impl BackupMetrics {
    pub fn new(clock: Arc<dyn Clock>) -> Result<Self> {
        let registry = Registry::new();

        let state = Gauge::new(
            "sqlite_to_r2_backup_state",
            "The state of the db backup. (1 - successful, 0 - failed)",
        )?;
        let last_successful = Gauge::new(
            "sqlite_to_r2_backup_last_successful",
            "The last successful backup timestamp",
        )?;
        let duration_ms = Gauge::new(
            "sqlite_to_r2_backups_duration_ms",
            "The duration of db backup execution in ms",
        )?;

        for gauge in [&state, &last_successful, &duration_ms] {
            registry
                .register(Box::new(gauge.clone()))
                .context("register backup gauge")?;
        }

        let health = SharedHealth::new(clock).on_change(move |snapshot: HealthSnapshot| {
            state.set(f64::from(snapshot.state));
            last_successful.set(snapshot.last_success_unix_time as f64);
            duration_ms.set(snapshot.last_duration_ms as f64);
        });

        Ok(Self { registry, health })
    }

    /// Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let families = self.health.read_with(|_| self.registry.gather());
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .context("encode metrics")?;
        String::from_utf8(buffer).context("metrics are not utf-8")
    }
}

impl HealthReporter for BackupMetrics {
    fn record_failure(&self) {
        self.health.record_failure();
    }

    fn record_success(&self, duration_ms: u64) {
        self.health.record_success(duration_ms);
    }

    fn snapshot(&self) -> HealthSnapshot {
        self.health.snapshot()
    }
}
