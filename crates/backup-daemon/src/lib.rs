#![forbid(unsafe_code)]

//! Backup daemon: snapshots a live SQLite file, ships it to R2 and exposes
//! the outcome as Prometheus gauges.

pub mod config;
pub mod http;
pub mod metrics;
pub mod pacer;
pub mod replicator;
pub mod scheduler;
pub mod snapshot;
