//! Medidor - in-process transaction profiler
//!
//! Application threads record named transactions (timed actions, per-method
//! call statistics, counters) through a cheap per-thread recorder; closed
//! transactions are handed to a single background writer that persists them
//! to rotating per-name log files and aggregates recent windows into
//! percentage breakdowns. Producers never block and never see a failure.

pub mod aggregate;
pub mod config;
pub mod handoff;
pub mod profiler;
pub mod recorder;
pub mod rotate;
pub mod transaction;
pub mod writer;
