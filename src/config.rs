//! Profiler configuration
//!
//! One real option (the target folder, or none for console output) plus the
//! tunables the pipeline exposes: queue capacity, rotation threshold and
//! aggregation window size.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default hand-off queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default number of records written to a file before it is rotated
pub const DEFAULT_ROTATE_AFTER: u64 = 100_000;

/// Default number of transactions per aggregation window
pub const DEFAULT_AGGREGATE_WINDOW: usize = 20;

/// Configuration for a [`Profiler`](crate::profiler::Profiler) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Folder for measure logs; `None` means write to the console with no
    /// rotation
    pub folder: Option<PathBuf>,
    /// Capacity of the producer -> writer hand-off queue
    pub queue_capacity: usize,
    /// Records per file before rotation
    pub rotate_after: u64,
    /// Transactions per aggregation window
    pub aggregate_window: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            folder: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rotate_after: DEFAULT_ROTATE_AFTER,
            aggregate_window: DEFAULT_AGGREGATE_WINDOW,
        }
    }
}

impl ProfilerConfig {
    /// Configuration writing to the given folder with default tunables.
    pub fn with_folder(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: Some(folder.into()),
            ..Self::default()
        }
    }
}
