//! The single background consumer of the pipeline
//!
//! One dedicated thread owns all persistence state (rotator and aggregator)
//! and pops transactions off the hand-off queue: raw record first, then the
//! aggregation report whenever a window completes. Nothing else touches this
//! state, so the consumer runs lock-free.
//!
//! Lifecycle: `Running` until the shutdown flag is raised, then `Draining`
//! (finish whatever is already queued), then `Stopped`. Transactions
//! enqueued concurrently with shutdown may be lost; that is the accepted
//! data-loss window at process exit.
//!
//! I/O failures are logged and the loop keeps going. A panic escaping the
//! loop disables the whole profiler (producer calls become no-ops) instead
//! of taking the host process down.

use crate::aggregate::Aggregator;
use crate::config::ProfilerConfig;
use crate::handoff::HandoffQueue;
use crate::rotate::{FileKey, FileRotator, StreamKind};
use crate::transaction::Transaction;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long the writer sleeps when the queue is empty
const POLL_SLEEP: Duration = Duration::from_millis(10);

#[derive(Debug, PartialEq, Eq)]
enum WriterState {
    Running,
    Draining,
    Stopped,
}

/// Consumer-side persistence: rotating raw logs plus window aggregation.
pub struct PersistenceWriter {
    rotator: FileRotator,
    aggregator: Aggregator,
}

impl PersistenceWriter {
    pub fn new(config: &ProfilerConfig) -> Self {
        Self {
            rotator: FileRotator::new(config.folder.clone(), config.rotate_after),
            aggregator: Aggregator::new(config.aggregate_window),
        }
    }

    /// Persist one transaction: write its raw block, feed the aggregator,
    /// and write the aggregation report when the window for its name just
    /// completed. I/O failures are logged, never propagated.
    pub fn process(&mut self, tx: Transaction) {
        let raw_key = FileKey::new(&tx.name, StreamKind::Raw);
        let block = tx.to_string();
        if let Err(e) = self.rotator.write(&raw_key, &block) {
            tracing::error!("can't write record for '{}': {}", tx.name, e);
        }

        if let Some(report) = self.aggregator.add(tx) {
            let key = FileKey::new(&report.transaction_name, StreamKind::Percent);
            if let Err(e) = self.rotator.write(&key, &report.to_string()) {
                tracing::error!(
                    "can't write aggregation report for '{}': {}",
                    report.transaction_name,
                    e
                );
            }
        }
    }

    /// Flush every open stream.
    pub fn flush(&mut self) {
        self.rotator.flush_all();
    }

    /// Writer thread body. Contains panics: a fault escaping the loop flips
    /// `enabled` off so producer calls degrade to no-ops, then streams are
    /// flushed and the thread exits without touching the host process.
    pub(crate) fn run(
        mut self,
        queue: Arc<HandoffQueue>,
        shutdown: Arc<AtomicBool>,
        enabled: Arc<AtomicBool>,
    ) {
        self.run_with(&queue, &shutdown, &enabled, Self::process);
    }

    /// Loop driver with the per-transaction handler split out, so a faulting
    /// handler can be injected when exercising the containment path.
    fn run_with<F>(
        &mut self,
        queue: &HandoffQueue,
        shutdown: &AtomicBool,
        enabled: &AtomicBool,
        mut handle: F,
    ) where
        F: FnMut(&mut Self, Transaction),
    {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.pump(queue, shutdown, &mut handle)));
        if outcome.is_err() {
            enabled.store(false, Ordering::SeqCst);
            tracing::error!("unable to write performance data, disabling the profiler");
        }
        self.flush();
    }

    fn pump<F>(&mut self, queue: &HandoffQueue, shutdown: &AtomicBool, handle: &mut F)
    where
        F: FnMut(&mut Self, Transaction),
    {
        let mut state = WriterState::Running;
        loop {
            match state {
                WriterState::Running => {
                    if shutdown.load(Ordering::SeqCst) {
                        state = WriterState::Draining;
                        continue;
                    }
                    match queue.pop() {
                        Some(tx) => handle(self, tx),
                        None => thread::sleep(POLL_SLEEP),
                    }
                }
                WriterState::Draining => match queue.pop() {
                    Some(tx) => handle(self, tx),
                    None => state = WriterState::Stopped,
                },
                WriterState::Stopped => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::ActionRecord;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir, aggregate_window: usize) -> ProfilerConfig {
        ProfilerConfig {
            folder: Some(dir.path().to_path_buf()),
            aggregate_window,
            ..ProfilerConfig::default()
        }
    }

    fn tx(name: &str, total: u64, actions: &[(&str, u64)]) -> Transaction {
        let mut tx = Transaction::new(name);
        tx.duration_millis = total;
        for (action, millis) in actions {
            tx.actions.push(ActionRecord::new(action, *millis));
        }
        tx
    }

    #[test]
    fn test_process_writes_raw_block() {
        let dir = TempDir::new().unwrap();
        let mut writer = PersistenceWriter::new(&config_for(&dir, 20));

        writer.process(tx("job", 35, &[("a", 10), ("b", 20)]));
        writer.flush();

        let content = fs::read_to_string(dir.path().join("job.log")).unwrap();
        assert!(content.contains("======{{ job 0.035s "));
        assert!(content.contains("M | 0.01s - a"));
        assert!(content.contains("M | 0.02s - b"));
        assert!(content.contains("T | 0.035s - TOTAL"));
        assert!(content.ends_with("======}}\n"));
    }

    #[test]
    fn test_percent_stream_written_when_window_completes() {
        let dir = TempDir::new().unwrap();
        let mut writer = PersistenceWriter::new(&config_for(&dir, 20));

        for _ in 0..20 {
            writer.process(tx("job", 100, &[("x", 50)]));
        }
        writer.flush();

        let report = fs::read_to_string(dir.path().join("job.percent.log")).unwrap();
        assert!(report.contains("------{{ AGG: job"));
        assert!(report.contains("50.0% - x"));
        assert!(report.contains("------}}"));

        // Exactly one report for 20 transactions
        assert_eq!(report.matches("AGG: job").count(), 1);
    }

    #[test]
    fn test_no_percent_stream_before_window_completes() {
        let dir = TempDir::new().unwrap();
        let mut writer = PersistenceWriter::new(&config_for(&dir, 20));

        for _ in 0..19 {
            writer.process(tx("job", 100, &[("x", 50)]));
        }
        writer.flush();

        assert!(!dir.path().join("job.percent.log").exists());
    }

    #[test]
    fn test_run_drains_queue_before_stopping() {
        let dir = TempDir::new().unwrap();
        let writer = PersistenceWriter::new(&config_for(&dir, 20));

        let queue = Arc::new(HandoffQueue::new(16));
        for i in 0..5 {
            queue.submit(tx(&format!("job_{i}"), 10, &[("x", 10)]));
        }
        let shutdown = Arc::new(AtomicBool::new(true));
        let enabled = Arc::new(AtomicBool::new(true));

        writer.run(queue.clone(), shutdown, enabled.clone());

        assert!(queue.is_empty());
        assert!(enabled.load(Ordering::SeqCst));
        for i in 0..5 {
            assert!(dir.path().join(format!("job_{i}.log")).exists());
        }
    }

    #[test]
    fn test_panic_while_processing_disables_profiler() {
        let dir = TempDir::new().unwrap();
        let mut writer = PersistenceWriter::new(&config_for(&dir, 20));

        let queue = Arc::new(HandoffQueue::new(8));
        queue.submit(tx("ok", 10, &[("x", 10)]));
        queue.submit(tx("boom", 10, &[("x", 10)]));
        let shutdown = Arc::new(AtomicBool::new(true));
        let enabled = Arc::new(AtomicBool::new(true));

        writer.run_with(&queue, &shutdown, &enabled, |writer, tx| {
            if tx.name == "boom" {
                panic!("synthetic writer fault");
            }
            writer.process(tx);
        });

        // The fault is contained: run_with returned, the profiler is
        // disabled, and the work done before the fault reached its stream
        assert!(!enabled.load(Ordering::SeqCst));
        let content = fs::read_to_string(dir.path().join("ok.log")).unwrap();
        assert!(content.contains("======{{ ok "));
    }
}
