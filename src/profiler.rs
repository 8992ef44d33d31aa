//! Profiler lifecycle
//!
//! A `Profiler` owns the whole pipeline for one lifetime: it creates the
//! hand-off queue, spawns the writer thread at start, hands out per-thread
//! recorders, and on `stop()` signals shutdown and waits for the queue to
//! drain. Nothing is process-global, so tests run isolated instances side
//! by side.

use crate::config::ProfilerConfig;
use crate::handoff::{HandoffQueue, QueueStats};
use crate::recorder::Recorder;
use crate::writer::PersistenceWriter;
use anyhow::{bail, Context, Result};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Handle to a running profiling pipeline.
///
/// # Example
///
/// ```no_run
/// use medidor::config::ProfilerConfig;
/// use medidor::profiler::Profiler;
///
/// let profiler = Profiler::start(ProfilerConfig::with_folder("/tmp/measure"))?;
/// let mut recorder = profiler.recorder();
///
/// recorder.open("checkout");
/// // ... do work ...
/// recorder.record_action("load cart");
/// // ... do more work ...
/// recorder.record_action("charge card");
/// recorder.increment("items");
/// recorder.close();
///
/// profiler.stop();
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Profiler {
    queue: Arc<HandoffQueue>,
    enabled: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    writer_handle: Option<JoinHandle<()>>,
}

impl Profiler {
    /// Start the pipeline: create the target folder if needed and spawn the
    /// writer thread.
    ///
    /// # Errors
    ///
    /// Fails when a tunable is out of range, the target folder cannot be
    /// created, or the writer thread cannot be spawned.
    pub fn start(config: ProfilerConfig) -> Result<Self> {
        if config.queue_capacity == 0 {
            bail!("queue capacity must be > 0");
        }
        if config.aggregate_window == 0 {
            bail!("aggregation window must be > 0");
        }
        if let Some(folder) = &config.folder {
            fs::create_dir_all(folder)
                .with_context(|| format!("can't create folder: {}", folder.display()))?;
        }

        let queue = Arc::new(HandoffQueue::new(config.queue_capacity));
        let enabled = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));
        let writer = PersistenceWriter::new(&config);

        let writer_handle = thread::Builder::new()
            .name("medidor-writer".to_string())
            .spawn({
                let queue = queue.clone();
                let shutdown = shutdown.clone();
                let enabled = enabled.clone();
                move || writer.run(queue, shutdown, enabled)
            })
            .context("can't spawn writer thread")?;

        Ok(Self {
            queue,
            enabled,
            shutdown,
            writer_handle: Some(writer_handle),
        })
    }

    /// A recorder for the calling thread. Each application thread keeps its
    /// own; recorders share only the queue and the enabled flag.
    pub fn recorder(&self) -> Recorder {
        Recorder::new(self.queue.clone(), self.enabled.clone())
    }

    /// False once the writer died or `stop()` ran; producer calls are
    /// no-ops from then on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Snapshot of hand-off queue counters.
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Stop the pipeline: disable producers, signal the writer, and wait
    /// until everything already queued has been drained and flushed.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.writer_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
