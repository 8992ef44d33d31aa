//! Producer-facing recording API
//!
//! A `Recorder` is an explicit per-thread handle: it exclusively owns the
//! in-flight transaction until `close()` hands it to the writer through the
//! queue, so no synchronization is needed on the recording path.
//!
//! Every call is a silent no-op when no transaction is open, and recording
//! failures are logged rather than surfaced; profiling must never interrupt
//! application control flow. The single deliberate exception is
//! [`Recorder::method_exit`] without a matching enter, which indicates
//! misplaced instrumentation and fails loudly with a typed error.

use crate::handoff::HandoffQueue;
use crate::transaction::{MethodCallStat, Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// The one loud failure of the recording API.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecorderError {
    /// `method_exit` was called for a method with no open `method_enter`
    #[error("method exit without matching enter: {0}")]
    UnmatchedMethodExit(String),
}

/// Per-thread transaction recorder.
///
/// Obtained from [`Profiler::recorder`](crate::profiler::Profiler::recorder);
/// each application thread keeps its own.
pub struct Recorder {
    current: Option<Transaction>,
    queue: Arc<HandoffQueue>,
    enabled: Arc<AtomicBool>,
}

impl Recorder {
    pub(crate) fn new(queue: Arc<HandoffQueue>, enabled: Arc<AtomicBool>) -> Self {
        Self {
            current: None,
            queue,
            enabled,
        }
    }

    /// Open a transaction on this recorder.
    ///
    /// A transaction already open on this recorder is abandoned with a
    /// warning and never persisted. No-op while the profiler is disabled.
    pub fn open(&mut self, name: &str) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        if let Some(prev) = self.current.take() {
            tracing::warn!("abandoned transaction: {}", prev.name);
        }
        self.current = Some(Transaction::new(name));
    }

    /// Whether a transaction is currently open.
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Reset the checkpoint delimiting the start of the next timed action.
    pub fn checkpoint(&mut self) {
        if let Some(tx) = &mut self.current {
            tx.checkpoint();
        }
    }

    /// Record a timed action: the interval since the previous checkpoint (or
    /// previous `record_action`) under the given name.
    pub fn record_action(&mut self, name: &str) {
        if let Some(tx) = &mut self.current {
            tx.record_action(name);
        }
    }

    /// Add 1 to the named counter.
    pub fn increment(&mut self, key: &str) {
        self.increment_by(key, 1);
    }

    /// Add `amount` to the named counter, starting from 0 if absent.
    pub fn increment_by(&mut self, key: &str, amount: i64) {
        if let Some(tx) = &mut self.current {
            *tx.counters.entry(key.to_string()).or_insert(0) += amount;
        }
    }

    /// Record entry into an instrumented method.
    pub fn method_enter(&mut self, name: &str) {
        let Some(tx) = &mut self.current else {
            return;
        };
        tx.method_calls
            .entry(name.to_string())
            .or_insert_with(|| MethodCallStat::new(name))
            .enter();
    }

    /// Record exit from an instrumented method.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::UnmatchedMethodExit`] when the method was
    /// never entered on this transaction, or has already fully unwound.
    /// Detected on every unmatched call. With no open transaction this is a
    /// no-op like the rest of the API.
    pub fn method_exit(&mut self, name: &str) -> Result<(), RecorderError> {
        let Some(tx) = &mut self.current else {
            return Ok(());
        };
        let matched = tx
            .method_calls
            .get_mut(name)
            .map(MethodCallStat::exit)
            .unwrap_or(false);
        if matched {
            Ok(())
        } else {
            Err(RecorderError::UnmatchedMethodExit(name.to_string()))
        }
    }

    /// Close the transaction: fix its total duration, detach it from this
    /// recorder and hand it to the writer.
    ///
    /// If the profiler has been disabled or the queue is full the
    /// transaction is dropped with a warning; the caller is never blocked.
    pub fn close(&mut self) {
        let Some(mut tx) = self.current.take() else {
            return;
        };
        tx.finish();
        if !self.enabled.load(Ordering::Relaxed) {
            tracing::warn!("profiler disabled, dropping transaction '{}'", tx.name);
            return;
        }
        self.queue.submit(tx);
    }
}
