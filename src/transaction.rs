//! Transaction data model and raw-record rendering
//!
//! A `Transaction` is the unit of profiling: one named piece of work
//! (typically a request or a job run) carrying timed actions, per-method
//! call statistics and arbitrary counters. It is mutated only by the thread
//! that opened it; ownership moves to the writer thread at close time.

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// A single timed action captured inside a transaction.
///
/// Created once, when the action completes; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    /// Action name (a named piece of code)
    pub name: String,
    /// Elapsed time since the previous checkpoint, in milliseconds
    pub duration_millis: u64,
}

impl ActionRecord {
    pub fn new(name: &str, duration_millis: u64) -> Self {
        Self {
            name: name.to_string(),
            duration_millis,
        }
    }
}

/// Aggregate timing for one instrumented method within a transaction.
///
/// Re-entrancy safe: the cumulative duration is bumped only when the
/// outermost call exits (depth 1 -> 0), so recursive or nested calls to the
/// same method are timed exactly once, end to end.
#[derive(Debug, Clone)]
pub struct MethodCallStat {
    /// Method name
    pub name: String,
    /// Cumulative wall time of outermost calls, in milliseconds
    pub duration_millis: u64,
    /// Total number of calls, nested ones included
    pub calls: u64,
    /// Current re-entrancy depth
    pub depth: u32,
    /// When the outermost call entered; `None` while fully unwound
    entered_at: Option<Instant>,
}

impl MethodCallStat {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            duration_millis: 0,
            calls: 0,
            depth: 0,
            entered_at: None,
        }
    }

    /// Record a method entry.
    pub fn enter(&mut self) {
        if self.depth == 0 {
            self.entered_at = Some(Instant::now());
        }
        self.calls += 1;
        self.depth += 1;
    }

    /// Record a method exit. Returns `false` if the method is not currently
    /// entered (the caller reports that as an invalid-state condition).
    pub fn exit(&mut self) -> bool {
        if self.depth == 0 {
            return false;
        }
        self.depth -= 1;
        if self.depth == 0 {
            if let Some(entered) = self.entered_at.take() {
                self.duration_millis += entered.elapsed().as_millis() as u64;
            }
        }
        true
    }
}

/// The set of metrics collected during a single profiled transaction.
///
/// Field visibility is deliberately open: the recorder mutates a transaction
/// on its owning thread, and tests construct transactions with exact
/// durations.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Transaction name; doubles as the persistence key (sanitized for
    /// file naming by the rotator)
    pub name: String,
    /// Wall-clock time the transaction was opened
    pub start_time: DateTime<Local>,
    /// Total duration, set exactly once at close; 0 before that
    pub duration_millis: u64,
    /// Timed actions in recording order
    pub actions: Vec<ActionRecord>,
    /// Per-method call statistics, insertion order preserved
    pub method_calls: IndexMap<String, MethodCallStat>,
    /// Arbitrary named counters
    pub counters: HashMap<String, i64>,
    started: Instant,
    checkpoint: Instant,
}

impl Transaction {
    pub fn new(name: &str) -> Self {
        let now = Instant::now();
        Self {
            name: name.to_string(),
            start_time: Local::now(),
            duration_millis: 0,
            actions: Vec::new(),
            method_calls: IndexMap::new(),
            counters: HashMap::new(),
            started: now,
            checkpoint: now,
        }
    }

    /// Reset the action checkpoint to now, delimiting the start of the next
    /// timed action.
    pub fn checkpoint(&mut self) {
        self.checkpoint = Instant::now();
    }

    /// Append an action whose duration is the time elapsed since the last
    /// checkpoint, then reset the checkpoint. Calling this repeatedly chains
    /// consecutive intervals.
    pub fn record_action(&mut self, name: &str) {
        let duration_millis = self.checkpoint.elapsed().as_millis() as u64;
        self.actions.push(ActionRecord::new(name, duration_millis));
        self.checkpoint = Instant::now();
    }

    /// Fix the total duration. Called exactly once, at close.
    pub fn finish(&mut self) {
        self.duration_millis = self.started.elapsed().as_millis() as u64;
    }
}

fn secs(millis: u64) -> f64 {
    millis as f64 / 1000.0
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = secs(self.duration_millis);

        // The header carries the serialization time, i.e. when the block
        // hits the log, not when the transaction started
        writeln!(
            f,
            "======{{{{ {} {}s {}",
            self.name,
            total,
            Local::now().format("%Y-%m-%dT%H:%M:%S%.3f")
        )?;

        for record in &self.actions {
            writeln!(f, "M | {}s - {}", secs(record.duration_millis), record.name)?;
        }

        for stat in self.method_calls.values() {
            writeln!(
                f,
                "C | {}s - {} calls - {}",
                secs(stat.duration_millis),
                stat.calls,
                stat.name
            )?;
        }

        writeln!(f, "T | {}s - TOTAL", total)?;

        for (key, value) in &self.counters {
            writeln!(f, "I | {} = {}", key, value)?;
        }

        write!(f, "======}}}}")
    }
}
